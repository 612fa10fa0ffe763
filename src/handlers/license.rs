//! License API: public check/activate/deactivate over GET, private
//! browse/read/edit/add/delete over POST.
//!
//! Validation failures come back as the engine's field -> message maps with
//! a 400 (404 for a missing record), mirroring what the engine reports
//! instead of wrapping it. Successful responses carry `time_elapsed`.

use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::license::{self, query::BrowseQuery};
use crate::models::{License, LicensePayload, LicensePublicInfo, LicenseStatus, LicenseUpdate};
use crate::nonce;

/// Seconds before the next deactivation is allowed again after one
/// succeeds. Shortened to a minute in dev mode.
const DEACTIVATE_COOLDOWN: i64 = 30 * 24 * 3600;
const DEACTIVATE_COOLDOWN_DEV: i64 = 60;

#[derive(Debug, Default, Deserialize)]
pub struct PublicParams {
    pub action: Option<String>,
    pub license_key: Option<String>,
    pub package_slug: Option<String>,
    /// The single domain being activated or deactivated.
    pub allowed_domains: Option<String>,
}

pub async fn public_api(
    State(state): State<AppState>,
    Query(params): Query<PublicParams>,
) -> Result<Response> {
    let started = Instant::now();

    let action = params
        .action
        .as_deref()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AppError::BadRequest("Malformed request.".to_string()))?;

    let outcome = match action {
        "check" => check(&state, started, &params),
        "activate" => activate(&state, started, &params),
        "deactivate" => deactivate(&state, started, &params),
        _ => Err(AppError::MethodNotAllowed(
            "Method not allowed.".to_string(),
        )),
    };

    match &outcome {
        Ok(_) => info!(action, "license api request served"),
        Err(e) => info!(action, error = %e, "license api request rejected"),
    }

    outcome
}

fn key_or_false(key: &str) -> Value {
    if key.is_empty() {
        json!(false)
    } else {
        json!(key)
    }
}

fn failure(shape: Value) -> Result<Response> {
    Ok((StatusCode::BAD_REQUEST, axum::Json(shape)).into_response())
}

fn success(mut body: Value, started: Instant) -> Result<Response> {
    if let Value::Object(map) = &mut body {
        map.insert(
            "time_elapsed".to_string(),
            json!(format!("{:.3}", started.elapsed().as_secs_f64())),
        );
    }
    Ok(axum::Json(body).into_response())
}

fn check(state: &AppState, started: Instant, params: &PublicParams) -> Result<Response> {
    let conn = state.db.get()?;
    let key = params.license_key.as_deref().unwrap_or("");

    let payload = LicensePayload {
        license_key: Some(key.to_string()),
        ..Default::default()
    };

    match license::read_license(&conn, &state.cache, &payload, false)? {
        Ok(license) => success(
            serde_json::to_value(crate::models::LicenseCheckInfo::from(license))?,
            started,
        ),
        Err(_) => failure(json!({ "license_key": key_or_false(key) })),
    }
}

/// Reads the record for activate/deactivate: the key must exist and the
/// record must belong to the package named in the request.
fn read_for_package(
    state: &AppState,
    params: &PublicParams,
) -> Result<std::result::Result<License, Value>> {
    let conn = state.db.get()?;
    let key = params.license_key.as_deref().unwrap_or("");

    let payload = LicensePayload {
        license_key: Some(key.to_string()),
        ..Default::default()
    };

    let not_found = json!({ "license_key": key_or_false(key) });

    match license::read_license(&conn, &state.cache, &payload, false)? {
        Ok(license) if params.package_slug.as_deref() == Some(license.package_slug.as_str()) => {
            Ok(Ok(license))
        }
        _ => Ok(Err(not_found)),
    }
}

fn activate(state: &AppState, started: Instant, params: &PublicParams) -> Result<Response> {
    let license = match read_for_package(state, params)? {
        Ok(license) => license,
        Err(shape) => return failure(shape),
    };

    let Some(domain) = params
        .allowed_domains
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(String::from)
    else {
        return failure(json!({ "allowed_domains": false }));
    };

    match license.status {
        LicenseStatus::Expired | LicenseStatus::Blocked | LicenseStatus::OnHold => {
            return failure(json!({ "status": license.status }));
        }
        _ => {}
    }

    if license.has_domain(&domain) {
        return failure(json!({ "allowed_domains": [domain] }));
    }

    if license.allowed_domains.len() as i64 + 1 > license.max_allowed_domains {
        return failure(json!({ "max_allowed_domains": license.max_allowed_domains }));
    }

    let now = Utc::now().timestamp();
    let next_deactivate = match license.next_deactivate() {
        Some(ts) if ts > now => ts,
        _ => now,
    };

    let mut allowed_domains = license.allowed_domains.clone();
    allowed_domains.push(domain.clone());

    let mut data = license.data.clone();
    data.insert("next_deactivate".to_string(), json!(next_deactivate));

    let changes = LicenseUpdate {
        allowed_domains: Some(allowed_domains.clone()),
        status: Some(LicenseStatus::Activated),
        data: Some(data.clone()),
        ..Default::default()
    };

    {
        let conn = state.db.get()?;
        queries::update_license(&conn, &license.id, &changes)?;
    }
    license::clear_read_cache(&state.cache, &license)?;

    let updated = License {
        allowed_domains,
        status: LicenseStatus::Activated,
        data,
        ..license
    };

    let signature = license::signature::generate_signature(&updated, &domain)?;

    let mut info = LicensePublicInfo::from(updated);
    info.license_signature = Some(signature);
    info.next_deactivate = Some(next_deactivate);

    success(serde_json::to_value(info)?, started)
}

fn deactivate(state: &AppState, started: Instant, params: &PublicParams) -> Result<Response> {
    let license = match read_for_package(state, params)? {
        Ok(license) => license,
        Err(shape) => return failure(shape),
    };

    let Some(domain) = params
        .allowed_domains
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(String::from)
    else {
        return failure(json!({ "allowed_domains": false }));
    };

    match license.status {
        LicenseStatus::Expired => {
            return failure(json!({
                "status": license.status,
                "date_expiry": license.date_expiry,
            }));
        }
        LicenseStatus::Blocked | LicenseStatus::OnHold => {
            return failure(json!({ "status": license.status }));
        }
        LicenseStatus::Deactivated => {
            return failure(json!({ "allowed_domains": [domain] }));
        }
        _ => {}
    }

    if !license.has_domain(&domain) {
        return failure(json!({ "allowed_domains": [domain] }));
    }

    let now = Utc::now().timestamp();
    if let Some(ts) = license.next_deactivate() {
        if ts > now {
            return failure(json!({ "next_deactivate": ts }));
        }
    }

    let mut allowed_domains = license.allowed_domains.clone();
    allowed_domains.retain(|d| d != &domain);

    let status = if allowed_domains.is_empty() {
        LicenseStatus::Deactivated
    } else {
        license.status
    };

    let cooldown = if state.config.dev_mode {
        DEACTIVATE_COOLDOWN_DEV
    } else {
        DEACTIVATE_COOLDOWN
    };
    let next_deactivate = now + cooldown;

    let mut data = license.data.clone();
    data.insert("next_deactivate".to_string(), json!(next_deactivate));

    let changes = LicenseUpdate {
        allowed_domains: Some(allowed_domains.clone()),
        status: Some(status),
        data: Some(data.clone()),
        ..Default::default()
    };

    {
        let conn = state.db.get()?;
        queries::update_license(&conn, &license.id, &changes)?;
    }
    license::clear_read_cache(&state.cache, &license)?;

    let updated = License {
        allowed_domains,
        status,
        data,
        ..license
    };

    let signature = license::signature::generate_signature(&updated, &domain)?;

    let mut info = LicensePublicInfo::from(updated);
    info.license_signature = Some(signature);
    info.next_deactivate = Some(next_deactivate);

    success(serde_json::to_value(info)?, started)
}

// ============ Private API ============

/// Identity carried by a License API token, minted for a credential whose
/// access list covers the private actions.
struct ApiIdentity {
    key_id: String,
    access: Vec<String>,
}

impl ApiIdentity {
    fn grants(&self, action: &str) -> bool {
        self.access.iter().any(|a| a == "all" || a == action)
    }

    fn grants_other(&self) -> bool {
        self.access.iter().any(|a| a == "other")
    }

    fn owns(&self, license: &License) -> bool {
        self.grants_other() || license.api_owner() == Some(self.key_id.as_str())
    }
}

fn unauthorized() -> AppError {
    AppError::Forbidden("Unauthorized access.".to_string())
}

/// Resolves the caller's identity from the `X-Depot-Token` header or the
/// `api_token` body field. The token must be a live stored token whose
/// data embeds a License API grant.
fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    body: &Map<String, Value>,
) -> Result<ApiIdentity> {
    let token = headers
        .get("x-depot-token")
        .and_then(|v| v.to_str().ok())
        .or_else(|| body.get("api_token").and_then(Value::as_str))
        .unwrap_or("");

    if token.is_empty() {
        return Err(unauthorized());
    }

    let conn = state.db.get()?;
    let record = nonce::fetch_nonce(&conn, token, state.expiry_hook.as_ref())?
        .filter(|n| n.nonce == token)
        .ok_or_else(unauthorized)?;

    let grant = record
        .data
        .get("license_api")
        .and_then(Value::as_object)
        .ok_or_else(unauthorized)?;

    let key_id = grant
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(unauthorized)?
        .to_string();

    let access = grant
        .get("access")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(ApiIdentity { key_id, access })
}

pub async fn private_api(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Map<String, Value>>,
) -> Result<Response> {
    let started = Instant::now();

    let action = body
        .get("action")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AppError::BadRequest("Malformed request.".to_string()))?
        .to_string();

    let identity = authenticate(&state, &headers, &body)?;
    if !identity.grants(&action) {
        return Err(unauthorized());
    }

    let outcome = match action.as_str() {
        "browse" => browse(&state, started, &identity, &body),
        "read" => read(&state, started, &identity, &body),
        "edit" => edit(&state, started, &identity, &body),
        "add" => add(&state, started, &identity, &body),
        "delete" => delete(&state, started, &identity, &body),
        _ => Err(AppError::BadRequest("Malformed request.".to_string())),
    };

    match &outcome {
        Ok(_) => info!(action = %action, key_id = %identity.key_id, "license api request served"),
        Err(e) => {
            info!(action = %action, key_id = %identity.key_id, error = %e, "license api request rejected")
        }
    }

    outcome
}

fn payload_from(body: &Map<String, Value>) -> Result<LicensePayload> {
    serde_json::from_value(Value::Object(body.clone()))
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Maps an engine validation failure onto a response: a missing record is
/// a 404, everything else a 400, with the field -> message map as the body.
fn validation_failure(errors: license::FieldErrors) -> Response {
    let status = if errors.contains_key("license_not_found") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, axum::Json(Value::Object(errors))).into_response()
}

fn browse(
    state: &AppState,
    started: Instant,
    identity: &ApiIdentity,
    body: &Map<String, Value>,
) -> Result<Response> {
    let raw = body
        .get("browse_query")
        .and_then(Value::as_str)
        .unwrap_or("{}");

    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| AppError::BadRequest(format!("Invalid browse query: {}", e)))?;

    let mut query = BrowseQuery::parse(&parsed).map_err(AppError::BadRequest)?;

    // Record ids are internal; criteria on them are dropped, not rejected.
    query.criteria.retain(|c| c.field != "id");

    let conn = state.db.get()?;
    let mut licenses = license::browse_licenses(&conn, &query)?;

    if !identity.grants_other() {
        licenses.retain(|l| identity.owns(l));
    }

    if licenses.is_empty() {
        return Ok((
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "count": 0, "message": "Licenses not found." })),
        )
            .into_response());
    }

    success(
        json!({
            "count": licenses.len(),
            "licenses": licenses,
        }),
        started,
    )
}

fn read(
    state: &AppState,
    started: Instant,
    identity: &ApiIdentity,
    body: &Map<String, Value>,
) -> Result<Response> {
    let payload = payload_from(body)?;
    let conn = state.db.get()?;

    match license::read_license(&conn, &state.cache, &payload, false)? {
        Ok(license) => {
            if !identity.owns(&license) {
                return Err(unauthorized());
            }
            success(serde_json::to_value(license)?, started)
        }
        Err(errors) => Ok(validation_failure(errors)),
    }
}

fn edit(
    state: &AppState,
    started: Instant,
    identity: &ApiIdentity,
    body: &Map<String, Value>,
) -> Result<Response> {
    let payload = payload_from(body)?;
    let conn = state.db.get()?;

    match license::read_license(&conn, &state.cache, &payload, true)? {
        Ok(existing) if !identity.owns(&existing) => return Err(unauthorized()),
        Ok(_) => {}
        Err(errors) => return Ok(validation_failure(errors)),
    }

    match license::edit_license(&conn, &state.cache, &payload)? {
        Ok(license) => success(serde_json::to_value(license)?, started),
        Err(errors) => Ok(validation_failure(errors)),
    }
}

fn add(
    state: &AppState,
    started: Instant,
    identity: &ApiIdentity,
    body: &Map<String, Value>,
) -> Result<Response> {
    let mut payload = payload_from(body)?;

    // Records created through the API are owned by the creating credential.
    let data = payload.data.get_or_insert_with(Map::new);
    data.insert("api_owner".to_string(), json!(identity.key_id));

    let conn = state.db.get()?;

    match license::add_license(&conn, &state.cache, &payload)? {
        Ok(license) => {
            let key = license.license_key.clone();
            let mut value = serde_json::to_value(license)?;
            if let Value::Object(map) = &mut value {
                map.insert("result".to_string(), json!("success"));
                map.insert(
                    "message".to_string(),
                    json!("License successfully created"),
                );
                map.insert("key".to_string(), json!(key));
            }
            success(value, started)
        }
        Err(errors) => Ok(validation_failure(errors)),
    }
}

fn delete(
    state: &AppState,
    started: Instant,
    identity: &ApiIdentity,
    body: &Map<String, Value>,
) -> Result<Response> {
    let payload = payload_from(body)?;
    let conn = state.db.get()?;

    match license::read_license(&conn, &state.cache, &payload, true)? {
        Ok(existing) if !identity.owns(&existing) => return Err(unauthorized()),
        Ok(_) => {}
        Err(errors) => return Ok(validation_failure(errors)),
    }

    match license::delete_license(&conn, &state.cache, &payload)? {
        Ok(license) => success(serde_json::to_value(license)?, started),
        Err(errors) => Ok(validation_failure(errors)),
    }
}
