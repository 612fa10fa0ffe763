//! Update API: `get_metadata` and `download`.
//!
//! Both actions resolve the package through the sync layer, so a missing
//! local archive can be pulled from the VCS host on first request. License
//! handling is grafted onto the metadata per request; the stored metadata
//! never contains license state.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::license;
use crate::models::{License, LicensePayload, LicensePublicInfo, LicenseStatus, Package};
use crate::nonce::{self, NonceOptions};
use crate::package;
use crate::sync;

/// Seconds a download nonce for a license-required package stays valid.
const DOWNLOAD_NONCE_EXPIRY: i64 = 12 * 3600;

#[derive(Debug, Default, Deserialize)]
pub struct UpdateParams {
    pub action: Option<String>,
    pub package_id: Option<String>,
    pub update_type: Option<String>,
    pub token: Option<String>,
    pub license_key: Option<String>,
    pub license_signature: Option<String>,
    pub licensed_with: Option<String>,
}

pub async fn update_api_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<UpdateParams>,
) -> Result<Response> {
    handle(state, headers, params).await
}

pub async fn update_api_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<UpdateParams>,
) -> Result<Response> {
    handle(state, headers, params).await
}

async fn handle(state: AppState, headers: HeaderMap, params: UpdateParams) -> Result<Response> {
    let action = params
        .action
        .as_deref()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AppError::BadRequest("Malformed request.".to_string()))?;

    let slug = params
        .package_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Malformed request.".to_string()))?
        .to_string();

    let outcome = match action {
        "get_metadata" => get_metadata(&state, &slug, &params).await,
        "download" => download(&state, &slug, &params).await,
        _ => Err(AppError::BadRequest("Malformed request.".to_string())),
    };

    let remote = crate::util::remote_addr(&headers).unwrap_or_default();
    match &outcome {
        Ok(_) => info!(action, slug = %slug, remote = %remote, "update api request served"),
        Err(e) => {
            info!(action, slug = %slug, remote = %remote, error = %e, "update api request rejected")
        }
    }

    outcome
}

async fn get_metadata(state: &AppState, slug: &str, params: &UpdateParams) -> Result<Response> {
    let Some(pkg) = sync::find_package(state, slug, true).await? else {
        return Err(AppError::NotFound("Package not found".to_string()));
    };

    let mut metadata = pkg.metadata_object();
    let require_license = pkg.metadata.require_license && state.config.use_licenses;

    let mut licensed: Option<License> = None;
    let mut license_error: Option<Value> = None;

    if require_license {
        match resolve_license(state, &pkg, params)? {
            LicenseOutcome::Valid(license) => licensed = Some(license),
            LicenseOutcome::Error(shape) => license_error = Some(shape),
        }
    }

    if let Some(shape) = license_error {
        metadata.insert("license_error".to_string(), shape);
        metadata.remove("download_url");
        metadata.remove("license");
    } else {
        let token = mint_download_token(state, slug, require_license)?;
        let mut download_url = format!(
            "{}/update-api?action=download&token={}&package_id={}",
            state.config.base_url,
            urlencoding::encode(&token),
            urlencoding::encode(slug),
        );

        if let Some(license) = licensed {
            if let (Some(key), Some(signature)) =
                (&params.license_key, &params.license_signature)
            {
                download_url.push_str(&format!(
                    "&license_key={}&license_signature={}",
                    urlencoding::encode(key),
                    urlencoding::encode(signature),
                ));
            }
            metadata.insert(
                "license".to_string(),
                serde_json::to_value(LicensePublicInfo::from(license))?,
            );
        }

        metadata.insert("download_url".to_string(), json!(download_url));
    }

    let mut body = Value::Object(metadata);
    package::stringify_scalars(&mut body);

    Ok(Json(body).into_response())
}

async fn download(state: &AppState, slug: &str, params: &UpdateParams) -> Result<Response> {
    {
        let conn = state.db.get()?;
        let token = params.token.as_deref().unwrap_or("");
        if !nonce::validate_nonce(&conn, token, state.expiry_hook.as_ref())? {
            return Err(AppError::Forbidden(
                "The download URL token has expired.".to_string(),
            ));
        }
    }

    let Some(pkg) = sync::find_package(state, slug, false).await? else {
        return Err(AppError::NotFound("Package not found".to_string()));
    };

    if pkg.metadata.require_license && state.config.use_licenses {
        let valid = matches!(resolve_license(state, &pkg, params)?, LicenseOutcome::Valid(_));
        if !valid {
            return Err(AppError::Forbidden(
                "Invalid license key or signature.".to_string(),
            ));
        }
    }

    stream_archive(&pkg).await
}

enum LicenseOutcome {
    Valid(License),
    /// The `license_error` shape reported to the client.
    Error(Value),
}

/// Resolves and checks the license presented with an update request.
///
/// When the client passes `licensed_with` and the package's own metadata
/// names the same main package, the license is checked against that main
/// package's slug instead of the requested one, so add-ons can ship under
/// the license of the package they extend.
fn resolve_license(
    state: &AppState,
    pkg: &Package,
    params: &UpdateParams,
) -> Result<LicenseOutcome> {
    let key = params.license_key.as_deref().unwrap_or("");
    if key.is_empty() {
        return Ok(LicenseOutcome::Error(json!({})));
    }

    let conn = state.db.get()?;

    let licensed_with = params
        .licensed_with
        .as_deref()
        .filter(|w| pkg.metadata.licensed_with.as_deref() == Some(*w));

    let found = if let Some(main_slug) = licensed_with {
        let payload = LicensePayload {
            license_key: Some(key.to_string()),
            ..Default::default()
        };
        match license::read_license(&conn, &state.cache, &payload, false)? {
            Ok(license) if license.package_slug == main_slug => Some(license),
            _ => None,
        }
    } else {
        license::verify_license_exists(
            &conn,
            &state.cache,
            &pkg.slug,
            pkg.metadata.package_type,
            key,
        )?
    };

    let Some(license) = found else {
        return Ok(LicenseOutcome::Error(json!({ "license_key": key })));
    };

    let shape = match license.status {
        LicenseStatus::Blocked => json!({ "status": "blocked" }),
        LicenseStatus::Expired => {
            json!({ "status": "expired", "date_expiry": license.date_expiry })
        }
        LicenseStatus::Pending => json!({ "status": "pending" }),
        LicenseStatus::Activated => {
            let signature = params.license_signature.as_deref().unwrap_or("");
            if state.signature_bypass.bypass(&license)
                || license::signature::verify_signature(&license, signature)
            {
                return Ok(LicenseOutcome::Valid(license));
            }
            json!({ "status": "invalid" })
        }
        _ => json!({ "status": "invalid" }),
    };

    Ok(LicenseOutcome::Error(shape))
}

fn mint_download_token(state: &AppState, slug: &str, require_license: bool) -> Result<String> {
    let conn = state.db.get()?;

    let mut data = Map::new();
    data.insert("package_id".to_string(), json!(slug));

    // Licensed downloads get a long-lived one-shot nonce; free packages a
    // short reusable token.
    let opts = if require_license {
        NonceOptions {
            true_nonce: true,
            expiry_length: DOWNLOAD_NONCE_EXPIRY,
            data,
            store: true,
        }
    } else {
        NonceOptions {
            true_nonce: false,
            data,
            ..Default::default()
        }
    };

    Ok(nonce::create_nonce(&conn, &state.config.nonce_salt, opts)?.nonce)
}

async fn stream_archive(pkg: &Package) -> Result<Response> {
    let file = tokio::fs::File::open(&pkg.archive_path).await?;
    let stream = ReaderStream::new(file);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, pkg.file_size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.zip\"", pkg.slug),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("Response build failed: {}", e)))?;

    Ok(response)
}
