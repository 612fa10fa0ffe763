//! Nonce API: POST `/token` and `/nonce`, authenticated by the
//! request-signature protocol.
//!
//! Credentials and signature travel either in the `X-Depot-API-Credentials`
//! / `X-Depot-API-Signature` headers or in the `api_credentials` /
//! `api_signature` body fields; the signature covers the whole body minus
//! those two fields.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::nonce::{self, NonceOptions, signature::ApiCredentials};

/// License API handshake window: tokens minted for a credential with a
/// License API access list always expire after this long.
const LICENSE_API_TOKEN_EXPIRY: i64 = 30 * 60;

fn unauthorized() -> AppError {
    AppError::Forbidden("Unauthorized access.".to_string())
}

fn header_or_field<'a>(
    headers: &'a HeaderMap,
    body: &'a Map<String, Value>,
    header: &str,
    field: &str,
) -> Option<&'a str> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .or_else(|| body.get(field).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// Verifies the request signature and returns the caller's credential.
fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    body: &Map<String, Value>,
) -> Result<crate::models::ApiCredential> {
    let raw_credentials = header_or_field(headers, body, "x-depot-api-credentials", "api_credentials")
        .ok_or_else(unauthorized)?;
    let signature = header_or_field(headers, body, "x-depot-api-signature", "api_signature")
        .ok_or_else(unauthorized)?;

    let credentials = ApiCredentials::parse(raw_credentials).ok_or_else(unauthorized)?;

    if !credentials.timestamp_valid(Utc::now().timestamp(), state.config.dev_mode) {
        return Err(unauthorized());
    }

    let conn = state.db.get()?;
    let credential =
        queries::get_credential(&conn, &credentials.key_id)?.ok_or_else(unauthorized)?;

    if !nonce::signature::verify_signature(&credentials, &credential.secret, body, signature)? {
        return Err(unauthorized());
    }

    Ok(credential)
}

/// Reads an integer body field. Accepts JSON numbers and numeric
/// strings, like form-encoded input.
fn integer_field(body: &Map<String, Value>, field: &str) -> Option<i64> {
    match body.get(field)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub async fn create_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Map<String, Value>>,
) -> Result<Response> {
    mint(state, headers, body, false).await
}

pub async fn create_nonce(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Map<String, Value>>,
) -> Result<Response> {
    mint(state, headers, body, true).await
}

async fn mint(
    state: AppState,
    headers: HeaderMap,
    body: Map<String, Value>,
    true_nonce: bool,
) -> Result<Response> {
    let credential = authenticate(&state, &headers, &body)?;

    let mut expiry_length =
        integer_field(&body, "expiry_length").unwrap_or(nonce::DEFAULT_EXPIRY_LENGTH);

    let mut data = body
        .get("data")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    // A credential holding License API access always gets the handshake
    // window and a token carrying its grant, whatever the request asked.
    if !credential.access.is_empty() {
        expiry_length = LICENSE_API_TOKEN_EXPIRY;
        data.insert(
            "license_api".to_string(),
            json!({
                "id": credential.key_id,
                "access": credential.access,
            }),
        );
    }

    let record = {
        let conn = state.db.get()?;
        nonce::create_nonce(
            &conn,
            &state.config.nonce_salt,
            NonceOptions {
                true_nonce,
                expiry_length,
                data,
                store: true,
            },
        )?
    };

    info!(
        key_id = %credential.key_id,
        true_nonce,
        "issued api token"
    );

    Ok(axum::Json(record).into_response())
}
