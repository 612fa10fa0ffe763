//! Request signing for the nonce and token endpoints.
//!
//! Clients hold an out-of-band `(key_id, secret)` pair and sign each
//! request with a two-step HMAC: the timestamp is signed with the secret,
//! and the resulting key signs the request body. Credentials travel as
//! `timestamp|key_id` so the server can re-derive both steps. Signing
//! covers every payload field except the signature fields themselves,
//! serialized with sorted keys so field order cannot break verification.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::crypto::constant_time_eq;
use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Payload fields excluded from signing.
const SIGNATURE_FIELDS: [&str; 2] = ["api_signature", "api_credentials"];

/// Parsed `timestamp|key_id` credentials.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub timestamp: i64,
    pub key_id: String,
}

impl ApiCredentials {
    pub fn parse(raw: &str) -> Option<Self> {
        let (timestamp, key_id) = raw.split_once('|')?;
        let timestamp = timestamp.parse().ok()?;
        if key_id.is_empty() {
            return None;
        }
        Some(Self {
            timestamp,
            key_id: key_id.to_string(),
        })
    }

    /// Timestamps are accepted for one minute, stretched to an hour in
    /// dev mode. Future timestamps are never accepted.
    pub fn timestamp_valid(&self, now: i64, dev_mode: bool) -> bool {
        let validity = if dev_mode { 3600 } else { 60 };
        self.timestamp <= now && self.timestamp >= now - validity
    }
}

/// Serializes a JSON value with object keys sorted at every depth.
///
/// Array order is preserved; only object key order is normalized. The
/// output is what gets signed, so both sides must agree on it exactly.
pub fn canonical_json(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out)?;
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        other => out.push_str(&serde_json::to_string(other)?),
    }
    Ok(())
}

/// Computes the hex signature for a payload.
pub fn build_signature(
    key_id: &str,
    secret: &str,
    timestamp: i64,
    payload: &Map<String, Value>,
) -> Result<String> {
    let mut signed = payload.clone();
    for field in SIGNATURE_FIELDS {
        signed.remove(field);
    }

    let json = canonical_json(&Value::Object(signed))?;
    let message = BASE64.encode(format!("{key_id}{json}"));

    let mut time_mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("invalid signing key".into()))?;
    time_mac.update(timestamp.to_string().as_bytes());
    let time_key = time_mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&time_key)
        .map_err(|_| AppError::Internal("invalid signing key".into()))?;
    mac.update(message.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a received signature in constant time.
pub fn verify_signature(
    credentials: &ApiCredentials,
    secret: &str,
    payload: &Map<String, Value>,
    signature: &str,
) -> Result<bool> {
    let expected = build_signature(
        &credentials.key_id,
        secret,
        credentials.timestamp,
        payload,
    )?;
    Ok(constant_time_eq(&expected, signature))
}
