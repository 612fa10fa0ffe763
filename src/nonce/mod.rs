//! One-time nonces and reusable expiring tokens.
//!
//! Both share one table and one lifecycle: a value is minted from the
//! server salt, stored with an expiry, and later fetched by value. A true
//! nonce is deleted on first fetch whatever the outcome; a token survives
//! until it expires. Expired values are cleared on read, so validation
//! never trusts the table contents alone.

pub mod signature;

use chrono::Utc;
use md5::{Digest, Md5};
use rand::RngCore;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::db::queries;
use crate::error::Result;
use crate::models::{Nonce, truthy};

/// Seconds before a freshly minted nonce expires unless overridden.
pub const DEFAULT_EXPIRY_LENGTH: i64 = 30;

/// Decides what an expired value fetches as.
///
/// The stock behavior clears the value, which makes validation fail and
/// triggers deletion. A deployment can substitute the original value to
/// grant a grace period, or a marker value for auditing.
pub trait ExpiryHook: Send + Sync {
    fn on_expired(&self, nonce: &Nonce) -> Option<String>;
}

/// Default hook: expired values fetch as nothing.
pub struct ClearOnExpiry;

impl ExpiryHook for ClearOnExpiry {
    fn on_expired(&self, _nonce: &Nonce) -> Option<String> {
        None
    }
}

/// Creation knobs for [`create_nonce`].
pub struct NonceOptions {
    pub true_nonce: bool,
    pub expiry_length: i64,
    pub data: Map<String, Value>,
    pub store: bool,
}

impl Default for NonceOptions {
    fn default() -> Self {
        Self {
            true_nonce: true,
            expiry_length: DEFAULT_EXPIRY_LENGTH,
            data: Map::new(),
            store: true,
        }
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn int_flag(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Bool(true)) => 1,
        _ => 0,
    }
}

/// Mints a new value from the salt and fresh randomness.
fn generate_value(salt: &str) -> String {
    let mut bytes = [0u8; 100];
    rand::thread_rng().fill_bytes(&mut bytes);
    let id = hex::encode(Md5::digest(bytes));
    let micros = Utc::now().timestamp_micros();
    hex::encode(Md5::digest(format!("{salt}{id}{micros}")))
}

/// Create and (normally) store a nonce.
///
/// A truthy `permanent` flag in the data pins the record with expiry 0.
/// A `test` flag of 1 skips storage entirely, so clients can exercise the
/// endpoint without leaving records behind.
pub fn create_nonce(conn: &Connection, salt: &str, opts: NonceOptions) -> Result<Nonce> {
    let mut store = opts.store;

    if int_flag(opts.data.get("test")) == 1 {
        store = false;
    }

    let permanent = opts.data.get("permanent").is_some_and(truthy);
    let expiry = if permanent {
        0
    } else {
        now() + opts.expiry_length.abs()
    };

    let nonce = Nonce {
        nonce: generate_value(salt),
        true_nonce: opts.true_nonce,
        expiry,
        data: opts.data,
    };

    if store {
        queries::store_nonce(conn, &nonce)?;
    }

    Ok(nonce)
}

/// Fetch a value, applying the expiry and one-time-use rules.
///
/// Returns the record with its effective value, or `None` when no record
/// exists or the value expired and the hook cleared it. True nonces and
/// records whose value was cleared are deleted before returning.
pub fn fetch_nonce(
    conn: &Connection,
    value: &str,
    hook: &dyn ExpiryHook,
) -> Result<Option<Nonce>> {
    let Some(mut nonce) = queries::get_nonce(conn, value)? else {
        return Ok(None);
    };

    let mut current = Some(nonce.nonce.clone());

    if nonce.is_expired(now()) {
        current = hook.on_expired(&nonce);
    }

    if nonce.true_nonce || current.is_none() {
        queries::delete_nonce(conn, value)?;
    }

    Ok(current.map(|v| {
        nonce.nonce = v;
        nonce
    }))
}

/// Check a value. True nonces are consumed by this call whether or not
/// they validate.
pub fn validate_nonce(conn: &Connection, value: &str, hook: &dyn ExpiryHook) -> Result<bool> {
    if value.is_empty() {
        return Ok(false);
    }
    match fetch_nonce(conn, value, hook)? {
        Some(nonce) => Ok(nonce.nonce == value),
        None => Ok(false),
    }
}

/// Expiry timestamp for a stored value, 0 when absent.
pub fn get_nonce_expiry(conn: &Connection, value: &str) -> Result<i64> {
    Ok(queries::get_nonce(conn, value)?.map_or(0, |n| n.expiry))
}

/// Purge expired records past the grace period. Permanent records are
/// kept; records with unreadable data are not.
pub fn cleanup(conn: &Connection) -> Result<usize> {
    queries::cleanup_nonces(conn, now() - DEFAULT_EXPIRY_LENGTH)
}
