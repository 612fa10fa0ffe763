//! License record lifecycle: CRUD, the browse query language, the status
//! state machine, and per-record signatures.
//!
//! Validation failures are data, not errors: every write operation returns
//! either the affected record or a field -> message map describing what was
//! rejected. Infrastructure failures (storage, I/O) are the only thing that
//! propagates as an error.

pub mod query;
pub mod signature;

use chrono::{NaiveDate, Utc};
use md5::{Digest, Md5};
use rusqlite::Connection;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::cache::FileCache;
use crate::crypto::random_hex_key;
use crate::db::queries;
use crate::error::Result;
use crate::models::{
    License, LicensePayload, LicenseStatus, LicenseUpdate, PackageType, UNSET_DATE,
};

use query::BrowseQuery;

/// Field -> error message map returned on validation failure.
pub type FieldErrors = Map<String, Value>;

/// Outcome of an engine operation: the record, or why it was rejected.
pub type Validated<T> = std::result::Result<T, FieldErrors>;

/// Seconds a cached license read stays fresh. Writes invalidate eagerly,
/// so this only bounds staleness across processes.
const READ_CACHE_TTL: i64 = 3600;

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn read_cache_key(field: &str, value: &str) -> String {
    let digest = Md5::digest(format!("{field}|{value}"));
    format!("license-{}", hex::encode(digest))
}

pub(crate) fn clear_read_cache(cache: &FileCache, license: &License) -> Result<()> {
    cache.clear(&read_cache_key("id", &license.id))?;
    cache.clear(&read_cache_key("license_key", &license.license_key))?;
    Ok(())
}

fn error(key: &str, message: &str) -> FieldErrors {
    let mut errors = Map::new();
    errors.insert(key.to_string(), json!(message));
    errors
}

/// Browse licenses with a pre-validated query.
pub fn browse_licenses(conn: &Connection, browse: &BrowseQuery) -> Result<Vec<License>> {
    let (where_sql, params) = browse.to_sql();
    queries::browse_licenses(conn, &where_sql, params)
}

/// Read a single license by `license_key` (preferred) or `id`.
///
/// Reads are cached under a hash of the lookup pair; `force` bypasses and
/// refreshes the cache. A missing record is a validation failure
/// (`license_not_found`), not an error.
pub fn read_license(
    conn: &Connection,
    cache: &FileCache,
    payload: &LicensePayload,
    force: bool,
) -> Result<Validated<License>> {
    let (field, value) = match (&payload.license_key, &payload.id) {
        (Some(key), _) if !key.is_empty() => ("license_key", key.clone()),
        (_, Some(id)) if !id.is_empty() => ("id", id.clone()),
        _ => {
            return Ok(Err(error(
                "missing_license_key",
                "A license key is required to identify the license.",
            )));
        }
    };

    let cache_key = read_cache_key(field, &value);

    if !force {
        if let Some(license) = cache.get::<License>(&cache_key)? {
            // A cached record whose expiry elapsed since it was written
            // must not read as live; fall through and refresh instead.
            if lazy_expired_status(license.status, &license.date_expiry) == license.status {
                return Ok(Ok(license));
            }
        }
    }

    let found = match field {
        "license_key" => queries::get_license_by_key(conn, &value)?,
        _ => queries::get_license_by_id(conn, &value)?,
    };

    match found {
        Some(license) => {
            let license = apply_lazy_expiry(conn, cache, license)?;
            cache.set(&cache_key, &license, READ_CACHE_TTL)?;
            Ok(Ok(license))
        }
        None => Ok(Err(error(
            "license_not_found",
            "The license cannot be found.",
        ))),
    }
}

/// Create a license. Structural defaults are filled first (generated key,
/// today's creation date, `pending` status), then the payload is validated
/// in full; fresh signing keys are generated on success.
pub fn add_license(
    conn: &Connection,
    cache: &FileCache,
    payload: &LicensePayload,
) -> Result<Validated<License>> {
    let mut payload = payload.clone();
    payload.id = None;

    if payload.license_key.as_deref().unwrap_or("").is_empty() {
        payload.license_key = Some(random_hex_key());
    }

    if payload.date_created.as_deref().unwrap_or("").is_empty() {
        payload.date_created = Some(today());
    }

    if payload.status.as_deref().unwrap_or("").is_empty() {
        payload.status = Some("pending".to_string());
    }

    let allowed_domains = sanitize_domains(payload.allowed_domains.as_deref().unwrap_or(&[]));

    let errors = validate(conn, &payload, false)?;
    if !errors.is_empty() {
        return Ok(Err(errors));
    }

    // Unwraps below are safe: validation rejects missing required fields.
    let license_key = payload.license_key.clone().unwrap_or_default();
    let status = payload
        .status
        .as_deref()
        .unwrap_or_default()
        .parse::<LicenseStatus>()
        .unwrap_or(LicenseStatus::Pending);
    let package_type = payload
        .package_type
        .as_deref()
        .unwrap_or_default()
        .parse::<PackageType>()
        .unwrap_or(PackageType::Generic);

    let license = License {
        id: Uuid::new_v4().to_string(),
        license_key: license_key.clone(),
        max_allowed_domains: payload.max_allowed_domains.unwrap_or(1),
        allowed_domains,
        status: lazy_expired_status(status, payload.date_expiry.as_deref().unwrap_or("")),
        owner_name: payload.owner_name.clone().unwrap_or_default(),
        email: payload.email.clone().unwrap_or_default(),
        company_name: payload.company_name.clone().unwrap_or_default(),
        txn_id: payload.txn_id.clone().unwrap_or_default(),
        date_created: payload.date_created.clone().unwrap_or_default(),
        date_renewed: normalize_date(payload.date_renewed.as_deref()),
        date_expiry: normalize_date(payload.date_expiry.as_deref()),
        package_slug: payload.package_slug.clone().unwrap_or_default(),
        package_type,
        hmac_key: random_hex_key(),
        crypto_key: random_hex_key(),
        data: payload.data.clone().unwrap_or_default(),
    };

    queries::create_license(conn, &license)?;
    clear_read_cache(cache, &license)?;

    let read_back = LicensePayload {
        license_key: Some(license_key),
        ..Default::default()
    };

    read_license(conn, cache, &read_back, true)
}

/// Update a license identified by `id` or `license_key`. Only supplied
/// fields are validated and written; both cache entries for the record are
/// invalidated.
pub fn edit_license(
    conn: &Connection,
    cache: &FileCache,
    payload: &LicensePayload,
) -> Result<Validated<License>> {
    let errors = validate(conn, payload, true)?;
    if !errors.is_empty() {
        return Ok(Err(errors));
    }

    let original = match read_license(conn, cache, payload, true)? {
        Ok(license) => license,
        Err(errors) => return Ok(Err(errors)),
    };

    let mut changes = LicenseUpdate {
        max_allowed_domains: payload.max_allowed_domains,
        owner_name: payload.owner_name.clone(),
        email: payload.email.clone(),
        company_name: payload.company_name.clone(),
        txn_id: payload.txn_id.clone(),
        date_created: payload.date_created.clone(),
        date_renewed: payload.date_renewed.clone().map(|d| normalize_date(Some(&d))),
        date_expiry: payload.date_expiry.clone().map(|d| normalize_date(Some(&d))),
        package_slug: payload.package_slug.clone(),
        data: payload.data.clone(),
        ..Default::default()
    };

    if let Some(domains) = &payload.allowed_domains {
        changes.allowed_domains = Some(sanitize_domains(domains));
    }

    if let Some(status) = &payload.status {
        changes.status = status.parse::<LicenseStatus>().ok();
    }

    if let Some(package_type) = &payload.package_type {
        changes.package_type = package_type.parse::<PackageType>().ok();
    }

    // Lazy expiry on write: an edit that leaves an elapsed expiry date in
    // place lands as `expired` unless the record is blocked.
    let effective_status = changes.status.unwrap_or(original.status);
    let effective_expiry = changes
        .date_expiry
        .clone()
        .unwrap_or_else(|| original.date_expiry.clone());
    let final_status = lazy_expired_status(effective_status, &effective_expiry);
    if final_status != effective_status || changes.status.is_some() {
        changes.status = Some(final_status);
    }

    queries::update_license(conn, &original.id, &changes)?;
    clear_read_cache(cache, &original)?;

    let read_back = LicensePayload {
        id: Some(original.id.clone()),
        ..Default::default()
    };

    read_license(conn, cache, &read_back, true)
}

/// Delete a license identified by `id` or `license_key`. Returns the
/// deleted record.
pub fn delete_license(
    conn: &Connection,
    cache: &FileCache,
    payload: &LicensePayload,
) -> Result<Validated<License>> {
    let license = match read_license(conn, cache, payload, true)? {
        Ok(license) => license,
        Err(errors) => return Ok(Err(errors)),
    };

    queries::delete_license(conn, &license.id)?;
    clear_read_cache(cache, &license)?;

    Ok(Ok(license))
}

/// The periodic expiry sweep: every license with an elapsed expiry date
/// transitions to `expired`, except blocked ones. Idempotent.
pub fn switch_expired_licenses(conn: &Connection) -> Result<usize> {
    queries::expire_licenses(conn, &today())
}

/// Read a license by key and require it to belong to the given package.
/// A key that exists but points at another package reads as absent.
pub fn verify_license_exists(
    conn: &Connection,
    cache: &FileCache,
    slug: &str,
    package_type: PackageType,
    license_key: &str,
) -> Result<Option<License>> {
    if license_key.is_empty() {
        return Ok(None);
    }

    let payload = LicensePayload {
        license_key: Some(license_key.to_string()),
        ..Default::default()
    };

    match read_license(conn, cache, &payload, false)? {
        Ok(license)
            if license.package_slug == slug && license.package_type == package_type =>
        {
            Ok(Some(license))
        }
        _ => Ok(None),
    }
}

// Lazy counterpart of the sweep, applied on read so a stale cache or a
// missed sweep never serves a past-expiry license as anything but expired.
fn apply_lazy_expiry(conn: &Connection, cache: &FileCache, license: License) -> Result<License> {
    let expired = lazy_expired_status(license.status, &license.date_expiry);

    if expired == license.status {
        return Ok(license);
    }

    let changes = LicenseUpdate {
        status: Some(expired),
        ..Default::default()
    };
    queries::update_license(conn, &license.id, &changes)?;
    clear_read_cache(cache, &license)?;

    Ok(License {
        status: expired,
        ..license
    })
}

fn lazy_expired_status(status: LicenseStatus, date_expiry: &str) -> LicenseStatus {
    if status == LicenseStatus::Blocked || date_expiry.is_empty() || date_expiry == UNSET_DATE {
        return status;
    }

    match NaiveDate::parse_from_str(date_expiry, "%Y-%m-%d") {
        Ok(expiry) if expiry <= Utc::now().date_naive() => LicenseStatus::Expired,
        _ => status,
    }
}

fn normalize_date(value: Option<&str>) -> String {
    match value {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => UNSET_DATE.to_string(),
    }
}

// Entries must be scalars longer than 5 characters; anything else is
// dropped rather than rejected.
fn sanitize_domains(raw: &[Value]) -> Vec<String> {
    raw.iter()
        .filter_map(|value| match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
        .filter(|s| s.len() > 5)
        .collect()
}

fn is_valid_date(value: &str) -> bool {
    value.is_empty()
        || value == UNSET_DATE
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

fn is_valid_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn is_valid_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Validates a payload. In partial mode only supplied fields are checked,
/// plus the presence of an identifier that matches an existing record.
fn validate(conn: &Connection, payload: &LicensePayload, partial: bool) -> Result<FieldErrors> {
    let mut errors = Map::new();

    if partial {
        match (&payload.license_key, &payload.id) {
            (Some(key), _) if !key.is_empty() => {
                if queries::get_license_by_key(conn, key)?.is_none() {
                    errors.insert(
                        "license_not_found".to_string(),
                        json!("The license cannot be found."),
                    );
                }
            }
            (_, Some(id)) if !id.is_empty() => {
                if queries::get_license_by_id(conn, id)?.is_none() {
                    errors.insert(
                        "license_not_found".to_string(),
                        json!("The license cannot be found."),
                    );
                }
            }
            _ => {
                errors.insert(
                    "missing_license_key".to_string(),
                    json!("A license key is required to identify the license."),
                );
            }
        }
    } else {
        match &payload.license_key {
            Some(key) if !key.is_empty() => {
                if queries::get_license_by_key(conn, key)?.is_some() {
                    errors.insert(
                        "license_key_exists".to_string(),
                        json!(
                            "A value already exists for the given license key. \
                             Each key must be unique."
                        ),
                    );
                }
            }
            _ => {
                errors.insert(
                    "invalid_license_key".to_string(),
                    json!("The license key is required and must be a string."),
                );
            }
        }
    }

    if let Some(max) = payload.max_allowed_domains {
        if max < 1 {
            errors.insert(
                "max_allowed_domains_missing".to_string(),
                json!("The number of allowed domains is required and must be at least 1."),
            );
        }
    } else if !partial {
        errors.insert(
            "max_allowed_domains_missing".to_string(),
            json!("The number of allowed domains is required and must be at least 1."),
        );
    }

    if !(partial && payload.status.is_none()) {
        let status = payload.status.as_deref().unwrap_or("");
        if status.parse::<LicenseStatus>().is_err() {
            errors.insert(
                "invalid_status".to_string(),
                json!("The license status is invalid."),
            );
        }
    }

    if !(partial && payload.email.is_none())
        && !is_valid_email(payload.email.as_deref().unwrap_or(""))
    {
        errors.insert(
            "invalid_email".to_string(),
            json!("The registered email is required and must be a valid email address."),
        );
    }

    if !(partial && payload.date_created.is_none()) {
        let date = payload.date_created.as_deref().unwrap_or("");
        if date.is_empty() || NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            errors.insert(
                "invalid_date_created".to_string(),
                json!(
                    "The creation date is required and must follow the following \
                     format: YYYY-MM-DD"
                ),
            );
        }
    }

    if let Some(date) = &payload.date_renewed {
        if !is_valid_date(date) {
            errors.insert(
                "invalid_date_renewed".to_string(),
                json!("The renewal date must follow the following format: YYYY-MM-DD"),
            );
        }
    }

    if let Some(date) = &payload.date_expiry {
        if !is_valid_date(date) {
            errors.insert(
                "invalid_date_expiry".to_string(),
                json!("The expiry date must follow the following format: YYYY-MM-DD"),
            );
        }
    }

    if !(partial && payload.package_slug.is_none())
        && !is_valid_slug(payload.package_slug.as_deref().unwrap_or(""))
    {
        errors.insert(
            "invalid_package_slug".to_string(),
            json!(
                "The package slug is required and must contain only alphanumeric \
                 characters or dashes."
            ),
        );
    }

    if !(partial && payload.package_type.is_none()) {
        let package_type = payload.package_type.as_deref().unwrap_or("");
        if package_type.parse::<PackageType>().is_err() {
            errors.insert(
                "invalid_package_type".to_string(),
                json!("The package type is required and must be \"generic\", \"plugin\" or \"theme\"."),
            );
        }
    }

    if let Some(domains) = &payload.allowed_domains {
        let invalid = domains.iter().any(|v| v.is_array() || v.is_object());
        if invalid {
            errors.insert(
                "invalid_allowed_domains".to_string(),
                json!(
                    "All allowed domains values must be scalar with a string-equivalent \
                     length superior to 5 characters."
                ),
            );
        }
    }

    Ok(errors)
}
