use chrono::Utc;
use rusqlite::{Connection, params, types::Value};

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    CREDENTIAL_COLS, LICENSE_COLS, NONCE_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
        }
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    fn execute(self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Licenses ============

/// Insert a fully built license record. Key material and defaults are the
/// caller's responsibility.
pub fn create_license(conn: &Connection, license: &License) -> Result<()> {
    conn.execute(
        "INSERT INTO licenses (id, license_key, max_allowed_domains, allowed_domains, status,
             owner_name, email, company_name, txn_id, date_created, date_renewed, date_expiry,
             package_slug, package_type, hmac_key, crypto_key, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            &license.id,
            &license.license_key,
            license.max_allowed_domains,
            serde_json::to_string(&license.allowed_domains)?,
            license.status.as_ref(),
            &license.owner_name,
            &license.email,
            &license.company_name,
            &license.txn_id,
            &license.date_created,
            &license.date_renewed,
            &license.date_expiry,
            &license.package_slug,
            license.package_type.as_ref(),
            &license.hmac_key,
            &license.crypto_key,
            serde_json::to_string(&license.data)?,
        ],
    )?;
    Ok(())
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

pub fn get_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE license_key = ?1", LICENSE_COLS),
        &[&license_key],
    )
}

pub fn update_license(conn: &Connection, id: &str, changes: &LicenseUpdate) -> Result<bool> {
    let allowed_domains = changes
        .allowed_domains
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let data = changes.data.as_ref().map(serde_json::to_string).transpose()?;

    UpdateBuilder::new("licenses", id)
        .set_opt("license_key", changes.license_key.clone())
        .set_opt("max_allowed_domains", changes.max_allowed_domains)
        .set_opt("allowed_domains", allowed_domains)
        .set_opt("status", changes.status.map(|s| s.as_ref().to_string()))
        .set_opt("owner_name", changes.owner_name.clone())
        .set_opt("email", changes.email.clone())
        .set_opt("company_name", changes.company_name.clone())
        .set_opt("txn_id", changes.txn_id.clone())
        .set_opt("date_created", changes.date_created.clone())
        .set_opt("date_renewed", changes.date_renewed.clone())
        .set_opt("date_expiry", changes.date_expiry.clone())
        .set_opt("package_slug", changes.package_slug.clone())
        .set_opt(
            "package_type",
            changes.package_type.map(|t| t.as_ref().to_string()),
        )
        .set_opt("data", data)
        .execute(conn)
}

pub fn delete_license(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM licenses WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Run a browse query against a pre-validated WHERE clause. The clause and
/// parameters come from the license query builder; raw caller input never
/// reaches this function.
pub fn browse_licenses(
    conn: &Connection,
    where_sql: &str,
    query_params: Vec<Value>,
) -> Result<Vec<License>> {
    use super::from_row::FromRow;

    let sql = format!("SELECT {} FROM licenses {}", LICENSE_COLS, where_sql);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(query_params), |row| {
        License::from_row(row)
    })?;
    let mut items = Vec::new();
    for item in rows {
        items.push(item?);
    }
    Ok(items)
}

/// Flip every license past its expiry date to `expired`, except blocked
/// ones and those with no expiry date set. Returns the number of rows
/// changed.
pub fn expire_licenses(conn: &Connection, today: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE licenses SET status = 'expired'
         WHERE date_expiry <= ?1
         AND status != 'blocked'
         AND date_expiry != '0000-00-00'",
        params![today],
    )?;
    Ok(affected)
}

// ============ Nonces ============

pub fn store_nonce(conn: &Connection, nonce: &Nonce) -> Result<()> {
    conn.execute(
        "INSERT INTO nonces (nonce, true_nonce, expiry, data) VALUES (?1, ?2, ?3, ?4)",
        params![
            &nonce.nonce,
            nonce.true_nonce,
            nonce.expiry,
            serde_json::to_string(&nonce.data)?,
        ],
    )?;
    Ok(())
}

pub fn get_nonce(conn: &Connection, value: &str) -> Result<Option<Nonce>> {
    query_one(
        conn,
        &format!("SELECT {} FROM nonces WHERE nonce = ?1", NONCE_COLS),
        &[&value],
    )
}

pub fn delete_nonce(conn: &Connection, value: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM nonces WHERE nonce = ?1", params![value])?;
    Ok(affected > 0)
}

/// Delete nonces whose expiry passed before `cutoff`, keeping records whose
/// data carries a truthy `permanent` flag. Rows with unparseable data are
/// removed regardless of the flag.
pub fn cleanup_nonces(conn: &Connection, cutoff: i64) -> Result<usize> {
    let affected = conn.execute(
        "DELETE FROM nonces
         WHERE expiry < ?1
         AND (
             json_valid(data) = 0
             OR (
                 json_valid(data) = 1
                 AND (
                     json_extract(data, '$.permanent') IS NULL
                     OR json_extract(data, '$.permanent') IN (0, '0', 'false')
                 )
             )
         )",
        params![cutoff],
    )?;
    Ok(affected)
}

// ============ API credentials ============

pub fn create_credential(
    conn: &Connection,
    key_id: &str,
    secret: &str,
    access: &[ApiAccess],
) -> Result<ApiCredential> {
    let created_at = now();
    conn.execute(
        "INSERT INTO api_credentials (key_id, secret, access, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![key_id, secret, serde_json::to_string(access)?, created_at],
    )?;

    Ok(ApiCredential {
        key_id: key_id.to_string(),
        secret: secret.to_string(),
        access: access.to_vec(),
        created_at,
    })
}

pub fn get_credential(conn: &Connection, key_id: &str) -> Result<Option<ApiCredential>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM api_credentials WHERE key_id = ?1",
            CREDENTIAL_COLS
        ),
        &[&key_id],
    )
}

pub fn list_credentials(conn: &Connection) -> Result<Vec<ApiCredential>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM api_credentials ORDER BY created_at DESC",
            CREDENTIAL_COLS
        ),
        &[],
    )
}

pub fn delete_credential(conn: &Connection, key_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM api_credentials WHERE key_id = ?1",
        params![key_id],
    )?;
    Ok(affected > 0)
}

// ============ Sync locks ============

/// Try to take the per-slug sync lock without blocking. A single statement
/// either inserts the lock row or refreshes it when the previous holder's
/// deadline has passed, so two workers cannot both win.
pub fn try_acquire_lock(conn: &Connection, slug: &str, now: i64, ttl: i64) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO sync_locks (slug, expires_at) VALUES (?1, ?2)
         ON CONFLICT(slug) DO UPDATE SET expires_at = excluded.expires_at
         WHERE sync_locks.expires_at < ?3",
        params![slug, now + ttl, now],
    )?;
    Ok(affected > 0)
}

pub fn release_lock(conn: &Connection, slug: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM sync_locks WHERE slug = ?1", params![slug])?;
    Ok(affected > 0)
}
