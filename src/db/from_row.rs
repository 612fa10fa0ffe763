//! Row -> model mapping helpers.
//!
//! Each model implements [`FromRow`] against a fixed column list so that
//! every query selects the same columns in the same order. JSON columns
//! (domain lists, data maps, access lists) are decoded here; a corrupt
//! column surfaces as a conversion error rather than a panic.

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{Connection, Row, ToSql};
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::models::{ApiCredential, License, Nonce};

pub const LICENSE_COLS: &str = "id, license_key, max_allowed_domains, allowed_domains, status, \
     owner_name, email, company_name, txn_id, date_created, date_renewed, date_expiry, \
     package_slug, package_type, hmac_key, crypto_key, data";

pub const NONCE_COLS: &str = "nonce, true_nonce, expiry, data";

pub const CREDENTIAL_COLS: &str = "key_id, secret, access, created_at";

pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

fn json_col<T: DeserializeOwned>(idx: usize, raw: String) -> rusqlite::Result<T> {
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn enum_col<T: FromStr>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl FromRow for License {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            license_key: row.get(1)?,
            max_allowed_domains: row.get(2)?,
            allowed_domains: json_col(3, row.get(3)?)?,
            status: enum_col(4, row.get(4)?)?,
            owner_name: row.get(5)?,
            email: row.get(6)?,
            company_name: row.get(7)?,
            txn_id: row.get(8)?,
            date_created: row.get(9)?,
            date_renewed: row.get(10)?,
            date_expiry: row.get(11)?,
            package_slug: row.get(12)?,
            package_type: enum_col(13, row.get(13)?)?,
            hmac_key: row.get(14)?,
            crypto_key: row.get(15)?,
            data: json_col(16, row.get(16)?)?,
        })
    }
}

impl FromRow for Nonce {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Nonce {
            nonce: row.get(0)?,
            true_nonce: row.get(1)?,
            expiry: row.get(2)?,
            data: json_col(3, row.get(3)?)?,
        })
    }
}

impl FromRow for ApiCredential {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ApiCredential {
            key_id: row.get(0)?,
            secret: row.get(1)?,
            access: json_col(2, row.get(2)?)?,
            created_at: row.get(3)?,
        })
    }
}

pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(T::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| T::from_row(row))?;
    let mut items = Vec::new();
    for item in rows {
        items.push(item?);
    }
    Ok(items)
}
