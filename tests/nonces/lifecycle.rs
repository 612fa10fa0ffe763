use chrono::Utc;
use serde_json::{Map, json};

use depot::db::queries;
use depot::models::Nonce;
use depot::nonce::{self, ClearOnExpiry, DEFAULT_EXPIRY_LENGTH, NonceOptions};

use crate::common::test_conn;

const SALT: &str = "test-salt";

fn store(conn: &rusqlite::Connection, value: &str, true_nonce: bool, expiry: i64) {
    queries::store_nonce(
        conn,
        &Nonce {
            nonce: value.to_string(),
            true_nonce,
            expiry,
            data: Map::new(),
        },
    )
    .unwrap();
}

#[test]
fn true_nonce_validates_exactly_once() {
    let conn = test_conn();

    let created = nonce::create_nonce(&conn, SALT, NonceOptions::default()).unwrap();

    assert!(nonce::validate_nonce(&conn, &created.nonce, &ClearOnExpiry).unwrap());
    assert!(!nonce::validate_nonce(&conn, &created.nonce, &ClearOnExpiry).unwrap());
}

#[test]
fn token_is_reusable_until_expiry() {
    let conn = test_conn();

    let created = nonce::create_nonce(
        &conn,
        SALT,
        NonceOptions {
            true_nonce: false,
            expiry_length: 600,
            ..Default::default()
        },
    )
    .unwrap();

    assert!(nonce::validate_nonce(&conn, &created.nonce, &ClearOnExpiry).unwrap());
    assert!(nonce::validate_nonce(&conn, &created.nonce, &ClearOnExpiry).unwrap());
}

#[test]
fn expired_value_is_cleared_and_deleted() {
    let conn = test_conn();
    let past = Utc::now().timestamp() - 100;

    store(&conn, "expired-token", false, past);

    assert!(!nonce::validate_nonce(&conn, "expired-token", &ClearOnExpiry).unwrap());
    // The expired-read deletes the record.
    assert!(queries::get_nonce(&conn, "expired-token").unwrap().is_none());
}

#[test]
fn permanent_records_never_expire() {
    let conn = test_conn();

    let mut data = Map::new();
    data.insert("permanent".to_string(), json!(true));

    let created = nonce::create_nonce(
        &conn,
        SALT,
        NonceOptions {
            true_nonce: false,
            data,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(created.expiry, 0);
    assert!(nonce::validate_nonce(&conn, &created.nonce, &ClearOnExpiry).unwrap());
    assert!(nonce::validate_nonce(&conn, &created.nonce, &ClearOnExpiry).unwrap());

    nonce::cleanup(&conn).unwrap();
    assert!(queries::get_nonce(&conn, &created.nonce).unwrap().is_some());
}

#[test]
fn cleanup_honors_the_grace_window() {
    let conn = test_conn();
    let now = Utc::now().timestamp();

    // Expired, but still inside the grace window.
    store(&conn, "fresh-expired", false, now - DEFAULT_EXPIRY_LENGTH / 2);
    // Expired past the grace window.
    store(&conn, "stale-expired", false, now - DEFAULT_EXPIRY_LENGTH * 3);

    nonce::cleanup(&conn).unwrap();

    assert!(queries::get_nonce(&conn, "fresh-expired").unwrap().is_some());
    assert!(queries::get_nonce(&conn, "stale-expired").unwrap().is_none());
}

#[test]
fn test_flag_skips_storage() {
    let conn = test_conn();

    let mut data = Map::new();
    data.insert("test".to_string(), json!(1));

    let created = nonce::create_nonce(
        &conn,
        SALT,
        NonceOptions {
            data,
            ..Default::default()
        },
    )
    .unwrap();

    assert!(!created.nonce.is_empty());
    assert!(queries::get_nonce(&conn, &created.nonce).unwrap().is_none());
}

#[test]
fn expiry_lookup_reports_stored_and_missing_values() {
    let conn = test_conn();
    let future = Utc::now().timestamp() + 600;

    store(&conn, "lookup-token", false, future);

    assert_eq!(
        nonce::get_nonce_expiry(&conn, "lookup-token").unwrap(),
        future
    );
    assert_eq!(nonce::get_nonce_expiry(&conn, "no-such-token").unwrap(), 0);
}

#[test]
fn values_are_md5_shaped_and_unique() {
    let conn = test_conn();

    let a = nonce::create_nonce(&conn, SALT, NonceOptions::default()).unwrap();
    let b = nonce::create_nonce(&conn, SALT, NonceOptions::default()).unwrap();

    assert_eq!(a.nonce.len(), 32);
    assert!(a.nonce.chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(a.nonce, b.nonce);
}
