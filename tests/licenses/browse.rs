use serde_json::json;
use tempfile::TempDir;

use depot::license::{self, query::BrowseQuery};
use depot::models::LicensePayload;

use crate::common::{test_cache, test_conn};

fn seed(conn: &rusqlite::Connection, cache: &depot::cache::FileCache, key: &str, status: &str) {
    let payload = LicensePayload {
        license_key: Some(key.to_string()),
        max_allowed_domains: Some(2),
        email: Some("owner@example.com".to_string()),
        package_slug: Some("acme-plugin".to_string()),
        package_type: Some("plugin".to_string()),
        status: Some(status.to_string()),
        ..Default::default()
    };
    license::add_license(conn, cache, &payload).unwrap().unwrap();
}

#[test]
fn validation_happens_before_any_storage_access() {
    // Parsing alone must reject bad queries; no connection involved.
    assert!(BrowseQuery::parse(&json!({ "unknown_key": 1 })).is_err());
    assert!(
        BrowseQuery::parse(&json!({
            "criteria": [{ "field": "no_such_field", "operator": "=", "value": "x" }]
        }))
        .is_err()
    );
    assert!(
        BrowseQuery::parse(&json!({
            "criteria": [{ "field": "status", "operator": "RESEMBLES", "value": "x" }]
        }))
        .is_err()
    );
    assert!(
        BrowseQuery::parse(&json!({
            "criteria": [{ "field": "date_created", "operator": "BETWEEN", "value": ["a"] }]
        }))
        .is_err()
    );
    assert!(
        BrowseQuery::parse(&json!({
            "criteria": [{ "field": "status", "operator": "IN", "value": [] }]
        }))
        .is_err()
    );
    assert!(BrowseQuery::parse(&json!({ "order_by": "no_such_field" })).is_err());
}

#[test]
fn filters_by_single_criterion() {
    let dir = TempDir::new().unwrap();
    let conn = test_conn();
    let cache = test_cache(dir.path());

    seed(&conn, &cache, "browse-key-pending-1", "pending");
    seed(&conn, &cache, "browse-key-pending-2", "pending");
    seed(&conn, &cache, "browse-key-active-01", "activated");

    let query = BrowseQuery::parse(&json!({
        "criteria": [{ "field": "status", "operator": "=", "value": "pending" }]
    }))
    .unwrap();

    let found = license::browse_licenses(&conn, &query).unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|l| l.license_key.starts_with("browse-key-pending")));
}

#[test]
fn or_relationship_widens_the_match() {
    let dir = TempDir::new().unwrap();
    let conn = test_conn();
    let cache = test_cache(dir.path());

    seed(&conn, &cache, "browse-or-key-0001", "pending");
    seed(&conn, &cache, "browse-or-key-0002", "activated");
    seed(&conn, &cache, "browse-or-key-0003", "blocked");

    let query = BrowseQuery::parse(&json!({
        "relationship": "OR",
        "criteria": [
            { "field": "status", "operator": "=", "value": "pending" },
            { "field": "status", "operator": "=", "value": "blocked" }
        ]
    }))
    .unwrap();

    let found = license::browse_licenses(&conn, &query).unwrap();
    assert_eq!(found.len(), 2);
}

#[test]
fn in_operator_and_limit() {
    let dir = TempDir::new().unwrap();
    let conn = test_conn();
    let cache = test_cache(dir.path());

    seed(&conn, &cache, "browse-in-key-0001", "pending");
    seed(&conn, &cache, "browse-in-key-0002", "activated");
    seed(&conn, &cache, "browse-in-key-0003", "on-hold");

    let query = BrowseQuery::parse(&json!({
        "limit": 2,
        "order_by": "license_key",
        "criteria": [
            { "field": "status", "operator": "IN", "value": ["pending", "activated", "on-hold"] }
        ]
    }))
    .unwrap();

    let found = license::browse_licenses(&conn, &query).unwrap();
    assert_eq!(found.len(), 2);
}

#[test]
fn like_operator_matches_substrings() {
    let dir = TempDir::new().unwrap();
    let conn = test_conn();
    let cache = test_cache(dir.path());

    seed(&conn, &cache, "browse-like-key-001", "pending");
    seed(&conn, &cache, "other-prefix-key-01", "pending");

    let query = BrowseQuery::parse(&json!({
        "criteria": [
            { "field": "license_key", "operator": "LIKE", "value": "browse-like-%" }
        ]
    }))
    .unwrap();

    let found = license::browse_licenses(&conn, &query).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].license_key, "browse-like-key-001");
}
