use serde_json::{Map, Value, json};

use depot::nonce::signature::{
    ApiCredentials, build_signature, canonical_json, verify_signature,
};

fn payload() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("action".to_string(), json!("token"));
    map.insert("expiry_length".to_string(), json!(600));
    map.insert("data".to_string(), json!({ "b": 2, "a": 1 }));
    map
}

#[test]
fn canonical_json_sorts_keys_recursively() {
    let value = json!({
        "zeta": { "y": 1, "x": [ { "b": 2, "a": 1 } ] },
        "alpha": true,
    });

    assert_eq!(
        canonical_json(&value).unwrap(),
        r#"{"alpha":true,"zeta":{"x":[{"a":1,"b":2}],"y":1}}"#
    );
}

#[test]
fn signature_is_independent_of_field_order() {
    let mut reordered = Map::new();
    reordered.insert("data".to_string(), json!({ "a": 1, "b": 2 }));
    reordered.insert("expiry_length".to_string(), json!(600));
    reordered.insert("action".to_string(), json!("token"));

    let a = build_signature("key-1", "secret", 1700000000, &payload()).unwrap();
    let b = build_signature("key-1", "secret", 1700000000, &reordered).unwrap();

    assert_eq!(a, b);
}

#[test]
fn signature_fields_are_excluded_from_signing() {
    let mut with_signature = payload();
    with_signature.insert("api_signature".to_string(), json!("whatever"));
    with_signature.insert("api_credentials".to_string(), json!("123|key-1"));

    let a = build_signature("key-1", "secret", 1700000000, &payload()).unwrap();
    let b = build_signature("key-1", "secret", 1700000000, &with_signature).unwrap();

    assert_eq!(a, b);
}

#[test]
fn verification_round_trip() {
    let credentials = ApiCredentials::parse("1700000000|key-1").unwrap();
    let signature = build_signature("key-1", "secret", 1700000000, &payload()).unwrap();

    assert!(verify_signature(&credentials, "secret", &payload(), &signature).unwrap());
}

#[test]
fn altered_payload_fails_verification() {
    let credentials = ApiCredentials::parse("1700000000|key-1").unwrap();
    let signature = build_signature("key-1", "secret", 1700000000, &payload()).unwrap();

    let mut altered = payload();
    altered.insert("expiry_length".to_string(), json!(9999));

    assert!(!verify_signature(&credentials, "secret", &altered, &signature).unwrap());
}

#[test]
fn wrong_secret_fails_verification() {
    let credentials = ApiCredentials::parse("1700000000|key-1").unwrap();
    let signature = build_signature("key-1", "secret", 1700000000, &payload()).unwrap();

    assert!(!verify_signature(&credentials, "other", &payload(), &signature).unwrap());
}

#[test]
fn credentials_parse_shape() {
    assert!(ApiCredentials::parse("1700000000|key-1").is_some());
    assert!(ApiCredentials::parse("1700000000|").is_none());
    assert!(ApiCredentials::parse("no-separator").is_none());
    assert!(ApiCredentials::parse("not-a-number|key").is_none());
}

#[test]
fn timestamp_window() {
    let now = 1700000000;

    let fresh = ApiCredentials::parse(&format!("{}|k", now - 10)).unwrap();
    assert!(fresh.timestamp_valid(now, false));

    let stale = ApiCredentials::parse(&format!("{}|k", now - 120)).unwrap();
    assert!(!stale.timestamp_valid(now, false));
    // Dev mode stretches the window to an hour.
    assert!(stale.timestamp_valid(now, true));

    let future = ApiCredentials::parse(&format!("{}|k", now + 5)).unwrap();
    assert!(!future.timestamp_valid(now, false));
    assert!(!future.timestamp_valid(now, true));
}
