use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

use depot::license;
use depot::models::LicensePayload;

use crate::common::{test_cache, test_state, write_plugin_zip, write_zip};
use crate::helpers::{PLUGIN_MAIN_FREE, app, get};

#[tokio::test]
async fn missing_action_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = app(test_state(dir.path()));

    let (status, body) = get(&app, "/update-api?package_id=acme-plugin").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "malformed_request");
}

#[tokio::test]
async fn unknown_package_is_not_found() {
    let dir = TempDir::new().unwrap();
    let app = app(test_state(dir.path()));

    let (status, body) = get(
        &app,
        "/update-api?action=get_metadata&package_id=no-such-package",
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Package not found");
}

#[tokio::test]
async fn metadata_for_unlicensed_package_carries_download_url() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    write_zip(
        &state.config.archive_path("free-plugin"),
        &[("free-plugin/free-plugin.php", PLUGIN_MAIN_FREE)],
    );

    let app = app(state);
    let (status, body) = get(
        &app,
        "/update-api?action=get_metadata&package_id=free-plugin",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Free Plugin");
    assert_eq!(body["version"], "0.1.0");
    assert!(body.get("license_error").is_none());

    let download_url = body["download_url"].as_str().unwrap();
    assert!(download_url.contains("action=download"));
    assert!(download_url.contains("token="));
    assert!(download_url.contains("package_id=free-plugin"));
}

#[tokio::test]
async fn licensed_package_without_key_gets_empty_license_error() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    // The fixture plugin declares `Require License: yes`.
    write_plugin_zip(&state.config.archive_path("acme-plugin"), "acme-plugin");

    let app = app(state);
    let (status, body) = get(
        &app,
        "/update-api?action=get_metadata&package_id=acme-plugin",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["license_error"], json!({}));
    assert!(body.get("download_url").is_none());
}

#[tokio::test]
async fn licensed_package_with_unknown_key_reports_it() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    write_plugin_zip(&state.config.archive_path("acme-plugin"), "acme-plugin");

    let app = app(state);
    let (status, body) = get(
        &app,
        "/update-api?action=get_metadata&package_id=acme-plugin&license_key=nope",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["license_error"], json!({ "license_key": "nope" }));
}

#[tokio::test]
async fn full_licensed_flow_yields_download_url() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    write_plugin_zip(&state.config.archive_path("acme-plugin"), "acme-plugin");

    // Seed a license for the package.
    let created = {
        let conn = state.db.get().unwrap();
        let cache = test_cache(dir.path());
        license::add_license(
            &conn,
            &cache,
            &LicensePayload {
                license_key: Some("flow-test-license-key".to_string()),
                max_allowed_domains: Some(1),
                email: Some("owner@example.com".to_string()),
                package_slug: Some("acme-plugin".to_string()),
                package_type: Some("plugin".to_string()),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap()
    };

    let app = app(state);

    // Activate for a domain to obtain a signature.
    let (status, activated) = get(
        &app,
        &format!(
            "/license-api?action=activate&license_key={}&package_slug=acme-plugin&allowed_domains=example.com",
            created.license_key
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let signature = activated["license_signature"].as_str().unwrap().to_string();

    let (status, body) = get(
        &app,
        &format!(
            "/update-api?action=get_metadata&package_id=acme-plugin&license_key={}&license_signature={}",
            created.license_key,
            urlencoding::encode(&signature),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("license_error").is_none());
    assert!(body["license"].is_object());

    let download_url = body["download_url"].as_str().unwrap();
    assert!(download_url.contains("license_key="));
    assert!(download_url.contains("license_signature="));
}

#[tokio::test]
async fn download_requires_a_live_token() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    write_zip(
        &state.config.archive_path("free-plugin"),
        &[("free-plugin/free-plugin.php", PLUGIN_MAIN_FREE)],
    );

    let app = app(state);
    let (status, body) = get(
        &app,
        "/update-api?action=download&package_id=free-plugin&token=stale",
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "The download URL token has expired.");
}

#[tokio::test]
async fn download_streams_the_archive() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    write_zip(
        &state.config.archive_path("free-plugin"),
        &[("free-plugin/free-plugin.php", PLUGIN_MAIN_FREE)],
    );

    let app = app(state);
    let (_, metadata) = get(
        &app,
        "/update-api?action=get_metadata&package_id=free-plugin",
    )
    .await;

    // Reuse the freshly minted token from the advertised URL.
    let download_url = metadata["download_url"].as_str().unwrap();
    let path_and_query = download_url
        .strip_prefix("http://localhost:3000")
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(path_and_query)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/zip"
    );
    assert!(
        response.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .contains("free-plugin.zip")
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    // ZIP local file header magic.
    assert_eq!(&bytes[..4], b"PK\x03\x04");
}
