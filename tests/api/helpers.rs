#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use depot::db::AppState;

/// Router without the outer middleware stack; rate limiting needs peer
/// address info that `oneshot` requests do not carry.
pub fn app(state: AppState) -> Router {
    depot::handlers::router().with_state(state)
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, value)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    headers: &[(&str, &str)],
    body: &Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let request = builder.body(Body::from(body.to_string())).unwrap();
    send(app, request).await
}

pub const PLUGIN_MAIN_FREE: &str = "<?php\n/*\nPlugin Name: Free Plugin\nVersion: 0.1.0\nAuthor: Acme Co\n*/\n";
