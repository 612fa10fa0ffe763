pub mod license;
pub mod nonce;
pub mod update;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(
            "/update-api",
            get(update::update_api_get).post(update::update_api_post),
        )
        .route(
            "/license-api",
            get(license::public_api).post(license::private_api),
        )
        .route("/token", post(nonce::create_token))
        .route("/nonce", post(nonce::create_nonce))
}
