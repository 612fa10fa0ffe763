pub mod cache;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod license;
pub mod models;
pub mod nonce;
pub mod package;
pub mod sync;
pub mod util;
pub mod vcs;

use std::sync::Arc;

use axum::Router;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use db::AppState;

/// Assembles the full application router with rate limiting, tracing and
/// CORS applied. Panics only on an invalid rate limiter configuration,
/// which is a programming error caught at startup.
pub fn build_router(state: AppState) -> Router {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(20)
            .finish()
            .expect("valid rate limiter configuration"),
    );

    handlers::router()
        .layer(GovernorLayer::new(governor_conf))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
