//! Shared utility functions for the depot application.

use axum::http::HeaderMap;

/// Strip every character outside the safe filename alphabet used for
/// package slugs and archive names.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ',' | '+' | '!'))
        .collect()
}

/// Client address for request logging: `x-forwarded-for` when proxied,
/// else `x-real-ip`.
pub fn remote_addr(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
