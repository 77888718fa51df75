/// Request plumbing shared by the API handlers
use crate::metrics;
use axum::{
    extract::{MatchedPath, Request},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// What the Authorization header held
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerHeader {
    Missing,
    /// Present but not `Bearer <token>`
    Malformed,
    Token(String),
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> BearerHeader {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return BearerHeader::Missing;
    };

    match value.to_str().ok().and_then(|s| s.strip_prefix("Bearer ")) {
        Some(token) if !token.trim().is_empty() => BearerHeader::Token(token.trim().to_string()),
        _ => BearerHeader::Malformed,
    }
}

/// Record request count and latency per matched route
pub async fn track_http_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(req).await;

    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
