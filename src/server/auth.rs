/// API key authentication middleware

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::response::error_response;
use crate::utils::API_KEY_HEADER;

/// Key expected from callers; `None` disables authentication
#[derive(Clone, Default)]
pub struct ApiKey(Option<Arc<str>>);

impl ApiKey {
    pub fn new(key: Option<String>) -> Self {
        Self(key.filter(|k| !k.is_empty()).map(Arc::from))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }
}

/// Compare without leaking the matching prefix length through timing
fn key_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Token from `X-API-Key`, or from `Authorization` ("Bearer TOKEN" or just "TOKEN")
fn provided_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim());
    }

    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(|header| header.strip_prefix("Bearer ").unwrap_or(header).trim())
}

/// Reject requests whose key does not match the configured one
pub async fn auth_middleware(
    State(expected): State<ApiKey>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    match (&expected.0, provided_token(&headers)) {
        // No key configured, allow access
        (None, _) => Ok(next.run(request).await),
        (Some(expected), Some(provided)) if key_matches(expected, provided) => Ok(next.run(request).await),
        _ => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Unauthorized - invalid or missing API key",
        )),
    }
}
