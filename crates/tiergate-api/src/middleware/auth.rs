//! Bearer token authentication for operator routes.
//!
//! The configured token is stored only as a SHA-256 digest. A presented token
//! is hashed and compared in constant time, so neither the comparison time
//! nor the digest lengths reveal anything about the secret. Without a
//! configured token every operator request is refused.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::server::AppState;

/// SHA-256 digest of an operator token.
pub fn token_digest(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Extracts the bearer token from the Authorization header.
/// Supports Bearer token format: "Bearer <token>"
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Errors that can occur during operator authentication.
#[derive(Debug)]
pub enum AuthError {
    /// No operator token is configured.
    Disabled,
    /// The Authorization header is missing from the request.
    MissingHeader,
    /// The presented token does not match.
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            Self::Disabled => "Operator access is not configured",
            Self::MissingHeader => "Missing Authorization header",
            Self::InvalidToken => "Invalid operator token",
        };

        (StatusCode::UNAUTHORIZED, message).into_response()
    }
}

/// Axum middleware admitting requests that carry the operator token.
pub async fn operator_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let expected = state.operator_token_digest.as_deref().ok_or(AuthError::Disabled)?;
    let token = extract_bearer_token(req.headers()).ok_or(AuthError::MissingHeader)?;

    if !constant_time_eq(&token_digest(token), expected) {
        warn!(path = %req.uri().path(), "operator token rejected");
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn extract_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer op-token-123"));

        assert_eq!(extract_bearer_token(&headers), Some("op-token-123"));
    }

    #[test]
    fn extract_token_rejects_other_schemes_and_blanks() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Basic b3A6cGFzcw=="));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn digests_compare_by_value() {
        let expected = token_digest("op-token");

        assert!(constant_time_eq(&token_digest("op-token"), &expected));
        assert!(!constant_time_eq(&token_digest("op-token2"), &expected));
        assert!(!constant_time_eq(&expected[..16], &expected));
    }
}
