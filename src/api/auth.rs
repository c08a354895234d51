// =============================================================================
// Bearer Token Authentication — Axum extractor
// =============================================================================
//
// The expected token comes from `PULSE_ADMIN_TOKEN`, read per request so it can
// be rotated without a restart. Comparison is constant time. With no token
// configured every authenticated request is refused.
// =============================================================================

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

pub const ADMIN_TOKEN_ENV: &str = "PULSE_ADMIN_TOKEN";

/// Compare two byte slices without short-circuiting on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

fn expected_token() -> String {
    std::env::var(ADMIN_TOKEN_ENV).unwrap_or_default()
}

/// Validated `Authorization: Bearer <token>` header.
pub struct AuthBearer;

#[derive(Debug)]
pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

/// Check a raw `Authorization` header value against `expected`.
fn check_bearer(header: Option<&str>, expected: &str) -> Result<(), AuthRejection> {
    if expected.is_empty() {
        warn!("{ADMIN_TOKEN_ENV} is not set, rejecting authenticated request");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Server authentication not configured",
        });
    }

    let Some(token) = header.and_then(|v| v.strip_prefix("Bearer ")) else {
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Missing or invalid authorization token",
        });
    };

    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        warn!("invalid admin token presented");
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Invalid authorization token",
        });
    }
    Ok(())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        check_bearer(header, &expected_token())?;
        Ok(AuthBearer)
    }
}

/// Token check for the WebSocket feed, which passes it as a query parameter.
pub fn validate_token(token: &str) -> bool {
    let expected = expected_token();
    !expected.is_empty() && constant_time_eq(token.as_bytes(), expected.as_bytes())
}
