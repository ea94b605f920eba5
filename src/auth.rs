//! HTTP Basic Authentication for the host surface

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;

/// Authentication configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Username for the host surface (None = auth disabled)
    pub username: Option<String>,
    /// Password for the host surface
    pub password: Option<String>,
}

impl AuthConfig {
    /// Load auth config from environment variables
    /// HOST_USERNAME and HOST_PASSWORD must both be set to enable auth
    pub fn from_env() -> Self {
        let username = std::env::var("HOST_USERNAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let password = std::env::var("HOST_PASSWORD")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        // Both must be set to enable auth
        if username.is_some() && password.is_some() {
            tracing::info!("Host authentication enabled");
            Self { username, password }
        } else {
            if username.is_some() || password.is_some() {
                tracing::warn!(
                    "HOST_USERNAME and HOST_PASSWORD must both be set to enable authentication"
                );
            }
            tracing::warn!("Host authentication DISABLED - anyone can start, stop and kick!");
            Self::default()
        }
    }

    /// Check if authentication is enabled
    pub fn is_enabled(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Validate credentials
    pub fn validate(&self, username: &str, password: &str) -> bool {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => {
                // Use constant-time comparison to prevent timing attacks
                constant_time_eq(u.as_bytes(), username.as_bytes())
                    && constant_time_eq(p.as_bytes(), password.as_bytes())
            }
            _ => true, // Auth disabled, allow all
        }
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Extract `user:password` from an `Authorization: Basic ...` header
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Middleware for HTTP Basic Authentication on host routes
pub async fn host_auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // If auth is disabled, pass through
    if !auth_config.is_enabled() {
        return next.run(request).await;
    }

    if let Some((username, password)) = basic_credentials(request.headers()) {
        if auth_config.validate(&username, &password) {
            return next.run(request).await;
        }
        tracing::warn!("Rejected host credentials for user {:?}", username);
    }

    // Return 401 Unauthorized with WWW-Authenticate header
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"Quiz Host\"")],
        "Unauthorized",
    )
        .into_response()
}
