//! Bearer-token authentication middleware. Token issuance and verification
//! internals are an external collaborator behind the `Authenticator` trait;
//! the middleware only extracts the token, asks the authenticator for a
//! user id, and attaches it to the request.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use std::collections::HashMap;

use crate::{
    error::{Error, Result},
    state::AppState,
};

/// Verifies an opaque bearer token and yields the owning user id.
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<i64>;
}

/// Authenticated user extracted from the bearer token.
///
/// Added to request extensions by the auth middleware after successful
/// verification. The core only ever consumes the id for ownership checks.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AuthenticatedUser {
    pub id: i64,
}

/// Authentication middleware for all API routes except health.
///
/// Extracts `Authorization: Bearer <token>`, delegates verification to the
/// configured `Authenticator`, and returns 401 on any failure.
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = extract_bearer_token(&headers)
        .ok_or_else(|| Error::Authentication("missing bearer token".to_string()))?;

    let user_id = state.authenticator.verify(token)?;
    request
        .extensions_mut()
        .insert(AuthenticatedUser { id: user_id });

    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
}

/// Static token table for deployments that front this service with their
/// own token minting; populated from `DOCUCHAT_API_TOKENS`
/// (`token1:42,token2:7`).
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, i64>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, i64>) -> Self {
        Self { tokens }
    }

    pub fn from_env() -> Self {
        let mut tokens = HashMap::new();
        if let Ok(raw) = std::env::var("DOCUCHAT_API_TOKENS") {
            for pair in raw.split(',') {
                if let Some((token, id)) = pair.split_once(':')
                    && let Ok(id) = id.trim().parse::<i64>()
                {
                    tokens.insert(token.trim().to_string(), id);
                }
            }
        }
        Self { tokens }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn verify(&self, token: &str) -> Result<i64> {
        self.tokens
            .get(token)
            .copied()
            .ok_or_else(|| Error::Authentication("invalid token".to_string()))
    }
}
