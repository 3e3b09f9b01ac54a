//! Bearer-token authentication extractors.

use axum::extract::{FromRequestParts, Query};
use axum::http::header;
use axum::http::request::Parts;
use serde::Deserialize;

use taskpulse_core::User;

use crate::context::AppState;
use crate::error::ApiError;

/// Authenticated owner of the request.
///
/// Accepts `Authorization: Bearer <token>` only.
///
/// ```ignore
/// async fn my_handler(RequireAuth(user): RequireAuth) -> impl IntoResponse {
///     // user.id scopes every query
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth(pub User);

/// Authenticated owner of a WebSocket upgrade.
///
/// Browsers cannot set headers on a WebSocket handshake, so a `?token=`
/// query parameter is accepted as well as the bearer header.
#[derive(Debug, Clone)]
pub struct WsAuth(pub User);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

async fn authenticate(state: &AppState, token: Option<String>) -> Result<User, ApiError> {
    let token =
        token.ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;
    match state.users.resolve_token(&token).await? {
        Some(user) => Ok(user),
        None => {
            tracing::debug!(subsystem = "auth", "Rejected unknown bearer token");
            Err(ApiError::Unauthorized("Invalid token".to_string()))
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(state, bearer_token(parts)).await.map(RequireAuth)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for WsAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).or_else(|| query_token(parts));
        authenticate(state, token).await.map(WsAuth)
    }
}
