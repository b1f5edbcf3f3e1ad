//! Bearer-token authentication for the HTTP gateway.
//!
//! The core ships no real token format (see
//! [`crate::security::TokenResolver`]); [`StaticTokenResolver`] is the
//! minimal bootstrap implementation, mapping configured tokens straight to
//! a full-permission [`UserContext`]. A deployment that needs JWTs or a
//! session store supplies its own [`TokenResolver`] to [`GatewayState`]
//! instead.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::security::{TokenResolver, UserContext};

use super::routes::GatewayState;

/// Resolves a bearer token via a fixed `token -> user_id` map, granting the
/// resolved user every permission. Intended for single-operator or
/// trusted-network deployments; anything multi-tenant should bring its
/// own [`TokenResolver`].
pub struct StaticTokenResolver {
    tokens: HashMap<String, String>,
}

impl StaticTokenResolver {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl TokenResolver for StaticTokenResolver {
    async fn resolve(&self, user_token: &str) -> Result<UserContext, String> {
        let user_id = self
            .tokens
            .get(user_token)
            .ok_or_else(|| "unrecognized bearer token".to_string())?;
        let permissions = HashMap::from([("resource.*:all".to_string(), true)]);
        Ok(UserContext::new(user_id.clone(), permissions))
    }
}

/// Axum extension carrying the caller's resolved identity, and the raw
/// bearer token so handlers can forward it unchanged onto a queued job
/// (the agent engine resolves it again itself — see
/// [`crate::agent::engine::AgentEngine`]).
#[derive(Clone)]
pub struct AuthenticatedCaller {
    pub context: UserContext,
    pub token: String,
}

/// Middleware: validates the `Authorization: Bearer <token>` header against
/// the gateway's configured [`TokenResolver`] and inserts an
/// [`AuthenticatedCaller`] extension on success.
pub async fn auth_middleware(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = match headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
    {
        Some(token) => token,
        None => return unauthorized("missing bearer token"),
    };

    let context = match state.token_resolver.resolve(&token).await {
        Ok(context) => context,
        Err(e) => return unauthorized(e),
    };

    request
        .extensions_mut()
        .insert(AuthenticatedCaller { context, token });

    next.run(request).await
}

fn unauthorized(message: impl std::fmt::Display) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let body = json!({ "code": "unauthorized", "message": message.to_string(), "request_id": request_id });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
