//! Dashboard authentication middleware.
//!
//! Token verification itself belongs to the identity collaborator; this
//! layer only finds the token (cookie or bearer header), asks the provider
//! who it is, and stashes the answer in the request context.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{self, Request, header},
    middleware::Next,
    response::Response,
};
use cookie::Cookie;
use tracing::instrument;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
};

/// Cookie the dashboard stores its session token in.
pub const SESSION_COOKIE: &str = "parley_session";

#[instrument(skip_all)]
pub async fn require_member(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let token = extract_token(req.headers())
        .ok_or_else(|| ApiError::unauthorized("missing session token"))?;

    let identity = state
        .identity
        .authenticate(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid or expired session token"))?;

    if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
        context.member = Some(identity);
    } else {
        req.extensions_mut().insert(RequestContext {
            request_id: String::new(),
            member: Some(identity),
        });
    }

    Ok(next.run(req).await)
}

fn extract_token(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    Cookie::split_parse(cookies)
        .flatten()
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}
