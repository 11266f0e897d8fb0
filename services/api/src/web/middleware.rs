//! services/api/src/web/middleware.rs
//!
//! Authentication middleware. `require_auth` protects routes that only make
//! sense for a signed-in user; `attach_user` resolves the user when there is
//! one and lets anonymous requests through.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::not_configured;
use crate::web::state::AppState;

/// The signed-in user of a request, if any.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Option<Uuid>);

/// Reads the auth session id from the `session` cookie.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

/// Middleware that validates the auth session cookie and extracts the user_id.
///
/// If valid, inserts the user_id into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(accounts) = state.accounts.as_ref() else {
        return not_configured("Sign-in").into_response();
    };
    let Some(auth_session_id) = session_cookie(req.headers()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match accounts.validate_auth_session(auth_session_id).await {
        Ok(user_id) => {
            req.extensions_mut().insert(user_id);
            req.extensions_mut().insert(CurrentUser(Some(user_id)));
            next.run(req).await
        }
        Err(e) => {
            error!("Failed to validate auth session: {:?}", e);
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Middleware that resolves the signed-in user without requiring one.
pub async fn attach_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let mut current = CurrentUser(None);
    if let (Some(accounts), Some(auth_session_id)) =
        (state.accounts.as_ref(), session_cookie(req.headers()))
    {
        match accounts.validate_auth_session(auth_session_id).await {
            Ok(user_id) => current = CurrentUser(Some(user_id)),
            Err(e) => warn!("Ignoring invalid auth session: {:?}", e),
        }
    }
    req.extensions_mut().insert(current);
    next.run(req).await
}
