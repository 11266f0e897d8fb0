//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, logout, and the current user.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use equation_ace_core::ports::{DatabaseService, PortError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use utoipa::ToSchema;
use crate::error::{not_configured, Rejection};
use crate::web::{middleware::session_cookie, state::AppState};

/// Auth sessions last 30 days.
const SESSION_DAYS: i64 = 30;

/// Error code returned when sign-in is attempted from a host that is not allowed.
pub const UNAUTHORIZED_DOMAIN: &str = "auth/unauthorized-domain";

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn accounts(state: &AppState) -> Result<&Arc<dyn DatabaseService>, Rejection> {
    state.accounts.as_ref().ok_or_else(|| not_configured("Sign-in"))
}

/// Refuses sign-in requests coming from a page on a host that is not allowed.
fn check_origin(state: &AppState, headers: &HeaderMap) -> Result<(), Rejection> {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if state.config.is_authorized_origin(origin) {
        return Ok(());
    }
    warn!("Sign-in refused for origin {:?}", origin);
    Err((
        StatusCode::FORBIDDEN,
        format!(
            "{}: This domain is not authorized for sign-in. Add it to AUTHORIZED_DOMAINS.",
            UNAUTHORIZED_DOMAIN
        ),
    ))
}

fn invalid_credentials() -> Rejection {
    (StatusCode::UNAUTHORIZED, "Invalid email or password".to_string())
}

fn hash_password(password: &str) -> Result<String, Rejection> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Password hashing failed: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create account".to_string())
        })
}

/// Checks a password against a stored argon2 hash.
fn password_matches(password: &str, stored_hash: &str) -> Result<bool, Rejection> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        error!("Stored password hash is unreadable: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn session_cookie_header(auth_session_id: &str, max_age: i64) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session_id, max_age
    )
}

/// Creates an auth session for the user and returns the cookie that carries it.
async fn start_session(
    accounts: &Arc<dyn DatabaseService>,
    user_id: Uuid,
) -> Result<String, Rejection> {
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(SESSION_DAYS);

    accounts
        .create_auth_session(&auth_session_id, user_id, expires_at)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string())
        })?;

    Ok(session_cookie_header(
        &auth_session_id,
        Duration::days(SESSION_DAYS).num_seconds(),
    ))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Create an account and sign in.
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Sign-in is not allowed from this domain"),
        (status = 409, description = "An account with this email already exists"),
        (status = 503, description = "Accounts are not configured")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let accounts = accounts(&state)?;
    check_origin(&state, &headers)?;

    let email = req.email.trim().to_lowercase();
    if !email.contains('@') || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "A valid email and a password are required".to_string(),
        ));
    }

    let password_hash = hash_password(&req.password)?;
    let user = accounts
        .create_user_with_email(&email, &password_hash)
        .await
        .map_err(|e| match e {
            PortError::Conflict(message) => (StatusCode::CONFLICT, message),
            other => {
                error!("Failed to create user: {:?}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create user".to_string())
            }
        })?;

    let cookie = start_session(accounts, user.user_id).await?;
    info!("Created account {}", user.user_id);

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            user_id: user.user_id,
            email: user.email,
        }),
    ))
}

/// Sign in with email and password.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Sign-in is not allowed from this domain"),
        (status = 503, description = "Accounts are not configured")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let accounts = accounts(&state)?;
    check_origin(&state, &headers)?;

    let user_creds = accounts
        .get_user_by_email(&req.email.trim().to_lowercase())
        .await
        .map_err(|e| {
            warn!("Login for unknown email: {:?}", e);
            invalid_credentials()
        })?;

    if !password_matches(&req.password, &user_creds.hashed_password)? {
        return Err(invalid_credentials());
    }

    let cookie = start_session(accounts, user_creds.user_id).await?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            user_id: user_creds.user_id,
            email: user_creds.email,
        }),
    ))
}

/// Sign out, deleting the auth session.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Rejection> {
    let accounts = accounts(&state)?;
    let auth_session_id = session_cookie(&headers)
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    accounts
        .delete_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            error!("Failed to delete auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to logout".to_string())
        })?;

    Ok((StatusCode::OK, [(header::SET_COOKIE, session_cookie_header("", 0))]))
}

/// The signed-in user.
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "The signed-in user", body = AuthResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, Rejection> {
    let user = accounts(&state)?
        .get_user_by_id(user_id)
        .await
        .map_err(|e| {
            warn!("Session user {} could not be loaded: {:?}", user_id, e);
            (StatusCode::UNAUTHORIZED, "Not signed in".to_string())
        })?;

    Ok(Json(AuthResponse {
        user_id: user.user_id,
        email: user.email,
    }))
}
