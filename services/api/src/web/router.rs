//! services/api/src/web/router.rs
//!
//! Assembles the full application router from the shared state.

use crate::web::{
    auth::{login_handler, logout_handler, me_handler, signup_handler},
    history_watch::ws_history_handler,
    middleware::{attach_user, require_auth},
    rest::{
        export_history_handler, graph_handler, list_history_handler, solve_handler,
        solve_upload_handler, status_handler, ApiDoc,
    },
    state::AppState,
    ws_handler::ws_solve_handler,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Uploaded images and drawings stay well under this.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(app_state.config.allowed_origin.clone())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/status", get(status_handler))
        .route("/graph", post(graph_handler))
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Solving works for everyone; signed-in users also get their results saved.
    let solve_routes = Router::new()
        .route("/solve", post(solve_handler))
        .route("/solve/upload", post(solve_upload_handler))
        .route("/ws/solve", get(ws_solve_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            attach_user,
        ));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/me", get(me_handler))
        .route("/history", get(list_history_handler))
        .route("/history/{id}/export", get(export_history_handler))
        .route("/ws/history", get(ws_history_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(solve_routes)
        .merge(protected_routes)
        .nest_service("/files", ServeDir::new(&app_state.config.storage_root))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}
