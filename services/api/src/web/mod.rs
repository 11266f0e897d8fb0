pub mod auth;
pub mod history_watch;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod router;
pub mod state;
pub mod ws_handler;

// Re-export the router builder to make it easily accessible
// to the binary and to the integration tests.
pub use router::build_router;
pub use state::AppState;
