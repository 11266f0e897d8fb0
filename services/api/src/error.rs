//! services/api/src/error.rs
//!
//! Defines the primary error type for the API service, and the mapping of
//! core errors to HTTP rejections.

use crate::config::ConfigError;
use axum::http::StatusCode;
use equation_ace_core::input::InvalidInputError;
use equation_ace_core::pipeline::PipelineError;
use equation_ace_core::ports::PortError;
use tracing::{error, warn};

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The rejection every handler returns.
pub type Rejection = (StatusCode, String);

/// Maps a failed solve to a status and the single user-facing message.
pub fn pipeline_rejection(err: &PipelineError) -> Rejection {
    let status = match err {
        PipelineError::InvalidInput(InvalidInputError::NothingToSolve(_))
        | PipelineError::NothingToSolve(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PipelineError::Extraction(_) | PipelineError::Correction(_) | PipelineError::Solve(_) => {
            StatusCode::BAD_GATEWAY
        }
    };
    if status == StatusCode::BAD_GATEWAY {
        error!("Solve failed: {}", err);
    } else {
        warn!("Solve rejected: {}", err);
    }
    (status, format!("{}: {}", err.title(), err.user_message()))
}

pub fn invalid_input_rejection(err: InvalidInputError) -> Rejection {
    pipeline_rejection(&PipelineError::from(err))
}

/// The feature behind this endpoint has no backing service configured.
pub fn not_configured(feature: &str) -> Rejection {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        format!("{} is not configured on this server.", feature),
    )
}
