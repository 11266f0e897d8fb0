//! crates/equation_ace_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use crate::domain::{
    HistoryRecord, ImageBlob, NewHistoryRecord, ProblemInput, SolverReply, User, UserCredentials,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Already exists: {0}")]
    Conflict(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Language Model Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ProblemSolvingService: Send + Sync {
    /// Reads (for images), corrects and solves a problem in a single model call.
    async fn solve_problem(&self, input: &ProblemInput) -> PortResult<SolverReply>;
}

#[async_trait]
pub trait TextExtractionService: Send + Sync {
    /// Runs OCR over an image and returns the raw text, which may be empty.
    async fn extract_text(&self, image: &ImageBlob) -> PortResult<String>;
}

#[async_trait]
pub trait TextCorrectionService: Send + Sync {
    /// Fixes recognition and typing mistakes in a problem statement.
    async fn correct_text(&self, raw_text: &str) -> PortResult<String>;
}

//=========================================================================================
// Storage Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ObjectStorageService: Send + Sync {
    /// Stores an image under `key` and returns a URL it can be fetched from.
    async fn upload_image(&self, key: &str, image: &ImageBlob) -> PortResult<String>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Inserts a record; the store assigns `created_at`.
    async fn insert_history_record(&self, record: NewHistoryRecord) -> PortResult<HistoryRecord>;

    /// Returns every record of one owner, in no particular order.
    async fn get_history_for_owner(&self, owner_id: Uuid) -> PortResult<Vec<HistoryRecord>>;

    async fn get_history_record(&self, record_id: Uuid) -> PortResult<HistoryRecord>;
}

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    async fn create_user_with_email(&self, email: &str, hashed_password: &str) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}
