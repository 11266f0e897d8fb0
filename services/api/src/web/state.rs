//! services/api/src/web/state.rs
//!
//! Defines the application's shared and session-specific states.

use crate::config::Config;
use equation_ace_core::{
    domain::ProblemInput,
    history::HistoryRecorder,
    input::InputCapture,
    pipeline::{PendingSolve, SolvePipeline},
    ports::DatabaseService,
    presentation::ResultView,
};
use std::sync::Arc;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
///
/// Services whose configuration is missing are `None`; their endpoints answer
/// "not configured" instead of failing at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Option<Arc<SolvePipeline>>,
    pub accounts: Option<Arc<dyn DatabaseService>>,
    pub history: Option<Arc<HistoryRecorder>>,
}

//=========================================================================================
// SolveSession (Specific to One WebSocket Connection)
//=========================================================================================

/// The current mode of an interactive solve session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    /// A model call is in flight; new submissions are refused.
    Solving,
    /// Extraction and correction are done; waiting for the user's confirmation.
    AwaitingConfirmation,
}

/// A run paused between correction and solving.
pub struct PendingRun {
    pub pending: PendingSolve,
    pub input: ProblemInput,
}

/// The state for a single, active solve WebSocket connection.
pub struct SolveSession {
    pub user_id: Option<Uuid>,
    pub capture: InputCapture,
    pub mode: SessionMode,
    pub pending: Option<PendingRun>,
    pub last_result: Option<ResultView>,
}

impl SolveSession {
    pub fn new(user_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            capture: InputCapture::new(),
            mode: SessionMode::Idle,
            pending: None,
            last_result: None,
        }
    }
}
