//! crates/equation_ace_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

//=========================================================================================
// Problem Input
//=========================================================================================

/// The two image encodings accepted from the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// Maps a MIME type to a supported format. `image/jpg` is accepted because
    /// some browsers report it for `.jpg` files.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

/// An encoded image together with its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

/// The normalized input of one pipeline run. Exactly one form exists per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemInput {
    Image(ImageBlob),
    Text(String),
}

impl ProblemInput {
    pub fn is_image(&self) -> bool {
        matches!(self, ProblemInput::Image(_))
    }

    pub fn image(&self) -> Option<&ImageBlob> {
        match self {
            ProblemInput::Image(image) => Some(image),
            ProblemInput::Text(_) => None,
        }
    }
}

//=========================================================================================
// Pipeline Artifacts
//=========================================================================================

/// Raw OCR text read from an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub raw_text: String,
}

/// The problem text after recognition and typo mistakes were fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectedProblem {
    pub corrected_text: String,
}

/// Whether a solution can be drawn as `y = f(x)`, and the expression if so.
///
/// The fields are private so the expression can only exist for plottable graphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSpec {
    is_plottable: bool,
    function_expression: Option<String>,
}

fn function_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(r"^\s*(?:y|f\s*\(\s*x\s*\))\s*=\s*").expect("static regex is valid")
    })
}

impl GraphSpec {
    pub fn not_plottable() -> Self {
        Self {
            is_plottable: false,
            function_expression: None,
        }
    }

    /// Builds a plottable graph from a function expression.
    ///
    /// A leading `y =` or `f(x) =` is stripped. Returns a non-plottable graph when
    /// nothing is left or when the remainder is still an equation.
    pub fn plottable(expression: &str) -> Self {
        let stripped = function_prefix().replace(expression, "");
        let stripped = stripped.trim();
        if stripped.is_empty() || stripped.contains('=') {
            return Self::not_plottable();
        }
        Self {
            is_plottable: true,
            function_expression: Some(stripped.to_string()),
        }
    }

    /// Normalizes the flag/expression pair reported by the language model.
    pub fn from_model(is_plottable: bool, function_expression: Option<&str>) -> Self {
        match (is_plottable, function_expression) {
            (true, Some(expression)) => Self::plottable(expression),
            _ => Self::not_plottable(),
        }
    }

    pub fn is_plottable(&self) -> bool {
        self.is_plottable
    }

    pub fn function_expression(&self) -> Option<&str> {
        self.function_expression.as_deref()
    }
}

/// The answer to a problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub result_lines: Vec<String>,
    pub explanation_steps: Vec<String>,
    pub graph: Option<GraphSpec>,
}

impl Solution {
    /// An empty solution is a valid outcome, shown as "no solution found".
    pub fn has_result(&self) -> bool {
        !self.result_lines.is_empty()
    }
}

/// Which request pipeline produced a result. Persisted as a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineShape {
    /// Extract, correct and solve as three separate model calls.
    ThreeStep,
    /// One model call that extracts, corrects and solves.
    Consolidated,
}

impl PipelineShape {
    pub fn schema_version(self) -> i16 {
        match self {
            PipelineShape::ThreeStep => 1,
            PipelineShape::Consolidated => 2,
        }
    }

    pub fn from_schema_version(version: i16) -> Option<Self> {
        match version {
            1 => Some(PipelineShape::ThreeStep),
            2 => Some(PipelineShape::Consolidated),
            _ => None,
        }
    }
}

/// The reply of the solving model, before the pipeline validates it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SolverReply {
    pub ocr_text: Option<String>,
    pub corrected_text: String,
    pub solved_result: Vec<String>,
    pub explanation: Vec<String>,
    pub graph: Option<GraphSpec>,
}

/// Everything a completed pipeline run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveOutcome {
    pub extraction: Option<ExtractionResult>,
    pub corrected: CorrectedProblem,
    pub solution: Solution,
    pub shape: PipelineShape,
}

impl SolveOutcome {
    pub fn raw_text(&self) -> Option<&str> {
        self.extraction.as_ref().map(|e| e.raw_text.as_str())
    }
}

//=========================================================================================
// History
//=========================================================================================

/// A persisted, immutable snapshot of one saved solve.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub raw_text: Option<String>,
    pub corrected_text: String,
    pub result_lines: Vec<String>,
    pub explanation_steps: Vec<String>,
    pub graph: Option<GraphSpec>,
    pub image_url: Option<String>,
    pub schema: PipelineShape,
    pub created_at: DateTime<Utc>,
}

/// The fields of a history record before the store assigns its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub raw_text: Option<String>,
    pub corrected_text: String,
    pub result_lines: Vec<String>,
    pub explanation_steps: Vec<String>,
    pub graph: Option<GraphSpec>,
    pub image_url: Option<String>,
    pub schema: PipelineShape,
}

impl NewHistoryRecord {
    pub fn from_outcome(owner_id: Uuid, outcome: &SolveOutcome, image_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            raw_text: outcome.raw_text().map(str::to_string),
            corrected_text: outcome.corrected.corrected_text.clone(),
            result_lines: outcome.solution.result_lines.clone(),
            explanation_steps: outcome.solution.explanation_steps.clone(),
            graph: outcome.solution.graph.clone(),
            image_url,
            schema: outcome.shape,
        }
    }
}

//=========================================================================================
// Accounts
//=========================================================================================

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}
