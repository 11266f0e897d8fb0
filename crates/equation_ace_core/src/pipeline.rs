//! crates/equation_ace_core/src/pipeline.rs
//!
//! The Extract → Correct → Solve request pipeline.
//!
//! Two shapes are supported: the consolidated shape, where a single model call
//! reads, corrects and solves the problem, and the three-step shape, where the
//! corrected text is handed back to the user for review before solving.
//! Steps run strictly in sequence and a failure ends the run; nothing is retried.

use crate::domain::{
    CorrectedProblem, ExtractionResult, PipelineShape, ProblemInput, Solution, SolveOutcome,
    SolverReply,
};
use crate::input::InvalidInputError;
use crate::ports::{PortError, ProblemSolvingService, TextCorrectionService, TextExtractionService};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const NO_TEXT_IN_IMAGE: &str = "Could not find any text in the image.";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),
    #[error("Nothing to solve: {0}")]
    NothingToSolve(String),
    #[error("Text extraction failed: {0}")]
    Extraction(#[source] PortError),
    #[error("Text correction failed: {0}")]
    Correction(#[source] PortError),
    #[error("Solving failed: {0}")]
    Solve(#[source] PortError),
}

impl PipelineError {
    /// A short heading for the notification shown to the user.
    pub fn title(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(InvalidInputError::NothingToSolve(_))
            | PipelineError::NothingToSolve(_) => "Nothing to solve",
            PipelineError::InvalidInput(InvalidInputError::NoInput) => "No Input Provided",
            PipelineError::InvalidInput(_) => "Invalid Input",
            PipelineError::Extraction(_) => "Extraction Error",
            PipelineError::Correction(_) | PipelineError::Solve(_) => "Solving Error",
        }
    }

    /// The single user-facing message for this failure. Remote error details
    /// are left to the logs.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::InvalidInput(InvalidInputError::NothingToSolve(message))
            | PipelineError::NothingToSolve(message) => message.clone(),
            PipelineError::InvalidInput(e) => e.to_string(),
            PipelineError::Extraction(_) => {
                "Could not read text from the image. Please try again.".to_string()
            }
            PipelineError::Correction(_) | PipelineError::Solve(_) => {
                "The AI might not be able to solve this problem yet.".to_string()
            }
        }
    }
}

/// The texts produced by extraction and correction, awaiting user review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSolve {
    pub extraction: Option<ExtractionResult>,
    pub corrected: CorrectedProblem,
}

/// The user's answer to a `PendingSolve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Continue, optionally with an edited problem text.
    Confirm { edited_text: Option<String> },
    Cancel,
}

/// Drives problem inputs through the remote model calls.
#[derive(Clone)]
pub struct SolvePipeline {
    solver: Arc<dyn ProblemSolvingService>,
    extractor: Arc<dyn TextExtractionService>,
    corrector: Arc<dyn TextCorrectionService>,
}

impl SolvePipeline {
    pub fn new(
        solver: Arc<dyn ProblemSolvingService>,
        extractor: Arc<dyn TextExtractionService>,
        corrector: Arc<dyn TextCorrectionService>,
    ) -> Self {
        Self {
            solver,
            extractor,
            corrector,
        }
    }

    /// Runs the consolidated shape: one model call that reads, corrects and solves.
    pub async fn solve(&self, input: &ProblemInput) -> Result<SolveOutcome, PipelineError> {
        if let ProblemInput::Text(statement) = input {
            if statement.trim().is_empty() {
                return Err(InvalidInputError::NoInput.into());
            }
        }
        let started = Instant::now();
        let reply = self
            .solver
            .solve_problem(input)
            .await
            .map_err(PipelineError::Solve)?;
        info!("Consolidated solve call took {:?}", started.elapsed());

        let extraction = match input {
            ProblemInput::Image(_) => {
                let raw_text = reply.ocr_text.as_deref().map(str::trim).unwrap_or_default();
                if raw_text.is_empty() {
                    return Err(PipelineError::NothingToSolve(NO_TEXT_IN_IMAGE.to_string()));
                }
                Some(ExtractionResult {
                    raw_text: raw_text.to_string(),
                })
            }
            ProblemInput::Text(_) => None,
        };

        let source_text = match (&extraction, input) {
            (Some(extraction), _) => extraction.raw_text.as_str(),
            (None, ProblemInput::Text(statement)) => statement.trim(),
            (None, ProblemInput::Image(_)) => "",
        };
        let corrected = corrected_or(&reply.corrected_text, source_text);

        Ok(SolveOutcome {
            extraction,
            corrected,
            solution: solution_from(reply),
            shape: PipelineShape::Consolidated,
        })
    }

    /// First half of the three-step shape: extraction (for images) then correction.
    pub async fn prepare(&self, input: &ProblemInput) -> Result<PendingSolve, PipelineError> {
        let (extraction, text) = match input {
            ProblemInput::Image(image) => {
                let started = Instant::now();
                let raw_text = self
                    .extractor
                    .extract_text(image)
                    .await
                    .map_err(PipelineError::Extraction)?;
                info!("Extraction call took {:?}", started.elapsed());

                let raw_text = raw_text.trim().to_string();
                if raw_text.is_empty() {
                    return Err(PipelineError::NothingToSolve(NO_TEXT_IN_IMAGE.to_string()));
                }
                (Some(ExtractionResult { raw_text: raw_text.clone() }), raw_text)
            }
            ProblemInput::Text(statement) => (None, statement.trim().to_string()),
        };
        if text.is_empty() {
            return Err(InvalidInputError::NoInput.into());
        }

        let started = Instant::now();
        let corrected_text = self
            .corrector
            .correct_text(&text)
            .await
            .map_err(PipelineError::Correction)?;
        info!("Correction call took {:?}", started.elapsed());

        Ok(PendingSolve {
            extraction,
            corrected: corrected_or(&corrected_text, &text),
        })
    }

    /// Second half of the three-step shape. A cancellation ends the run without error.
    pub async fn finish(
        &self,
        pending: PendingSolve,
        confirmation: Confirmation,
    ) -> Result<Option<SolveOutcome>, PipelineError> {
        let edited_text = match confirmation {
            Confirmation::Cancel => {
                info!("Solve cancelled before the solve call.");
                return Ok(None);
            }
            Confirmation::Confirm { edited_text } => edited_text,
        };

        let problem_text = edited_text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| pending.corrected.corrected_text.clone());

        let started = Instant::now();
        let reply = self
            .solver
            .solve_problem(&ProblemInput::Text(problem_text.clone()))
            .await
            .map_err(PipelineError::Solve)?;
        info!("Solve call took {:?}", started.elapsed());

        Ok(Some(SolveOutcome {
            extraction: pending.extraction,
            corrected: corrected_or(&reply.corrected_text, &problem_text),
            solution: solution_from(reply),
            shape: PipelineShape::ThreeStep,
        }))
    }
}

/// Uses the model's corrected text, falling back to the text it was given.
fn corrected_or(model_text: &str, source_text: &str) -> CorrectedProblem {
    let trimmed = model_text.trim();
    if trimmed.is_empty() {
        warn!("Model returned an empty corrected text; keeping the source text.");
        return CorrectedProblem {
            corrected_text: source_text.to_string(),
        };
    }
    CorrectedProblem {
        corrected_text: trimmed.to_string(),
    }
}

fn solution_from(reply: SolverReply) -> Solution {
    let non_blank = |lines: Vec<String>| -> Vec<String> {
        lines
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    };
    Solution {
        result_lines: non_blank(reply.solved_result),
        explanation_steps: non_blank(reply.explanation),
        graph: reply.graph,
    }
}
