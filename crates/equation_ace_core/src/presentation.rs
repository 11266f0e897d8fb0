//! crates/equation_ace_core/src/presentation.rs
//!
//! Turns solve outcomes and history records into what the user sees.

use crate::domain::{GraphSpec, HistoryRecord, SolveOutcome};
use crate::plot::{sample, PlotDomain, PlotPoint};
use tracing::warn;

pub const NO_SOLUTION_PLACEHOLDER: &str = "No solution found.";

/// The displayable form of one result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultView {
    pub raw_text: Option<String>,
    pub corrected_text: String,
    pub result_lines: Vec<String>,
    pub explanation_steps: Vec<String>,
    pub graph: Option<GraphSpec>,
}

/// The graph panel, computed only when the user expands it.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphView {
    NotPlottable,
    Plot {
        expression: String,
        points: Vec<PlotPoint>,
    },
    Error {
        expression: String,
        message: String,
    },
}

impl ResultView {
    pub fn from_outcome(outcome: &SolveOutcome) -> Self {
        Self {
            raw_text: outcome.raw_text().map(str::to_string),
            corrected_text: outcome.corrected.corrected_text.clone(),
            result_lines: outcome.solution.result_lines.clone(),
            explanation_steps: outcome.solution.explanation_steps.clone(),
            graph: outcome.solution.graph.clone(),
        }
    }

    pub fn from_record(record: &HistoryRecord) -> Self {
        Self {
            raw_text: record.raw_text.clone(),
            corrected_text: record.corrected_text.clone(),
            result_lines: record.result_lines.clone(),
            explanation_steps: record.explanation_steps.clone(),
            graph: record.graph.clone(),
        }
    }

    pub fn no_solution_found(&self) -> bool {
        self.result_lines.is_empty()
    }

    /// The solution lines, or the placeholder when there are none.
    pub fn display_lines(&self) -> Vec<String> {
        if self.no_solution_found() {
            vec![NO_SOLUTION_PLACEHOLDER.to_string()]
        } else {
            self.result_lines.clone()
        }
    }

    pub fn render_graph(&self) -> GraphView {
        render_graph(self.graph.as_ref())
    }

    /// Plain-text export of the result.
    pub fn export_text(&self) -> String {
        let mut out = String::new();
        if let Some(raw) = &self.raw_text {
            out.push_str("Extracted Text:\n");
            out.push_str(raw);
            out.push_str("\n\n");
        }
        out.push_str("Problem:\n");
        out.push_str(&self.corrected_text);
        out.push_str("\n\nSolution:\n");
        for line in self.display_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        if !self.explanation_steps.is_empty() {
            out.push_str("\nExplanation:\n");
            for (i, step) in self.explanation_steps.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, step));
            }
        }
        if let Some(expression) = self.graph.as_ref().and_then(GraphSpec::function_expression) {
            out.push_str(&format!("\nGraph: y = {}\n", expression));
        }
        out
    }
}

/// Samples a graph spec over the default domain; errors stay inside the view.
pub fn render_graph(graph: Option<&GraphSpec>) -> GraphView {
    let Some(expression) = graph.and_then(GraphSpec::function_expression) else {
        return GraphView::NotPlottable;
    };
    match sample(expression, PlotDomain::default()) {
        Ok(points) => GraphView::Plot {
            expression: expression.to_string(),
            points,
        },
        Err(e) => {
            warn!("Plotting '{}' failed: {}", expression, e);
            GraphView::Error {
                expression: expression.to_string(),
                message: e.user_message().to_string(),
            }
        }
    }
}
