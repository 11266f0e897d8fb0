//! services/api/src/adapters/solver_llm.rs
//!
//! This module contains the adapter for the consolidated solving LLM.
//! It implements the `ProblemSolvingService` port from the `core` crate: one
//! call that reads an image (when given one), fixes recognition mistakes, and
//! solves the problem.

const SOLVER_INSTRUCTIONS: &str = r#"You are an expert mathematician who also specializes in fixing text-recognition mistakes.

You receive a math problem either as text or as an image. It may be a word problem, a bare equation, or a mix of both, and it may contain recognition or typing errors.

Step 1: Read and correct the problem.
- If you were given an image, first transcribe every bit of text in it into "ocrText". If the image holds no readable text, set "ocrText" to an empty string and leave the other fields empty.
- Quietly fix common mistakes in both the words and the mathematics, for example 'O' read as '0', 'l' as '1', 'S' as '5' or an integral sign, broken derivative notation such as 'd/dx' or 'dy/dx', probability and statistics notation such as 'P(A)', 'nCr', summation signs or '!', and exponents written as 'x2' instead of 'x^2'.
- Make sure the operators +, -, *, / are represented correctly.
- Put the clean problem in "correctedText".

Step 2: Solve the corrected problem.
- You handle word problems, algebra (solving for variables, simplifying, systems of equations), calculus (derivatives, integrals, limits, series), probability, and statistics (mean, median, mode, permutations, combinations, factorials, sums).
- Put the final answer lines in "solvedResult" and a detailed step-by-step explanation, one step per entry, in "explanation".
- If the problem is a 2D function of x such as y = 3x + 2 or f(x) = x^2 - 5, set "graphData.isPlottable" to true and put only the right-hand side expression in "graphData.functionStr", for example "3*x + 2" or "x^2 - 5". Never include "y =" or "f(x) =". Otherwise set "graphData.isPlottable" to false.

Reply with a single JSON object of this shape and nothing else:
{"ocrText": string, "correctedText": string, "solvedResult": [string], "explanation": [string], "graphData": {"isPlottable": boolean, "functionStr": string}}"#;

const TEXT_PROMPT: &str = "Problem text:\n{problem}";

const IMAGE_PROMPT: &str =
    "The problem is in the attached image. Transcribe it into ocrText, then correct and solve it.";

use crate::adapters::chat::{complete_json, parse_json_reply, to_port_error};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use equation_ace_core::{
    domain::{GraphSpec, ProblemInput, SolverReply},
    ports::{PortError, PortResult, ProblemSolvingService},
};
use serde::Deserialize;
use tracing::debug;

//=========================================================================================
// Wire Format
//=========================================================================================

/// Models sometimes answer a list field with a bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lines {
    One(String),
    Many(Vec<String>),
}

impl Lines {
    fn into_vec(self) -> Vec<String> {
        match self {
            Lines::One(line) => vec![line],
            Lines::Many(lines) => lines,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDataPayload {
    #[serde(default)]
    is_plottable: bool,
    function_str: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolverReplyPayload {
    ocr_text: Option<String>,
    corrected_text: Option<String>,
    solved_result: Option<Lines>,
    explanation: Option<Lines>,
    graph_data: Option<GraphDataPayload>,
}

/// Decodes the model's JSON into a `SolverReply`, normalizing the graph data.
pub fn parse_solver_reply(raw: &str) -> PortResult<SolverReply> {
    let payload: SolverReplyPayload = parse_json_reply(raw)?;
    Ok(SolverReply {
        ocr_text: payload.ocr_text,
        corrected_text: payload.corrected_text.unwrap_or_default(),
        solved_result: payload.solved_result.map(Lines::into_vec).unwrap_or_default(),
        explanation: payload.explanation.map(Lines::into_vec).unwrap_or_default(),
        graph: payload
            .graph_data
            .map(|g| GraphSpec::from_model(g.is_plottable, g.function_str.as_deref())),
    })
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ProblemSolvingService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiSolverAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiSolverAdapter {
    /// Creates a new `OpenAiSolverAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn user_message(input: &ProblemInput) -> PortResult<ChatCompletionRequestMessage> {
        let message = match input {
            ProblemInput::Text(statement) => ChatCompletionRequestUserMessageArgs::default()
                .content(TEXT_PROMPT.replace("{problem}", statement))
                .build(),
            ProblemInput::Image(image) => {
                let text = ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(IMAGE_PROMPT)
                    .build()
                    .map_err(to_port_error)?;
                let picture = ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(image.to_data_uri())
                            .detail(ImageDetail::High)
                            .build()
                            .map_err(to_port_error)?,
                    )
                    .build()
                    .map_err(to_port_error)?;
                ChatCompletionRequestUserMessageArgs::default()
                    .content(vec![text.into(), picture.into()])
                    .build()
            }
        };
        Ok(message.map_err(to_port_error)?.into())
    }
}

//=========================================================================================
// `ProblemSolvingService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProblemSolvingService for OpenAiSolverAdapter {
    async fn solve_problem(&self, input: &ProblemInput) -> PortResult<SolverReply> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SOLVER_INSTRUCTIONS)
                .build()
                .map_err(to_port_error)?
                .into(),
            Self::user_message(input)?,
        ];

        let raw = complete_json(&self.client, &self.model, messages).await?;
        debug!("Solver reply: {}", raw);
        parse_solver_reply(&raw).map_err(|e| match e {
            PortError::Unexpected(message) => PortError::Unexpected(format!("Solver: {}", message)),
            other => other,
        })
    }
}
