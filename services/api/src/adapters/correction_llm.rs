//! services/api/src/adapters/correction_llm.rs
//!
//! This module contains the adapter for the correction step of the three-step
//! pipeline. It implements the `TextCorrectionService` port.

use crate::adapters::chat::{complete_json, parse_json_reply, to_port_error};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs},
    Client,
};
use async_trait::async_trait;
use equation_ace_core::ports::{PortResult, TextCorrectionService};
use serde::Deserialize;

const CORRECTION_INSTRUCTIONS: &str = "You correct common OCR mistakes in handwritten math problems, such as 'O' read as '0', 'l' read as '1', or '^' written as '**'. Do not solve the problem. Reply with a JSON object {\"correctedText\": string} holding only the corrected problem.";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorrectionPayload {
    corrected_text: Option<String>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct OpenAiCorrectionAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCorrectionAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl TextCorrectionService for OpenAiCorrectionAdapter {
    /// An empty correction is passed through; the pipeline falls back to the input.
    async fn correct_text(&self, raw_text: &str) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(CORRECTION_INSTRUCTIONS)
                .build()
                .map_err(to_port_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!("Original OCR text: {}", raw_text))
                .build()
                .map_err(to_port_error)?
                .into(),
        ];

        let raw = complete_json(&self.client, &self.model, messages).await?;
        let payload: CorrectionPayload = parse_json_reply(&raw)?;
        Ok(payload.corrected_text.unwrap_or_default())
    }
}
