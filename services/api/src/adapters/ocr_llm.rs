//! services/api/src/adapters/ocr_llm.rs
//!
//! This module contains the adapter for the text-extraction (OCR) step of the
//! three-step pipeline. It implements the `TextExtractionService` port.

use crate::adapters::chat::{complete_json, parse_json_reply, to_port_error};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use equation_ace_core::{
    domain::ImageBlob,
    ports::{PortResult, TextExtractionService},
};
use serde::Deserialize;

const OCR_INSTRUCTIONS: &str = "You are an OCR expert. Extract the math problem from the image exactly as written, without solving or correcting it. Reply with a JSON object {\"ocrText\": string}. Use an empty string when the image contains no text.";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcrPayload {
    ocr_text: Option<String>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct OpenAiOcrAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOcrAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl TextExtractionService for OpenAiOcrAdapter {
    async fn extract_text(&self, image: &ImageBlob) -> PortResult<String> {
        let prompt = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text("Extract the equation from this image.")
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

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(OCR_INSTRUCTIONS)
                .build()
                .map_err(to_port_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(vec![prompt.into(), picture.into()])
                .build()
                .map_err(to_port_error)?
                .into(),
        ];

        let raw = complete_json(&self.client, &self.model, messages).await?;
        let payload: OcrPayload = parse_json_reply(&raw)?;
        Ok(payload.ocr_text.unwrap_or_default())
    }
}
