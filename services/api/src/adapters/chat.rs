//! services/api/src/adapters/chat.rs
//!
//! Plumbing shared by the chat-completion adapters: sending a request that
//! must answer with a JSON object, and decoding that object.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{ChatCompletionRequestMessage, CreateChatCompletionRequestArgs, ResponseFormat},
    Client,
};
use equation_ace_core::ports::{PortError, PortResult};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

pub(crate) fn to_port_error(e: OpenAIError) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Sends the messages in JSON mode and returns the text of the first choice.
pub(crate) async fn complete_json(
    client: &Client<OpenAIConfig>,
    model: &str,
    messages: Vec<ChatCompletionRequestMessage>,
) -> PortResult<String> {
    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages(messages)
        .response_format(ResponseFormat::JsonObject)
        .n(1)
        .build()
        .map_err(to_port_error)?;

    let response = client.chat().create(request).await.map_err(to_port_error)?;

    let choice = response.choices.into_iter().next().ok_or_else(|| {
        PortError::Unexpected("Language model returned no choices in its response.".to_string())
    })?;
    choice.message.content.ok_or_else(|| {
        PortError::Unexpected("Language model response contained no text content.".to_string())
    })
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").expect("static regex is valid")
    })
}

/// Decodes a JSON reply, tolerating a surrounding markdown code fence.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> PortResult<T> {
    let body = match code_fence().captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    };
    serde_json::from_str(body).map_err(|e| {
        PortError::Unexpected(format!("Language model reply was not the expected JSON: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Reply {
        value: u32,
    }

    #[test]
    fn plain_json_is_decoded() {
        let reply: Reply = parse_json_reply(r#" {"value": 4} "#).unwrap();
        assert_eq!(reply, Reply { value: 4 });
    }

    #[test]
    fn fenced_json_is_decoded() {
        let reply: Reply = parse_json_reply("```json\n{\"value\": 7}\n```").unwrap();
        assert_eq!(reply, Reply { value: 7 });
    }

    #[test]
    fn prose_is_rejected() {
        let err = parse_json_reply::<Reply>("The answer is 7.").unwrap_err();
        assert!(matches!(err, PortError::Unexpected(_)));
    }
}
