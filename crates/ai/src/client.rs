use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AiError;
use crate::message::ChatMessages;

/// A chat completion request addressed to an upstream model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Upstream model name (not the catalog selector).
    pub model: String,
    pub messages: ChatMessages,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: ChatMessages) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Result of a chat call.
///
/// Providers may report failures in-band: a non-empty `error_code` means the
/// call did not produce a usable answer even though the transport succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ChatResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn failed(error_code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            error: error.into(),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error_code.is_empty()
    }
}

/// The external generation capability.
pub trait ChatClient: Send + Sync {
    fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AiError>;
}

impl<C> ChatClient for Arc<C>
where
    C: ChatClient + ?Sized,
{
    fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AiError> {
        (**self).chat(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_band_errors_are_detected() {
        assert!(!ChatResponse::text("hello").is_error());

        let failed = ChatResponse::failed("rate_limited", "slow down");
        assert!(failed.is_error());
        assert!(failed.text.is_empty());
    }

    #[test]
    fn optional_sampling_fields_are_omitted() {
        let req = ChatRequest::new("m", vec![]);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }
}
