//! OpenAI-compatible chat completions client (blocking).
//!
//! API-level errors that come back with a structured error body are surfaced
//! in-band through `ChatResponse::error_code`; anything else is an `AiError`.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use groupchat_ai::{AiError, ChatClient, ChatRequest, ChatResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    /// Providers send a string, a number or null here.
    #[serde(default)]
    code: Option<JsonValue>,
}

impl ApiError {
    fn code(&self) -> Option<String> {
        match &self.code {
            Some(JsonValue::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => self.kind.clone().filter(|k| !k.is_empty()),
        }
    }
}

/// Chat client for any `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    endpoint: String,
    api_key: Option<String>,
    http: Client,
}

impl OpenAiChatClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, AiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChatClient for OpenAiChatClient {
    fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AiError> {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .map_err(|e| AiError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| AiError::Transport(e.to_string()))?;

        if !status.is_success() {
            return api_error(status.as_u16(), &body);
        }
        parse_completion(&body)
    }
}

fn api_error(status: u16, body: &str) -> Result<ChatResponse, AiError> {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let code = envelope.error.code().unwrap_or_else(|| status.to_string());
            Ok(ChatResponse::failed(code, envelope.error.message))
        }
        Err(_) => Err(AiError::Upstream {
            status,
            body: body.to_string(),
        }),
    }
}

fn parse_completion(body: &str) -> Result<ChatResponse, AiError> {
    let completion: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| AiError::Transport(format!("invalid completion body: {e}")))?;

    match completion.choices.into_iter().next() {
        Some(choice) => Ok(ChatResponse::text(choice.message.content.unwrap_or_default())),
        None => Ok(ChatResponse::failed("empty_response", "no choices returned")),
    }
}
