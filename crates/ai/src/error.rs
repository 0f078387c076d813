use thiserror::Error;

/// Failure reported by an inference-side collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    #[error("invalid chat request: {0}")]
    InvalidInput(String),

    #[error("context too large: {tokens} tokens exceeds limit of {limit}")]
    ContextTooLarge { tokens: usize, limit: usize },

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("internal error: {0}")]
    Internal(String),
}
