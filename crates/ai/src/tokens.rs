//! Token counting for prompts and completions.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::error::AiError;
use crate::message::ChatMessage;

/// Tokens every message costs on top of its role and content.
const TOKENS_PER_MESSAGE: usize = 3;

/// Tokens the provider adds to prime the assistant reply.
const REPLY_PRIMING_TOKENS: usize = 3;

pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, messages: &[ChatMessage], model: &str) -> Result<usize, AiError>;
}

impl<T> TokenCounter for Arc<T>
where
    T: TokenCounter + ?Sized,
{
    fn count_tokens(&self, messages: &[ChatMessage], model: &str) -> Result<usize, AiError> {
        (**self).count_tokens(messages, model)
    }
}

/// BPE counter using the `cl100k_base` encoding for every model.
///
/// Counts follow the chat-format accounting: a fixed overhead per message,
/// the encoded role and content, and a reply primer for non-empty input.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    pub fn cl100k() -> Result<Self, AiError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| AiError::Tokenizer(format!("failed to load cl100k_base: {e}")))?;
        Ok(Self { bpe })
    }

    fn encoded_len(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl core::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TiktokenCounter")
            .field("encoding", &"cl100k_base")
            .finish()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, messages: &[ChatMessage], _model: &str) -> Result<usize, AiError> {
        if messages.is_empty() {
            return Ok(0);
        }

        let body: usize = messages
            .iter()
            .map(|m| TOKENS_PER_MESSAGE + self.encoded_len(m.role.as_str()) + self.encoded_len(&m.content))
            .sum();

        Ok(body + REPLY_PRIMING_TOKENS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_costs_nothing() {
        let counter = TiktokenCounter::cl100k().unwrap();
        assert_eq!(counter.count_tokens(&[], "gpt-4o").unwrap(), 0);
    }

    #[test]
    fn longer_content_costs_more() {
        let counter = TiktokenCounter::cl100k().unwrap();
        let short = counter
            .count_tokens(&[ChatMessage::user("hello")], "gpt-4o")
            .unwrap();
        let long = counter
            .count_tokens(
                &[ChatMessage::user("hello there, how is the weather today in the mountains?")],
                "gpt-4o",
            )
            .unwrap();

        // overhead + role + content + primer
        assert!(short > TOKENS_PER_MESSAGE + REPLY_PRIMING_TOKENS);
        assert!(long > short);
    }

    #[test]
    fn each_message_adds_overhead() {
        let counter = TiktokenCounter::cl100k().unwrap();
        let one = counter.count_tokens(&[ChatMessage::user("a")], "m").unwrap();
        let two = counter
            .count_tokens(&[ChatMessage::user("a"), ChatMessage::user("a")], "m")
            .unwrap();
        assert_eq!(two - one, one - REPLY_PRIMING_TOKENS);
    }
}
