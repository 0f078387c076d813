//! Context-window preparation.
//!
//! A conversation history is bounded before it is sent upstream: only the
//! most recent turns are kept, then the oldest remaining history is dropped
//! until the prompt fits a soft token target. A prompt that still exceeds the
//! hard limit is rejected.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::client::ChatRequest;
use crate::error::AiError;
use crate::message::{ChatMessage, Role};
use crate::tokens::TokenCounter;

/// Bounds applied to a conversation before inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextPolicy {
    /// Turns of history kept (one turn = user + assistant).
    pub max_turns: usize,
    /// Hard prompt ceiling in tokens.
    pub max_tokens: usize,
    /// Soft prompt goal; history is dropped until the prompt fits it.
    pub target_tokens: usize,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            max_turns: 5,
            max_tokens: 1024 * 200,
            target_tokens: 2000,
        }
    }
}

/// A request ready for inference.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub request: ChatRequest,
    /// Prompt size after trimming.
    pub prompt_tokens: usize,
    /// History messages removed from the original request.
    pub dropped_messages: usize,
}

pub trait ContextPreparer: Send + Sync {
    fn prepare(&self, request: ChatRequest, policy: &ContextPolicy) -> Result<PreparedRequest, AiError>;
}

impl<P> ContextPreparer for Arc<P>
where
    P: ContextPreparer + ?Sized,
{
    fn prepare(&self, request: ChatRequest, policy: &ContextPolicy) -> Result<PreparedRequest, AiError> {
        (**self).prepare(request, policy)
    }
}

/// Sliding-window preparer.
///
/// Leading system messages are always kept. The final message (the current
/// question) is never dropped.
#[derive(Debug, Clone)]
pub struct WindowedContextPreparer<T> {
    counter: T,
}

impl<T: TokenCounter> WindowedContextPreparer<T> {
    pub fn new(counter: T) -> Self {
        Self { counter }
    }

    fn total(&self, system: &[ChatMessage], history: &VecDeque<ChatMessage>, model: &str) -> Result<usize, AiError> {
        let joined: Vec<ChatMessage> = system.iter().chain(history.iter()).cloned().collect();
        self.counter.count_tokens(&joined, model)
    }
}

impl<T: TokenCounter> ContextPreparer for WindowedContextPreparer<T> {
    fn prepare(&self, request: ChatRequest, policy: &ContextPolicy) -> Result<PreparedRequest, AiError> {
        if request.messages.is_empty() {
            return Err(AiError::InvalidInput("chat request has no messages".to_string()));
        }

        let ChatRequest {
            model,
            messages,
            max_tokens,
            temperature,
        } = request;
        let original_len = messages.len();

        let leading = messages.iter().take_while(|m| m.role == Role::System).count();
        let mut system = messages;
        let rest = system.split_off(leading);

        let keep = policy.max_turns.saturating_mul(2).saturating_add(1);
        let skip = rest.len().saturating_sub(keep);
        let mut history: VecDeque<ChatMessage> = rest.into_iter().skip(skip).collect();

        let mut total = self.total(&system, &history, &model)?;
        while total > policy.target_tokens && history.len() > 1 {
            history.pop_front();
            total = self.total(&system, &history, &model)?;
        }

        if total > policy.max_tokens {
            return Err(AiError::ContextTooLarge {
                tokens: total,
                limit: policy.max_tokens,
            });
        }

        system.extend(history);
        let dropped_messages = original_len - system.len();

        Ok(PreparedRequest {
            request: ChatRequest {
                model,
                messages: system,
                max_tokens,
                temperature,
            },
            prompt_tokens: total,
            dropped_messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// One token per whitespace-separated word, no overhead.
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count_tokens(&self, messages: &[ChatMessage], _model: &str) -> Result<usize, AiError> {
            Ok(messages.iter().map(|m| m.content.split_whitespace().count()).sum())
        }
    }

    fn preparer() -> WindowedContextPreparer<WordCounter> {
        WindowedContextPreparer::new(WordCounter)
    }

    fn policy(max_turns: usize, max_tokens: usize, target_tokens: usize) -> ContextPolicy {
        ContextPolicy {
            max_turns,
            max_tokens,
            target_tokens,
        }
    }

    fn conversation(turns: usize) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system("you are helpful")];
        for i in 0..turns {
            messages.push(ChatMessage::user(format!("question {i}")));
            messages.push(ChatMessage::assistant(format!("answer {i}")));
        }
        messages.push(ChatMessage::user("latest question"));
        messages
    }

    #[test]
    fn keeps_only_recent_turns() {
        let req = ChatRequest::new("m", conversation(8));
        let prepared = preparer().prepare(req, &policy(5, 10_000, 10_000)).unwrap();

        let msgs = &prepared.request.messages;
        // system + 5 turns + latest question
        assert_eq!(msgs.len(), 1 + 10 + 1);
        assert_eq!(msgs[0], ChatMessage::system("you are helpful"));
        assert_eq!(msgs[1], ChatMessage::user("question 3"));
        assert_eq!(msgs.last().unwrap(), &ChatMessage::user("latest question"));
        assert_eq!(prepared.dropped_messages, 6);
    }

    #[test]
    fn trims_toward_target_but_keeps_the_question() {
        let req = ChatRequest::new("m", conversation(3));
        let prepared = preparer().prepare(req, &policy(5, 10_000, 6)).unwrap();

        let msgs = &prepared.request.messages;
        // system (3) + "answer 2" (2) + question (2) is still over 6, so only the
        // question survives next to the system prompt.
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1], ChatMessage::user("latest question"));
        assert_eq!(prepared.prompt_tokens, 5);
    }

    #[test]
    fn over_hard_limit_is_rejected() {
        let req = ChatRequest::new("m", vec![ChatMessage::user("one two three four five")]);
        let err = preparer().prepare(req, &policy(5, 4, 2)).unwrap_err();
        assert_eq!(err, AiError::ContextTooLarge { tokens: 5, limit: 4 });
    }

    #[test]
    fn empty_request_is_rejected() {
        let err = preparer()
            .prepare(ChatRequest::new("m", vec![]), &ContextPolicy::default())
            .unwrap_err();
        assert!(matches!(err, AiError::InvalidInput(_)));
    }

    #[test]
    fn default_policy_matches_worker_limits() {
        let p = ContextPolicy::default();
        assert_eq!(p.max_turns, 5);
        assert_eq!(p.max_tokens, 204_800);
        assert_eq!(p.target_tokens, 2000);
    }

    proptest! {
        /// Trimming never reorders messages and never drops the final one.
        #[test]
        fn result_is_an_ordered_suffix_plus_system(
            turns in 0usize..20,
            max_turns in 0usize..8,
            target in 0usize..40,
        ) {
            let messages = conversation(turns);
            let last = messages.last().cloned().unwrap();
            let req = ChatRequest::new("m", messages.clone());

            let prepared = preparer().prepare(req, &policy(max_turns, usize::MAX, target)).unwrap();
            let out = prepared.request.messages;

            prop_assert_eq!(&out[0], &messages[0]);
            prop_assert_eq!(out.last().unwrap(), &last);
            let tail = &out[1..];
            prop_assert_eq!(tail, &messages[messages.len() - tail.len()..]);
            prop_assert_eq!(prepared.dropped_messages, messages.len() - out.len());
        }
    }
}
