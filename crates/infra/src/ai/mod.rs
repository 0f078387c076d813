//! Inference adapters.

pub mod openai;

pub use openai::OpenAiChatClient;
