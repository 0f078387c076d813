//! `groupchat-ai`
//!
//! **Responsibility:** the inference-side boundary of the group chat worker.
//!
//! This crate only describes *how* the worker talks to a chat model:
//! - model catalog lookups and pricing
//! - context-window preparation and token counting
//! - the chat client seam (HTTP adapters live in `groupchat-infra`)
//!
//! It knows nothing about quotas, queues or message stores.

pub mod client;
pub mod context;
pub mod error;
pub mod message;
pub mod model;
pub mod pricing;
pub mod tokens;

pub use client::{ChatClient, ChatRequest, ChatResponse};
pub use context::{ContextPolicy, ContextPreparer, PreparedRequest, WindowedContextPreparer};
pub use error::AiError;
pub use message::{ChatMessage, ChatMessages, Role};
pub use model::{ChatModel, InMemoryModelCatalog, ModelCatalog, ModelStatus};
pub use pricing::{PerThousandTokenPricing, Pricing};
pub use tokens::{TiktokenCounter, TokenCounter};
