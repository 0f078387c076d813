//! Repository seams consumed by queue handlers.
//!
//! Each store is individually consistent; nothing here spans stores in a
//! transaction. In-memory implementations are for tests/dev.

pub mod chat_group;
pub mod free_chat;
pub mod queue_status;
pub mod quota;

pub use chat_group::{ChatMessageStore, InMemoryChatMessageStore, MessageKey, MessageStatus, MessageUpdate};
pub use free_chat::{FreeChatCounter, InMemoryFreeChatCounter};
pub use queue_status::{InMemoryQueueStatusStore, QueueRecord, QueueStatusStore, QueueTaskStatus, TaskResult};
pub use quota::{InMemoryQuotaLedger, QuotaAccount, QuotaLedger, QuotaUsage, QuotaUsedMeta};

/// Repository error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("insufficient quota: requested {requested}, available {available}")]
    InsufficientQuota { requested: i64, available: i64 },
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

pub(crate) fn poisoned() -> StoreError {
    StoreError::storage("lock poisoned")
}
