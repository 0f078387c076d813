use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use groupchat_core::{GroupId, MessageId, UserId};

use super::{StoreError, poisoned};

/// State of an answer message in a chat group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Waiting,
    Succeeded,
    Failed,
}

/// Update written to a chat-group message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
    /// Generated text, or the error text on failure.
    pub message: String,
    pub token_consumed: i64,
    pub quota_consumed: i64,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageUpdate {
    pub fn succeeded(message: impl Into<String>, token_consumed: i64, quota_consumed: i64) -> Self {
        Self {
            message: message.into(),
            token_consumed,
            quota_consumed,
            status: MessageStatus::Succeeded,
            error: None,
        }
    }

    /// The error text doubles as the visible message body.
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            message: error.clone(),
            token_consumed: 0,
            quota_consumed: 0,
            status: MessageStatus::Failed,
            error: Some(error),
        }
    }
}

/// Row key of a chat-group message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub message_id: MessageId,
}

impl MessageKey {
    pub fn new(group_id: GroupId, user_id: UserId, message_id: MessageId) -> Self {
        Self {
            group_id,
            user_id,
            message_id,
        }
    }
}

/// Message-record store.
pub trait ChatMessageStore: Send + Sync {
    fn update_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        message_id: MessageId,
        update: &MessageUpdate,
    ) -> Result<(), StoreError>;
}

impl<S> ChatMessageStore for Arc<S>
where
    S: ChatMessageStore + ?Sized,
{
    fn update_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        message_id: MessageId,
        update: &MessageUpdate,
    ) -> Result<(), StoreError> {
        (**self).update_message(group_id, user_id, message_id, update)
    }
}

/// In-memory message store for tests/dev.
///
/// Keeps every write per row so callers can inspect the update history.
#[derive(Debug, Default)]
pub struct InMemoryChatMessageStore {
    rows: RwLock<HashMap<MessageKey, Vec<MessageUpdate>>>,
}

impl InMemoryChatMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest state of a row.
    pub fn get(&self, key: MessageKey) -> Option<MessageUpdate> {
        self.rows.read().ok()?.get(&key).and_then(|h| h.last().cloned())
    }

    /// All writes applied to a row, oldest first.
    pub fn history(&self, key: MessageKey) -> Vec<MessageUpdate> {
        self.rows
            .read()
            .ok()
            .and_then(|rows| rows.get(&key).cloned())
            .unwrap_or_default()
    }
}

impl ChatMessageStore for InMemoryChatMessageStore {
    fn update_message(
        &self,
        group_id: GroupId,
        user_id: UserId,
        message_id: MessageId,
        update: &MessageUpdate,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        rows.entry(MessageKey::new(group_id, user_id, message_id))
            .or_default()
            .push(update.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MessageKey {
        MessageKey::new(GroupId::new(1), UserId::new(2), MessageId::new(3))
    }

    #[test]
    fn failed_update_mirrors_error_into_message() {
        let update = MessageUpdate::failed("chat failed: boom");
        assert_eq!(update.message, "chat failed: boom");
        assert_eq!(update.error.as_deref(), Some("chat failed: boom"));
        assert_eq!(update.status, MessageStatus::Failed);
    }

    #[test]
    fn rows_keep_their_history() {
        let store = InMemoryChatMessageStore::new();
        let k = key();

        store
            .update_message(k.group_id, k.user_id, k.message_id, &MessageUpdate::succeeded("hi", 10, 2))
            .unwrap();
        store
            .update_message(k.group_id, k.user_id, k.message_id, &MessageUpdate::failed("late"))
            .unwrap();

        assert_eq!(store.history(k).len(), 2);
        assert_eq!(store.get(k).unwrap().status, MessageStatus::Failed);

        let other = MessageKey::new(GroupId::new(1), UserId::new(2), MessageId::new(4));
        assert!(store.get(other).is_none());
    }
}
