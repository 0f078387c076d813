//! Delivered task and handler outcome types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Task type routed to the group chat handler.
pub const TYPE_GROUP_CHAT: &str = "group_chat";

/// A unit of work as delivered by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub type_name: String,
    pub payload: serde_json::Value,
}

impl Task {
    pub fn new(type_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }

    pub fn from_payload<T: Serialize>(type_name: impl Into<String>, payload: &T) -> Result<Self, TaskError> {
        Ok(Self::new(type_name, serde_json::to_value(payload)?))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        Ok(T::deserialize(&self.payload)?)
    }
}

/// How a handled task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Work done; statuses recorded.
    Succeeded,
    /// Not executed (e.g. too old); nothing recorded.
    Discarded,
    /// Work failed; failure recorded.
    Failed { errors: Vec<String> },
}

/// Errors that prevent a handler from taking ownership of a task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("no handler for task type: {0}")]
    NoHandler(String),
    #[error("invalid task payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn payload_decodes_into_typed_value() {
        let task = Task::from_payload("ping", &Ping { n: 3 }).unwrap();
        assert_eq!(task.decode::<Ping>().unwrap(), Ping { n: 3 });

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "ping");
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let task = Task::new("ping", serde_json::json!({"n": "three"}));
        assert!(matches!(task.decode::<Ping>(), Err(TaskError::Decode(_))));
    }
}
