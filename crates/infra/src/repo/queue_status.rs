use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{StoreError, poisoned};

/// Terminal status recorded for a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTaskStatus {
    Succeeded,
    Failed,
}

/// Result payload stored next to the status.
///
/// Serializes as `{}` on success and `{"errors": [...]}` on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskResult {
    Errors { errors: Vec<String> },
    Empty {},
}

impl TaskResult {
    pub fn empty() -> Self {
        Self::Empty {}
    }

    pub fn errors(errors: Vec<String>) -> Self {
        Self::Errors { errors }
    }
}

/// Job-status store.
pub trait QueueStatusStore: Send + Sync {
    fn set_status(&self, job_id: &str, status: QueueTaskStatus, result: &TaskResult) -> Result<(), StoreError>;
}

impl<S> QueueStatusStore for Arc<S>
where
    S: QueueStatusStore + ?Sized,
{
    fn set_status(&self, job_id: &str, status: QueueTaskStatus, result: &TaskResult) -> Result<(), StoreError> {
        (**self).set_status(job_id, status, result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub status: QueueTaskStatus,
    pub result: TaskResult,
    pub updated_at: DateTime<Utc>,
}

/// In-memory job-status store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryQueueStatusStore {
    records: RwLock<HashMap<String, Vec<QueueRecord>>>,
}

impl InMemoryQueueStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> Option<QueueRecord> {
        self.records.read().ok()?.get(job_id).and_then(|h| h.last().cloned())
    }

    /// Number of status writes recorded for a job.
    pub fn writes(&self, job_id: &str) -> usize {
        self.records
            .read()
            .ok()
            .and_then(|r| r.get(job_id).map(Vec::len))
            .unwrap_or(0)
    }
}

impl QueueStatusStore for InMemoryQueueStatusStore {
    fn set_status(&self, job_id: &str, status: QueueTaskStatus, result: &TaskResult) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.entry(job_id.to_string()).or_default().push(QueueRecord {
            status,
            result: result.clone(),
            updated_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_wire_shapes() {
        assert_eq!(serde_json::to_string(&TaskResult::empty()).unwrap(), "{}");
        assert_eq!(
            serde_json::to_value(TaskResult::errors(vec!["boom".into()])).unwrap(),
            serde_json::json!({"errors": ["boom"]})
        );

        let back: TaskResult = serde_json::from_str("{}").unwrap();
        assert_eq!(back, TaskResult::empty());
        let back: TaskResult = serde_json::from_str(r#"{"errors":["x"]}"#).unwrap();
        assert_eq!(back, TaskResult::errors(vec!["x".into()]));
    }

    #[test]
    fn store_tracks_latest_status() {
        let store = InMemoryQueueStatusStore::new();
        assert!(store.get("job-1").is_none());
        assert_eq!(store.writes("job-1"), 0);

        store
            .set_status("job-1", QueueTaskStatus::Failed, &TaskResult::errors(vec!["e".into()]))
            .unwrap();

        let record = store.get("job-1").unwrap();
        assert_eq!(record.status, QueueTaskStatus::Failed);
        assert_eq!(store.writes("job-1"), 1);
    }
}
