//! Task routing by type name.

use std::collections::HashMap;

use super::task::{Task, TaskError, TaskOutcome};

/// Task handler function type.
pub type TaskHandler = Box<dyn Fn(&Task) -> Result<TaskOutcome, TaskError> + Send + Sync>;

/// Routes tasks to registered handlers.
///
/// Patterns: exact type name, `prefix.*` category, or `*` wildcard.
#[derive(Default)]
pub struct TaskMux {
    handlers: HashMap<String, TaskHandler>,
}

impl TaskMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type pattern.
    pub fn register_handler<F>(&mut self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Task) -> Result<TaskOutcome, TaskError> + Send + Sync + 'static,
    {
        self.handlers.insert(pattern.into(), Box::new(handler));
    }

    fn handler_for(&self, type_name: &str) -> Option<&TaskHandler> {
        // Try exact match first
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        // Try category match (e.g., "chat.*" matches "chat.group")
        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }

    pub fn dispatch(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let handler = self
            .handler_for(&task.type_name)
            .ok_or_else(|| TaskError::NoHandler(task.type_name.clone()))?;
        handler(task)
    }
}

impl core::fmt::Debug for TaskMux {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut patterns: Vec<_> = self.handlers.keys().collect();
        patterns.sort();
        f.debug_struct("TaskMux").field("patterns", &patterns).finish()
    }
}
