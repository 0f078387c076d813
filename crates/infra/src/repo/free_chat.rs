use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use groupchat_core::UserId;

use super::{StoreError, poisoned};

/// Per-user, per-model counter of requests exempt from charge.
pub trait FreeChatCounter: Send + Sync {
    fn remaining_free_requests(&self, user_id: UserId, model: &str) -> Result<i64, StoreError>;

    /// Record one chat request against the user's free allowance.
    fn increment_free_usage(&self, user_id: UserId, model: &str) -> Result<(), StoreError>;
}

impl<C> FreeChatCounter for Arc<C>
where
    C: FreeChatCounter + ?Sized,
{
    fn remaining_free_requests(&self, user_id: UserId, model: &str) -> Result<i64, StoreError> {
        (**self).remaining_free_requests(user_id, model)
    }

    fn increment_free_usage(&self, user_id: UserId, model: &str) -> Result<(), StoreError> {
        (**self).increment_free_usage(user_id, model)
    }
}

/// In-memory counter for tests/dev.
///
/// Only models with a configured allowance are tracked; usage of other
/// models is ignored.
#[derive(Debug, Default)]
pub struct InMemoryFreeChatCounter {
    allowances: RwLock<HashMap<String, i64>>,
    used: Mutex<HashMap<(UserId, String), i64>>,
}

impl InMemoryFreeChatCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowance(self, model: impl Into<String>, requests: i64) -> Self {
        if let Ok(mut allowances) = self.allowances.write() {
            allowances.insert(model.into(), requests.max(0));
        }
        self
    }

    pub fn used(&self, user_id: UserId, model: &str) -> i64 {
        self.used
            .lock()
            .ok()
            .and_then(|u| u.get(&(user_id, model.to_string())).copied())
            .unwrap_or(0)
    }
}

impl FreeChatCounter for InMemoryFreeChatCounter {
    fn remaining_free_requests(&self, user_id: UserId, model: &str) -> Result<i64, StoreError> {
        let allowance = {
            let allowances = self.allowances.read().map_err(|_| poisoned())?;
            match allowances.get(model) {
                Some(a) => *a,
                None => return Ok(0),
            }
        };
        Ok((allowance - self.used(user_id, model)).max(0))
    }

    fn increment_free_usage(&self, user_id: UserId, model: &str) -> Result<(), StoreError> {
        let tracked = self
            .allowances
            .read()
            .map_err(|_| poisoned())?
            .contains_key(model);
        if !tracked {
            return Ok(());
        }

        let mut used = self.used.lock().map_err(|_| poisoned())?;
        *used.entry((user_id, model.to_string())).or_insert(0) += 1;
        Ok(())
    }
}
