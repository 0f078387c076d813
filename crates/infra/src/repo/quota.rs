//! Quota ledger.
//!
//! A user's quota has a total `balance` and a `frozen` part held in escrow
//! for queued work. Reservations are per job but `frozen` is per user, so
//! consumption only debits the balance and leaves escrow alone. Releasing a
//! job's full reservation afterwards nets out to `reserved - consumed` back
//! to the available balance, without touching other jobs' escrow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use groupchat_core::UserId;

use super::{StoreError, poisoned};

/// Why quota was consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsedMeta {
    pub tag: String,
    pub model: String,
}

impl QuotaUsedMeta {
    pub fn new(tag: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            model: model.into(),
        }
    }
}

/// Resource ledger operations used by job handlers.
pub trait QuotaLedger: Send + Sync {
    /// Permanently charge `amount` to the user.
    fn consume(&self, user_id: UserId, amount: i64, meta: &QuotaUsedMeta) -> Result<(), StoreError>;

    /// Unfreeze a job's reservation. Never unfreezes more than is frozen.
    fn release(&self, user_id: UserId, amount: i64) -> Result<(), StoreError>;
}

impl<L> QuotaLedger for Arc<L>
where
    L: QuotaLedger + ?Sized,
{
    fn consume(&self, user_id: UserId, amount: i64, meta: &QuotaUsedMeta) -> Result<(), StoreError> {
        (**self).consume(user_id, amount, meta)
    }

    fn release(&self, user_id: UserId, amount: i64) -> Result<(), StoreError> {
        (**self).release(user_id, amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub amount: i64,
    pub meta: QuotaUsedMeta,
    pub at: DateTime<Utc>,
}

/// Snapshot of one user's quota bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaAccount {
    pub balance: i64,
    pub frozen: i64,
    /// Total charged so far.
    pub used: i64,
    /// Total unfrozen by `release` calls.
    pub released: i64,
    pub usages: Vec<QuotaUsage>,
}

impl QuotaAccount {
    /// Spendable quota: balance not held in escrow.
    pub fn available(&self) -> i64 {
        self.balance - self.frozen
    }
}

/// In-memory ledger for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryQuotaLedger {
    accounts: Mutex<HashMap<UserId, QuotaAccount>>,
}

impl InMemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, user_id: UserId, amount: i64) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().map_err(|_| poisoned())?;
        accounts.entry(user_id).or_default().balance += amount.max(0);
        Ok(())
    }

    /// Reserve quota ahead of enqueueing work.
    pub fn freeze(&self, user_id: UserId, amount: i64) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().map_err(|_| poisoned())?;
        let account = accounts.entry(user_id).or_default();
        let amount = amount.max(0);
        if account.available() < amount {
            return Err(StoreError::InsufficientQuota {
                requested: amount,
                available: account.available(),
            });
        }
        account.frozen += amount;
        Ok(())
    }

    pub fn account(&self, user_id: UserId) -> QuotaAccount {
        self.accounts
            .lock()
            .ok()
            .and_then(|a| a.get(&user_id).cloned())
            .unwrap_or_default()
    }
}

impl QuotaLedger for InMemoryQuotaLedger {
    fn consume(&self, user_id: UserId, amount: i64, meta: &QuotaUsedMeta) -> Result<(), StoreError> {
        if amount <= 0 {
            return Ok(());
        }
        let mut accounts = self.accounts.lock().map_err(|_| poisoned())?;
        let account = accounts.entry(user_id).or_default();

        account.balance -= amount;
        account.used += amount;
        account.usages.push(QuotaUsage {
            amount,
            meta: meta.clone(),
            at: Utc::now(),
        });
        Ok(())
    }

    fn release(&self, user_id: UserId, amount: i64) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().map_err(|_| poisoned())?;
        let account = accounts.entry(user_id).or_default();

        let effective = amount.max(0).min(account.frozen);
        account.frozen -= effective;
        account.released += effective;
        Ok(())
    }
}
