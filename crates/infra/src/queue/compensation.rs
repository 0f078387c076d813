//! Compensation scope for quota-backed jobs.
//!
//! Every exit from a job that holds a quota reservation converges here:
//! panics become failures, failures are reported to both status sinks, and
//! the reservation is released exactly once.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, warn};

use groupchat_core::UserId;

use crate::repo::{ChatMessageStore, MessageUpdate, QueueStatusStore, QueueTaskStatus, QuotaLedger, TaskResult};

use super::group_chat::{GroupChatError, GroupChatPayload};
use super::task::TaskOutcome;
use super::worker::panic_message;

/// Owns a quota reservation until it is handed back to the ledger.
///
/// `release` consumes the guard; if the guard is dropped without it (a
/// panic escaped the scope), the reservation is released on drop instead.
#[must_use = "a reservation must be released"]
pub struct ReservationGuard<'a> {
    ledger: &'a dyn QuotaLedger,
    user_id: UserId,
    amount: i64,
    released: bool,
}

impl<'a> ReservationGuard<'a> {
    pub fn new(ledger: &'a dyn QuotaLedger, user_id: UserId, amount: i64) -> Self {
        Self {
            ledger,
            user_id,
            amount,
            released: false,
        }
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        // Flag first: a panicking ledger must not be called again from drop.
        self.released = true;

        if self.amount <= 0 {
            return;
        }

        match self.ledger.release(self.user_id, self.amount) {
            Ok(()) => debug!(user_id = %self.user_id, amount = self.amount, "released frozen quota"),
            Err(e) => error!(
                user_id = %self.user_id,
                amount = self.amount,
                error = %e,
                "failed to release frozen quota"
            ),
        }
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            warn!(user_id = %self.user_id, amount = self.amount, "releasing reservation during unwind");
            self.release_once();
        }
    }
}

/// Run `f`, turning a panic into `GroupChatError::UnexpectedCrash`.
pub fn contain_panics<T, F>(f: F) -> Result<T, GroupChatError>
where
    F: FnOnce() -> Result<T, GroupChatError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "group chat pipeline panicked");
            Err(GroupChatError::UnexpectedCrash(message))
        }
    }
}

/// The always-run cleanup scope around one group chat job.
pub struct Compensation<'a> {
    payload: &'a GroupChatPayload,
    messages: &'a dyn ChatMessageStore,
    queue: &'a dyn QueueStatusStore,
    reservation: ReservationGuard<'a>,
}

impl<'a> Compensation<'a> {
    /// Take ownership of the payload's reservation.
    pub fn begin(
        payload: &'a GroupChatPayload,
        ledger: &'a dyn QuotaLedger,
        messages: &'a dyn ChatMessageStore,
        queue: &'a dyn QueueStatusStore,
    ) -> Self {
        Self {
            payload,
            messages,
            queue,
            reservation: ReservationGuard::new(ledger, payload.user_id, payload.freezed_coins),
        }
    }

    /// Leave without running anything: no status is written, the
    /// reservation is still returned.
    pub fn discard(self) -> TaskOutcome {
        self.reservation.release();
        TaskOutcome::Discarded
    }

    /// Run the pipeline, then report and release.
    pub fn run<F>(self, pipeline: F) -> TaskOutcome
    where
        F: FnOnce() -> Result<(), GroupChatError>,
    {
        let outcome = match contain_panics(pipeline) {
            Ok(()) => TaskOutcome::Succeeded,
            Err(err) => {
                if !matches!(err, GroupChatError::UnexpectedCrash(_)) {
                    warn!(error = %err, "group chat job failed");
                }
                self.report_failure(&err);
                TaskOutcome::Failed {
                    errors: vec![err.to_string()],
                }
            }
        };

        self.reservation.release();
        outcome
    }

    /// Both writes are best-effort and independent. The two stores may end
    /// up disagreeing if exactly one write fails; that is only logged.
    fn report_failure(&self, err: &GroupChatError) {
        let text = err.to_string();
        let p = self.payload;

        if let Err(e) = self
            .messages
            .update_message(p.group_id, p.user_id, p.message_id, &MessageUpdate::failed(text.clone()))
        {
            error!(
                group_id = %p.group_id,
                message_id = %p.message_id,
                error = %e,
                "update chat message failed"
            );
        }

        if let Err(e) = self
            .queue
            .set_status(&p.id, QueueTaskStatus::Failed, &TaskResult::errors(vec![text]))
        {
            error!(error = %e, "update queue status failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{InMemoryQuotaLedger, QuotaUsedMeta};

    #[test]
    fn guard_releases_once_when_released_explicitly() {
        let ledger = InMemoryQuotaLedger::new();
        let user = UserId::new(1);
        ledger.deposit(user, 100).unwrap();
        ledger.freeze(user, 40).unwrap();

        let guard = ReservationGuard::new(&ledger, user, 40);
        assert_eq!(guard.amount(), 40);
        guard.release();

        let account = ledger.account(user);
        assert_eq!(account.frozen, 0);
        assert_eq!(account.released, 40);
    }

    #[test]
    fn guard_releases_on_unwind() {
        let ledger = InMemoryQuotaLedger::new();
        let user = UserId::new(1);
        ledger.deposit(user, 100).unwrap();
        ledger.freeze(user, 25).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| -> u8 {
            let _guard = ReservationGuard::new(&ledger, user, 25);
            panic!("status store exploded");
        }));

        assert!(result.is_err());
        assert_eq!(ledger.account(user).released, 25);
    }

    #[test]
    fn zero_reservation_never_touches_the_ledger() {
        let ledger = InMemoryQuotaLedger::new();
        let user = UserId::new(1);
        ledger.deposit(user, 10).unwrap();
        ledger.freeze(user, 10).unwrap();
        ledger.consume(user, 0, &QuotaUsedMeta::new("t", "m")).unwrap();

        ReservationGuard::new(&ledger, user, 0).release();
        assert_eq!(ledger.account(user).frozen, 10);
    }

    #[test]
    fn panics_become_unexpected_crash() {
        let err = contain_panics::<(), _>(|| panic!("index out of bounds")).unwrap_err();
        assert_eq!(err, GroupChatError::UnexpectedCrash("index out of bounds".to_string()));
        assert_eq!(err.to_string(), "panic: index out of bounds");

        let ok = contain_panics(|| Ok::<_, GroupChatError>(7)).unwrap();
        assert_eq!(ok, 7);
    }
}
