//! `groupchat-core`: shared building blocks.
//!
//! Identifiers for rows in the external chat-group store, plus the clock
//! abstraction used to age queued jobs. No IO lives here.

pub mod clock;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use id::{GroupId, MemberId, MessageId, UserId};
