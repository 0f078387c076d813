//! Queue-side job execution.
//!
//! ## Components
//!
//! - `Task` / `TaskOutcome`: what the delivery system hands over and what a handler reports back
//! - `TaskMux`: routes tasks to handlers by type name
//! - `WorkerPool`: threads pulling from a `TaskSource`
//! - `GroupChatHandler`: the group chat answer job
//! - `Compensation`: the always-run scope that reports failures and returns frozen quota
//!
//! Delivery guarantees (retries, redelivery, dead-lettering) belong to the
//! task source. Handlers do not deduplicate redelivered tasks.

pub mod compensation;
pub mod group_chat;
pub mod mux;
pub mod task;
pub mod worker;

pub use compensation::{Compensation, ReservationGuard, contain_panics};
pub use group_chat::{
    GroupChatDeps, GroupChatError, GroupChatHandler, GroupChatPayload, GroupChatSettings, QUOTA_TAG_GROUP_CHAT,
    new_group_chat_task,
};
pub use mux::{TaskHandler, TaskMux};
pub use task::{TYPE_GROUP_CHAT, Task, TaskError, TaskOutcome};
pub use worker::{InMemoryTaskQueue, SourceError, TaskSource, WorkerPool, WorkerPoolConfig, WorkerPoolHandle, WorkerStats};
