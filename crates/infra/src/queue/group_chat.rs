//! Group chat job: an AI member answers a question in a chat group.
//!
//! Quota for the answer is frozen before the job is enqueued. The handler
//! runs the chat call inside a [`Compensation`] scope so the reservation is
//! returned and a terminal status is reported on every exit.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use groupchat_ai::{
    AiError, ChatClient, ChatMessage, ChatMessages, ChatModel, ChatRequest, ContextPolicy, ContextPreparer,
    ModelCatalog, Pricing, TokenCounter,
};
use groupchat_core::{Clock, GroupId, MemberId, MessageId, UserId};

use crate::repo::{
    ChatMessageStore, FreeChatCounter, MessageUpdate, QueueStatusStore, QueueTaskStatus, QuotaLedger,
    QuotaUsedMeta, StoreError, TaskResult,
};

use super::compensation::Compensation;
use super::mux::TaskMux;
use super::task::{TYPE_GROUP_CHAT, Task, TaskError, TaskOutcome};

/// Ledger tag for quota charged by group chat answers.
pub const QUOTA_TAG_GROUP_CHAT: &str = "group_chat";

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Job envelope for one group chat answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupChatPayload {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "GroupId::is_zero")]
    pub group_id: GroupId,
    #[serde(default, skip_serializing_if = "UserId::is_zero")]
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "MemberId::is_zero")]
    pub member_id: MemberId,
    #[serde(default, skip_serializing_if = "MessageId::is_zero")]
    pub question_id: MessageId,
    #[serde(default, skip_serializing_if = "MessageId::is_zero")]
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_messages: ChatMessages,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    /// Quota frozen at enqueue time, held until this job finishes.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub freezed_coins: i64,
}

impl GroupChatPayload {
    /// Title shown in queue listings.
    pub fn title(&self) -> &'static str {
        "群聊"
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn uid(&self) -> UserId {
        self.user_id
    }

    /// Group chat jobs are not tied to a quota row.
    pub fn quota_id(&self) -> i64 {
        0
    }

    pub fn quota(&self) -> i64 {
        0
    }

    /// A job is stale once `now` is past `created_at + horizon`.
    pub fn is_stale(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        self.created_at
            .checked_add_signed(horizon)
            .is_some_and(|deadline| now > deadline)
    }
}

/// Build a `group_chat` task, assigning a job ID when the payload has none.
pub fn new_group_chat_task(mut payload: GroupChatPayload) -> Result<Task, TaskError> {
    if payload.id.is_empty() {
        payload.set_id(uuid::Uuid::now_v7().to_string());
    }
    Task::from_payload(TYPE_GROUP_CHAT, &payload)
}

/// Why a group chat job failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupChatError {
    #[error("model {0} not found or disabled")]
    ModelUnavailable(String),

    #[error("fix chat request failed: {0}")]
    ContextPreparationFailed(AiError),

    /// Transport/client failure or an in-band error code from the model.
    #[error("chat failed: {0}")]
    InferenceFailed(String),

    #[error("update chat message failed: {0}")]
    PersistenceFailed(StoreError),

    #[error("panic: {0}")]
    UnexpectedCrash(String),
}

impl From<AiError> for GroupChatError {
    fn from(e: AiError) -> Self {
        Self::InferenceFailed(e.to_string())
    }
}

/// Tunables for the group chat handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupChatSettings {
    /// Jobs older than this are discarded without running.
    pub stale_after: Duration,
    pub context: ContextPolicy,
}

impl Default for GroupChatSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::minutes(15),
            context: ContextPolicy::default(),
        }
    }
}

/// Collaborators the handler calls into.
#[derive(Clone)]
pub struct GroupChatDeps {
    pub models: Arc<dyn ModelCatalog>,
    pub context: Arc<dyn ContextPreparer>,
    pub client: Arc<dyn ChatClient>,
    pub tokens: Arc<dyn TokenCounter>,
    pub pricing: Arc<dyn Pricing>,
    pub free_chat: Arc<dyn FreeChatCounter>,
    pub messages: Arc<dyn ChatMessageStore>,
    pub queue: Arc<dyn QueueStatusStore>,
    pub ledger: Arc<dyn QuotaLedger>,
    pub clock: Arc<dyn Clock>,
}

/// Token and quota accounting for one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChatUsage {
    input_tokens: i64,
    output_tokens: i64,
    quota_consumed: i64,
}

impl ChatUsage {
    fn token_consumed(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

pub struct GroupChatHandler {
    deps: GroupChatDeps,
    settings: GroupChatSettings,
}

impl GroupChatHandler {
    pub fn new(deps: GroupChatDeps) -> Self {
        Self {
            deps,
            settings: GroupChatSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: GroupChatSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Route `group_chat` tasks on `mux` to this handler.
    pub fn register(self: Arc<Self>, mux: &mut TaskMux) {
        mux.register_handler(TYPE_GROUP_CHAT, move |task| self.handle(task));
    }

    /// Decode and execute a delivered task.
    ///
    /// A payload that does not decode is returned as an error without any
    /// compensation: there is no reservation to attribute it to.
    pub fn handle(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let payload: GroupChatPayload = task.decode()?;
        Ok(self.execute(&payload))
    }

    pub fn execute(&self, payload: &GroupChatPayload) -> TaskOutcome {
        let span = info_span!(
            "group_chat",
            job_id = %payload.id,
            user_id = %payload.user_id,
            model = %payload.model_id,
        );
        let _enter = span.enter();

        let scope = Compensation::begin(
            payload,
            self.deps.ledger.as_ref(),
            self.deps.messages.as_ref(),
            self.deps.queue.as_ref(),
        );

        if payload.is_stale(self.deps.clock.now(), self.settings.stale_after) {
            info!(created_at = %payload.created_at, "discarding stale group chat job");
            return scope.discard();
        }

        scope.run(|| self.run_pipeline(payload))
    }

    fn run_pipeline(&self, payload: &GroupChatPayload) -> Result<(), GroupChatError> {
        let model = self
            .deps
            .models
            .model(&payload.model_id)
            .filter(ChatModel::is_enabled)
            .ok_or_else(|| GroupChatError::ModelUnavailable(payload.model_id.clone()))?;

        let request = ChatRequest::new(model.model_id.clone(), payload.context_messages.clone());
        let prepared = self
            .deps
            .context
            .prepare(request, &self.settings.context)
            .map_err(GroupChatError::ContextPreparationFailed)?;
        debug!(
            prompt_tokens = prepared.prompt_tokens,
            dropped_messages = prepared.dropped_messages,
            "prepared chat context"
        );
        let request = prepared.request;

        let response = self.deps.client.chat(&request)?;
        if response.is_error() {
            return Err(GroupChatError::InferenceFailed(format!(
                "{} {}",
                response.error_code, response.error
            )));
        }

        let usage = self.account(&model, &request, &response.text, payload.user_id);

        let update = MessageUpdate::succeeded(response.text, usage.token_consumed(), usage.quota_consumed);
        self.deps
            .messages
            .update_message(payload.group_id, payload.user_id, payload.message_id, &update)
            .map_err(GroupChatError::PersistenceFailed)?;

        // Past this point the answer is visible; secondary failures are only logged.
        if usage.quota_consumed > 0 {
            let meta = QuotaUsedMeta::new(QUOTA_TAG_GROUP_CHAT, request.model.clone());
            if let Err(e) = self.deps.ledger.consume(payload.user_id, usage.quota_consumed, &meta) {
                error!(amount = usage.quota_consumed, error = %e, "used quota add failed");
            }
        }

        if let Err(e) = self.deps.free_chat.increment_free_usage(payload.user_id, &request.model) {
            error!(error = %e, "update free chat count failed");
        }

        if let Err(e) = self
            .deps
            .queue
            .set_status(&payload.id, QueueTaskStatus::Succeeded, &TaskResult::empty())
        {
            error!(error = %e, "update queue status failed");
        }

        info!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            quota_consumed = usage.quota_consumed,
            "group chat job succeeded"
        );
        Ok(())
    }

    fn account(&self, model: &ChatModel, request: &ChatRequest, answer: &str, user_id: UserId) -> ChatUsage {
        let input_tokens = self.count_tokens(&request.messages, &request.model);
        let output_tokens = self.count_tokens(&[ChatMessage::assistant(answer)], &request.model);

        let free_left = self
            .deps
            .free_chat
            .remaining_free_requests(user_id, &request.model)
            .unwrap_or_else(|e| {
                warn!(error = %e, "free chat lookup failed; charging normally");
                0
            });

        let quota_consumed = if free_left > 0 {
            0
        } else {
            self.deps.pricing.cost(model, input_tokens, output_tokens)
        };

        ChatUsage {
            input_tokens,
            output_tokens,
            quota_consumed,
        }
    }

    fn count_tokens(&self, messages: &[ChatMessage], model: &str) -> i64 {
        match self.deps.tokens.count_tokens(messages, model) {
            Ok(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Err(e) => {
                warn!(error = %e, "token counting failed; recording 0");
                0
            }
        }
    }
}
