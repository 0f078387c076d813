//! Group chat queue worker.
//!
//! Reads JSON-encoded tasks (one per line) from stdin, runs them on a worker
//! pool and exits once stdin is closed and every task has finished.

use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use groupchat_ai::{InMemoryModelCatalog, PerThousandTokenPricing, TiktokenCounter, WindowedContextPreparer};
use groupchat_core::SystemClock;
use groupchat_infra::ai::OpenAiChatClient;
use groupchat_infra::config::WorkerConfig;
use groupchat_infra::queue::{
    GroupChatDeps, GroupChatHandler, InMemoryTaskQueue, Task, TaskMux, WorkerPool, WorkerPoolConfig,
};
use groupchat_infra::repo::{
    InMemoryChatMessageStore, InMemoryFreeChatCounter, InMemoryQueueStatusStore, InMemoryQuotaLedger,
};

fn main() -> anyhow::Result<()> {
    groupchat_observability::init();

    let config = WorkerConfig::from_env().context("failed to load worker config")?;
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY not set; sending unauthenticated requests");
    }

    let catalog = InMemoryModelCatalog::new();
    for model in &config.models {
        catalog.insert(model.clone());
    }

    let tokens = Arc::new(TiktokenCounter::cl100k().context("failed to load tokenizer")?);
    let client = Arc::new(OpenAiChatClient::new(
        &config.openai_base_url,
        config.openai_api_key.clone(),
        config.request_timeout,
    )
    .context("failed to build chat client")?);

    // Stores are process-local until real adapters are wired in.
    let deps = GroupChatDeps {
        models: Arc::new(catalog),
        context: Arc::new(WindowedContextPreparer::new(tokens.clone())),
        client: client.clone(),
        tokens,
        pricing: Arc::new(PerThousandTokenPricing),
        free_chat: Arc::new(InMemoryFreeChatCounter::new()),
        messages: Arc::new(InMemoryChatMessageStore::new()),
        queue: Arc::new(InMemoryQueueStatusStore::new()),
        ledger: Arc::new(InMemoryQuotaLedger::new()),
        clock: Arc::new(SystemClock),
    };

    let handler = Arc::new(GroupChatHandler::new(deps).with_settings(config.group_chat));
    let mut mux = TaskMux::new();
    handler.register(&mut mux);

    let source = Arc::new(InMemoryTaskQueue::new());
    let pool_config = WorkerPoolConfig::default()
        .with_name("group-chat")
        .with_concurrency(config.workers)
        .with_poll_interval(config.poll_interval);
    let pool = WorkerPool::spawn(Arc::new(mux), source.clone(), pool_config).context("failed to spawn workers")?;

    info!(
        workers = config.workers,
        endpoint = client.endpoint(),
        "group chat worker started"
    );

    for (n, line) in io::stdin().lock().lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "stdin read failed; draining");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Task>(&line) {
            Ok(task) => {
                if let Err(e) = source.push(task) {
                    warn!(error = %e, "task queue closed; draining");
                    break;
                }
            }
            Err(e) => warn!(line = n + 1, error = %e, "skipping malformed task"),
        }
    }

    source.close();
    let stats = pool.join();
    info!(
        processed = stats.tasks_processed,
        succeeded = stats.tasks_succeeded,
        discarded = stats.tasks_discarded,
        failed = stats.tasks_failed,
        rejected = stats.tasks_rejected,
        uptime_secs = stats.uptime_secs,
        "group chat worker stopped"
    );
    Ok(())
}

