// This is the entry point of the moderation worker.
//
// **Architecture Overview:**
// - `core/` = Business logic (models, ports, worker, admin surface)
// - `infra/` = Implementations of core traits (SQLite, NATS JetStream, HTTP)
// - `cli/` = Operator command line
// - `config/` = Environment-driven settings
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Either run the worker until Ctrl+C or execute one admin command

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "cli/cli_layer.rs"]
mod cli;
#[path = "config/app_config.rs"]
mod config;
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::core::ai::AiProvider;
use crate::core::moderation::{
    ContentStore, JobStore, ModerationAdminService, ModerationClassifier, ModerationProducer,
    ModerationWorker, QueueTransport,
};
use crate::infra::ai::ChatCompletionsClient;
use crate::infra::database::connect_sqlite;
use crate::infra::moderation::{NatsQueue, SqliteContentStore, SqliteJobStore};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Initialize logging so we can see what's happening (RUST_LOG filters)
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let pool = connect_sqlite(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    let job_store = SqliteJobStore::new(pool.clone());
    job_store
        .migrate()
        .await
        .context("Failed to migrate job ledger")?;
    let content_store = SqliteContentStore::new(pool);
    content_store
        .migrate()
        .await
        .context("Failed to migrate content tables")?;

    let jobs: Arc<dyn JobStore> = Arc::new(job_store);
    let content: Arc<dyn ContentStore> = Arc::new(content_store);
    let queue: Arc<dyn QueueTransport> = Arc::new(NatsQueue::new(config.nats.clone()));

    let command = cli.command.unwrap_or(Command::Worker);
    if !matches!(command, Command::Worker) {
        let producer = ModerationProducer::new(Arc::clone(&jobs), Arc::clone(&queue));
        let admin =
            ModerationAdminService::new(Arc::clone(&jobs), Arc::clone(&content), producer.clone());
        return cli::run_admin_command(command, &producer, &admin).await;
    }

    // ========================================================================
    // WORKER
    // ========================================================================

    let ai_client = ChatCompletionsClient::new(
        config.classifier.base_url.clone(),
        config.classifier.api_key.clone(),
        config.classifier.timeout,
    )
    .context("Failed to create classifier HTTP client")?;
    let provider: Box<dyn AiProvider> = Box::new(ai_client);
    let classifier = Arc::new(ModerationClassifier::new(
        provider,
        config.classifier.ai.clone(),
    ));

    tracing::info!(
        database = %config.database_url,
        nats = %config.nats.url,
        classifier = %config.classifier.base_url,
        model = %config.classifier.ai.model,
        "Moderation worker configured"
    );

    let worker = ModerationWorker::new(jobs, content, queue, classifier, config.worker.clone());

    // Ctrl+C stops the worker between (or in the middle of) messages.
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    worker.run(shutdown).await;
    Ok(())
}
