//! Desa Import Worker - bulk resident imports for the village registry
//!
//! The worker connects to NATS, queues uploaded spreadsheets and writes the
//! families they describe into the civil registry.

mod cli;
mod config;
mod db;
mod defaults;
mod handlers;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::services::batch_coordinator::BatchCoordinator;
use crate::services::civil_store::{create_store, CivilStore};
use crate::services::import_processor::ImportProcessor;
use crate::services::spreadsheet::parse_rows;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,desa_import_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Migrate => migrate().await,
        Command::Import { file, dry_run } => import_file(&file, dry_run).await,
    }
}

async fn migrate() -> Result<()> {
    let config = Config::from_env()?;
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to run migrations")?;

    let pool = db::create_pool(database_url).await?;
    info!("Connected to PostgreSQL");
    db::run_migrations(&pool).await
}

/// Build the configured store, running migrations for postgres
async fn open_store(config: &Config) -> Result<Box<dyn CivilStore>> {
    let pool = match (config.store_backend.as_str(), config.database_url.as_deref()) {
        ("postgres", Some(database_url)) => {
            let pool = db::create_pool(database_url).await?;
            info!("Connected to PostgreSQL");
            db::run_migrations(&pool).await?;
            Some(pool)
        }
        _ => None,
    };

    let store = create_store(&config.store_backend, pool)?;
    info!("Civil store initialized: {}", store.name());
    Ok(store)
}

async fn import_file(file: &Path, dry_run: bool) -> Result<()> {
    let config = if dry_run {
        Config::from_env_with_backend("memory")?
    } else {
        Config::from_env()?
    };
    let store = open_store(&config).await?;

    let filename = file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Invalid file name: {}", file.display()))?
        .to_string();
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let rows = tokio::task::spawn_blocking(move || parse_rows(&filename, content)).await??;
    info!("Parsed {} rows from {}", rows.len(), file.display());

    let coordinator = BatchCoordinator::new(store.as_ref(), config.import.clone());
    let result = coordinator.import_rows(&rows).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn serve() -> Result<()> {
    info!("Starting Desa Import Worker...");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");

    let store: Arc<dyn CivilStore> = Arc::from(open_store(&config).await?);

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (&config.nats_user, &config.nats_password) {
        (Some(user), Some(password)) => {
            async_nats::ConnectOptions::new()
                .user_and_password(user.clone(), password.clone())
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let processor = Arc::new(
        ImportProcessor::new(
            nats_client.clone(),
            store,
            config.import.clone(),
            config.upload_dir.clone(),
        )
        .await?,
    );

    // Start message handlers
    let handler_result = handlers::start_handlers(nats_client, processor).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}
