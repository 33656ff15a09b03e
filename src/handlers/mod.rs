//! NATS message handlers

pub mod import;
pub mod ping;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use tokio::select;
use tracing::{error, info};

use crate::services::import_processor::ImportProcessor;

/// Subscribe to the import subjects and run until a handler stops
pub async fn start_handlers(client: Client, processor: Arc<ImportProcessor>) -> Result<()> {
    info!("Starting message handlers...");

    let ping_sub = client.subscribe("desa.ping").await?;
    let submit_sub = client.subscribe("desa.import.submit").await?;
    let cancel_sub = client.subscribe("desa.import.cancel").await?;
    let history_sub = client.subscribe("desa.import.history").await?;

    let client_ping = client.clone();
    let processor_ping = Arc::clone(&processor);
    let ping_handle = tokio::spawn(async move { ping::handle_ping(client_ping, ping_sub, processor_ping).await });

    let client_submit = client.clone();
    let processor_submit = Arc::clone(&processor);
    let submit_handle =
        tokio::spawn(async move { import::handle_import_submit(client_submit, submit_sub, processor_submit).await });

    let client_cancel = client.clone();
    let cancel_handle = tokio::spawn(async move { import::handle_import_cancel(client_cancel, cancel_sub).await });

    let client_history = client.clone();
    let history_handle = tokio::spawn(async move { import::handle_import_history(client_history, history_sub).await });

    let processor_main = Arc::clone(&processor);
    let processing_handle = tokio::spawn(async move {
        if let Err(e) = processor_main.start_processing().await {
            error!("Import processor error: {:#}", e);
        }
    });

    info!("All handlers started, waiting for messages...");

    // Wait for any handler to finish (which means an error occurred)
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = submit_handle => {
            error!("Import submit handler finished: {:?}", result);
        }
        result = cancel_handle => {
            error!("Import cancel handler finished: {:?}", result);
        }
        result = history_handle => {
            error!("Import history handler finished: {:?}", result);
        }
        result = processing_handle => {
            error!("Import processor finished: {:?}", result);
        }
    }

    Ok(())
}
