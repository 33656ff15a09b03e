//! Ping handler for health checks

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::services::import_processor::ImportProcessor;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PongResponse {
    status: String,
    store: String,
    pending_jobs: u32,
    timestamp: String,
}

fn pong(processor: &ImportProcessor) -> PongResponse {
    PongResponse {
        status: "ok".to_string(),
        store: processor.store_name().to_string(),
        pending_jobs: processor.pending_jobs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Answer desa.ping with the worker's store backend and queue depth
pub async fn handle_ping(client: Client, mut subscriber: Subscriber, processor: Arc<ImportProcessor>) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ping message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                error!("Ping message without reply subject");
                continue;
            }
        };

        let response_bytes = serde_json::to_vec(&pong(&processor))?;
        client.publish(reply, response_bytes.into()).await?;
    }

    Ok(())
}
