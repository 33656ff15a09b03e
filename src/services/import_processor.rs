//! Resident import JetStream processor
//!
//! Jobs are queued on a work-queue stream and processed one at a time by a
//! single durable consumer. Progress is published on
//! `desa.job.import.status.<jobId>`.
//!
//! ## Streams
//! - `DESA_IMPORT_JOBS` - resident spreadsheet imports

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use base64::Engine;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::batch_coordinator::{BatchCoordinator, ImportControl, ImportSettings};
use super::cancellation::CANCELLATION;
use super::civil_store::CivilStore;
use super::job_history::{FinishedJob, JOB_HISTORY};
use super::spreadsheet::parse_rows;
use crate::types::{
    ImportBatchResult, ImportFileSource, ImportJobRequest, ImportJobStatus, ImportJobStatusUpdate,
    ImportJobSubmitResponse, ImportProgress, QueuedImportJob, RawRow,
};

// Stream and consumer names
const STREAM_NAME: &str = "DESA_IMPORT_JOBS";
const CONSUMER_NAME: &str = "resident_import_workers";
const SUBJECT: &str = "desa.jobs.import.residents";
const STATUS_PREFIX: &str = "desa.job.import.status";

/// Reported when the file has no data rows
pub const EMPTY_FILE_ERROR: &str = "File Excel kosong";

fn status_subject(job_id: Uuid) -> String {
    format!("{}.{}", STATUS_PREFIX, job_id)
}

async fn publish_status(client: &Client, job_id: Uuid, status: ImportJobStatus) -> Result<()> {
    let update = ImportJobStatusUpdate::new(job_id, status);
    let payload = serde_json::to_vec(&update)?;
    client.publish(status_subject(job_id), payload.into()).await?;
    Ok(())
}

/// Resolve an uploaded file path inside `upload_dir`, refusing escapes
pub fn resolve_upload_path(upload_dir: &Path, path: &str) -> Result<PathBuf> {
    let requested = Path::new(path);
    if requested
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        bail!("Path upload tidak valid: {}", path);
    }
    if requested.starts_with(upload_dir) {
        Ok(requested.to_path_buf())
    } else {
        Ok(upload_dir.join(requested))
    }
}

/// Import job processor with JetStream integration
pub struct ImportProcessor {
    client: Client,
    js: JsContext,
    store: Arc<dyn CivilStore>,
    settings: ImportSettings,
    upload_dir: PathBuf,
    pending_count: AtomicU32,
}

impl ImportProcessor {
    /// Create a new import processor, initializing the JetStream stream
    pub async fn new(
        client: Client,
        store: Arc<dyn CivilStore>,
        settings: ImportSettings,
        upload_dir: PathBuf,
    ) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 1_000,
            max_bytes: 500 * 1024 * 1024, // inline spreadsheets can be large
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream import stream '{}' ready", STREAM_NAME);

        Ok(Self {
            client,
            js,
            store,
            settings,
            upload_dir,
            pending_count: AtomicU32::new(0),
        })
    }

    /// Submit an import job to the queue
    pub async fn submit_job(&self, user_id: Uuid, request: ImportJobRequest) -> Result<ImportJobSubmitResponse> {
        if let ImportFileSource::Path { path } = &request.source {
            resolve_upload_path(&self.upload_dir, path)?;
        }

        let job = QueuedImportJob::new(user_id, request);
        let job_id = job.id;

        let payload = serde_json::to_vec(&job)?;
        CANCELLATION.enqueue(job_id, user_id);
        if let Err(e) = self.publish_job(payload).await {
            CANCELLATION.discard(&job_id);
            return Err(e);
        }

        let pending = self.pending_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Import job {} ('{}') submitted, position {} in queue", job_id, job.request.filename, pending);

        publish_status(&self.client, job_id, ImportJobStatus::Queued { position: pending }).await?;

        Ok(ImportJobSubmitResponse {
            job_id,
            message: "Import data penduduk masuk antrian".to_string(),
        })
    }

    async fn publish_job(&self, payload: Vec<u8>) -> Result<()> {
        self.js.publish(SUBJECT, payload.into()).await?.await?;
        Ok(())
    }

    /// Name of the store backend imports are written to
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Jobs submitted but not yet picked up
    pub fn pending_jobs(&self) -> u32 {
        self.pending_count.load(Ordering::Relaxed)
    }

    /// Start processing import jobs from the queue
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_deliver: 3,
            ..Default::default()
        };

        let consumer = stream.get_or_create_consumer(CONSUMER_NAME, consumer_config).await?;
        info!("JetStream import consumer '{}' ready", CONSUMER_NAME);

        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    // Sequential: one import runs to completion before the next
                    if let Err(e) = self.process_job(msg).await {
                        error!("Failed to process import job: {}", e);
                    }
                }
                Err(e) => {
                    error!("Error receiving import message: {}", e);
                }
            }
        }

        Ok(())
    }

    async fn process_job(&self, msg: jetstream::Message) -> Result<()> {
        let job: QueuedImportJob = serde_json::from_slice(&msg.payload)?;
        let job_id = job.id;
        let started_at = Utc::now();
        let finished = || FinishedJob {
            id: job_id,
            user_id: job.user_id,
            filename: &job.request.filename,
            started_at,
        };

        let _ = self
            .pending_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));

        // ACK immediately to prevent redelivery during long processing
        if let Err(e) = msg.ack().await {
            error!("Failed to ack import job {}: {:?}", job_id, e);
        }

        let guard = CANCELLATION.register(job_id, job.user_id);
        if guard.token().is_cancelled() {
            info!("Import job {} was cancelled while queued", job_id);
            let result = ImportBatchResult {
                success: false,
                cancelled: true,
                ..ImportBatchResult::new(0)
            };
            publish_status(&self.client, job_id, ImportJobStatus::Cancelled { result: result.clone() }).await?;
            JOB_HISTORY.record_cancelled(finished(), &result);
            self.discard_upload(&job.request).await;
            return Ok(());
        }

        info!("Processing import job {} from file '{}'", job_id, job.request.filename);
        publish_status(&self.client, job_id, ImportJobStatus::Parsing).await?;

        let rows = match self.load_rows(&job.request).await {
            Ok(rows) if rows.is_empty() => Err(anyhow::anyhow!(EMPTY_FILE_ERROR)),
            other => other,
        };
        self.discard_upload(&job.request).await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                let error_msg = format!("{:#}", e);
                warn!("Import job {} failed: {}", job_id, error_msg);
                publish_status(&self.client, job_id, ImportJobStatus::Failed { error: error_msg.clone() }).await?;
                JOB_HISTORY.record_failed(finished(), error_msg);
                return Ok(());
            }
        };

        let (progress_tx, mut progress_rx) = watch::channel(ImportProgress {
            total: rows.len(),
            ..ImportProgress::default()
        });
        let client = self.client.clone();
        let forwarder = tokio::spawn(async move {
            while progress_rx.changed().await.is_ok() {
                let progress = *progress_rx.borrow_and_update();
                if let Err(e) = publish_status(&client, job_id, ImportJobStatus::Importing(progress)).await {
                    warn!("Failed to publish progress for import job {}: {}", job_id, e);
                }
            }
        });

        let control = ImportControl::new(guard.token()).with_progress(progress_tx);
        let coordinator = BatchCoordinator::new(self.store.as_ref(), self.settings.clone());
        let result = coordinator.import_rows_with(&rows, &control).await;

        // Closing the sender ends the forwarder
        drop(control);
        if let Err(e) = forwarder.await {
            warn!("Progress forwarder for import job {} ended abnormally: {}", job_id, e);
        }

        if result.cancelled {
            info!("Import job {} cancelled after {} of {} rows", job_id, result.processed(), result.total_records);
            JOB_HISTORY.record_cancelled(finished(), &result);
            publish_status(&self.client, job_id, ImportJobStatus::Cancelled { result }).await?;
        } else {
            info!(
                "Import job {} completed: {}/{} rows imported",
                job_id, result.success_count, result.total_records
            );
            JOB_HISTORY.record_completed(finished(), &result);
            publish_status(&self.client, job_id, ImportJobStatus::Completed { result }).await?;
        }

        Ok(())
    }

    async fn load_rows(&self, request: &ImportJobRequest) -> Result<Vec<RawRow>> {
        let content = match &request.source {
            ImportFileSource::Path { path } => {
                let path = resolve_upload_path(&self.upload_dir, path)?;
                tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Gagal membaca file {}", path.display()))?
            }
            ImportFileSource::Inline { content_base64 } => base64::engine::general_purpose::STANDARD
                .decode(content_base64.trim())
                .context("Isi file bukan base64 yang valid")?,
        };

        let filename = request.filename.clone();
        tokio::task::spawn_blocking(move || parse_rows(&filename, content)).await?
    }

    /// Remove an uploaded file once it has been read
    async fn discard_upload(&self, request: &ImportJobRequest) {
        if let ImportFileSource::Path { path } = &request.source {
            if let Ok(path) = resolve_upload_path(&self.upload_dir, path) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove uploaded file {}: {}", path.display(), e);
                }
            }
        }
    }
}
