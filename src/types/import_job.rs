//! Import job types for JetStream-based async processing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ImportBatchResult, ImportProgress};

/// Where the uploaded spreadsheet lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImportFileSource {
    /// File already stored on the worker's upload volume
    #[serde(rename_all = "camelCase")]
    Path { path: String },
    /// Whole file inlined in the message
    #[serde(rename_all = "camelCase")]
    Inline { content_base64: String },
}

/// Request to import a resident spreadsheet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobRequest {
    pub filename: String,
    pub source: ImportFileSource,
}

/// Job as stored in the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedImportJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub request: ImportJobRequest,
}

impl QueuedImportJob {
    pub fn new(user_id: Uuid, request: ImportJobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            submitted_at: Utc::now(),
            request,
        }
    }
}

/// Response to a job submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobSubmitResponse {
    pub job_id: Uuid,
    pub message: String,
}

/// Request to cancel a queued or running job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobCancelRequest {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobCancelResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
    pub message: String,
}

/// Status of an import job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ImportJobStatus {
    /// Waiting in queue
    #[serde(rename_all = "camelCase")]
    Queued { position: u32 },
    /// Reading the spreadsheet
    Parsing,
    /// Rows are being written
    Importing(ImportProgress),
    #[serde(rename_all = "camelCase")]
    Completed { result: ImportBatchResult },
    #[serde(rename_all = "camelCase")]
    Cancelled { result: ImportBatchResult },
    #[serde(rename_all = "camelCase")]
    Failed { error: String },
}

/// Status update message published on `desa.job.import.status.<jobId>`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStatusUpdate {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: ImportJobStatus,
}

impl ImportJobStatusUpdate {
    pub fn new(job_id: Uuid, status: ImportJobStatus) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
        }
    }
}
