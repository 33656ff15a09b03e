//! Import job history
//!
//! Recent import outcomes kept in memory and mirrored to a JSON file so the
//! history survives worker restarts.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::ImportBatchResult;

const MAX_HISTORY_SIZE: usize = 100;
const HISTORY_FILE: &str = "logs/job-history.json";

/// Job type recorded for resident imports
pub const JOB_TYPE_RESIDENT_IMPORT: &str = "import.residents";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_type: String,
    pub filename: String,
    pub status: JobOutcome,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ImportBatchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryResponse {
    pub jobs: Vec<JobHistoryEntry>,
    pub total: usize,
}

/// One finished import, before it becomes a history entry
pub struct FinishedJob<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub filename: &'a str,
    pub started_at: DateTime<Utc>,
}

fn summary(result: &ImportBatchResult) -> String {
    format!(
        "{} berhasil, {} gagal dari {} baris",
        result.success_count, result.failed_count, result.total_records
    )
}

pub struct JobHistoryService {
    history: RwLock<VecDeque<JobHistoryEntry>>,
    file: Option<PathBuf>,
}

impl JobHistoryService {
    /// Service persisted to `logs/job-history.json`
    pub fn new() -> Self {
        let path = PathBuf::from(HISTORY_FILE);
        let mut deque = VecDeque::with_capacity(MAX_HISTORY_SIZE);
        if let Some(loaded) = load_from_disk(&path) {
            deque.extend(loaded.into_iter().take(MAX_HISTORY_SIZE));
            info!("Loaded {} job history entries from disk", deque.len());
        }
        Self {
            history: RwLock::new(deque),
            file: Some(path),
        }
    }

    /// Service without a backing file
    pub fn in_memory() -> Self {
        Self {
            history: RwLock::new(VecDeque::with_capacity(MAX_HISTORY_SIZE)),
            file: None,
        }
    }

    pub fn record_completed(&self, job: FinishedJob<'_>, result: &ImportBatchResult) {
        self.add_entry(job, JobOutcome::Completed, None, Some(result.clone()));
    }

    /// Cancelled jobs keep their partial report
    pub fn record_cancelled(&self, job: FinishedJob<'_>, result: &ImportBatchResult) {
        self.add_entry(job, JobOutcome::Cancelled, None, Some(result.clone()));
    }

    pub fn record_failed(&self, job: FinishedJob<'_>, error: String) {
        self.add_entry(job, JobOutcome::Failed, Some(error), None);
    }

    fn add_entry(
        &self,
        job: FinishedJob<'_>,
        status: JobOutcome,
        error: Option<String>,
        report: Option<ImportBatchResult>,
    ) {
        let completed_at = Utc::now();
        let entry = JobHistoryEntry {
            id: job.id,
            user_id: job.user_id,
            job_type: JOB_TYPE_RESIDENT_IMPORT.to_string(),
            filename: job.filename.to_string(),
            status,
            started_at: job.started_at,
            completed_at,
            duration_ms: (completed_at - job.started_at).num_milliseconds().max(0) as u64,
            error,
            details: report.as_ref().map(summary),
            report,
        };

        let mut history = self.history.write();
        if history.len() >= MAX_HISTORY_SIZE {
            history.pop_back();
        }
        history.push_front(entry);

        if let Some(path) = &self.file {
            save_to_disk(path, &history);
        }
    }

    /// Recent jobs of one user, newest first
    pub fn get_recent_for_user(&self, user_id: Uuid, limit: usize) -> JobHistoryResponse {
        let history = self.history.read();
        let jobs: Vec<JobHistoryEntry> = history
            .iter()
            .filter(|j| j.user_id == user_id)
            .take(limit)
            .cloned()
            .collect();
        let total = jobs.len();

        JobHistoryResponse { jobs, total }
    }
}

impl Default for JobHistoryService {
    fn default() -> Self {
        Self::new()
    }
}

fn load_from_disk(path: &Path) -> Option<Vec<JobHistoryEntry>> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Vec<JobHistoryEntry>>(&content) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!("Failed to parse job history file: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read job history file: {}", e);
            None
        }
    }
}

fn save_to_disk(path: &Path, history: &VecDeque<JobHistoryEntry>) {
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Failed to create job history directory: {}", e);
            return;
        }
    }
    match serde_json::to_string_pretty(history) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("Failed to write job history file: {}", e);
            }
        }
        Err(e) => warn!("Failed to serialize job history: {}", e),
    }
}

// Global instance for easy access
lazy_static::lazy_static! {
    pub static ref JOB_HISTORY: JobHistoryService = JobHistoryService::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(user_id: Uuid) -> FinishedJob<'static> {
        FinishedJob {
            id: Uuid::new_v4(),
            user_id,
            filename: "penduduk.xlsx",
            started_at: Utc::now() - chrono::Duration::seconds(2),
        }
    }

    fn report() -> ImportBatchResult {
        let mut result = ImportBatchResult::new(3);
        result.success_count = 2;
        result.failed_count = 1;
        result
    }

    #[test]
    fn test_completed_job_keeps_report() {
        let service = JobHistoryService::in_memory();
        let user_id = Uuid::new_v4();

        service.record_completed(job(user_id), &report());

        let history = service.get_recent_for_user(user_id, 10);
        assert_eq!(history.total, 1);
        let entry = &history.jobs[0];
        assert_eq!(entry.status, JobOutcome::Completed);
        assert_eq!(entry.job_type, JOB_TYPE_RESIDENT_IMPORT);
        assert_eq!(entry.details.as_deref(), Some("2 berhasil, 1 gagal dari 3 baris"));
        assert_eq!(entry.report.as_ref().map(|r| r.success_count), Some(2));
        assert!(entry.duration_ms >= 2000);
    }

    #[test]
    fn test_failed_job_has_error_and_no_report() {
        let service = JobHistoryService::in_memory();
        let user_id = Uuid::new_v4();

        service.record_failed(job(user_id), "File Excel kosong".into());

        let entry = &service.get_recent_for_user(user_id, 10).jobs[0];
        assert_eq!(entry.status, JobOutcome::Failed);
        assert_eq!(entry.error.as_deref(), Some("File Excel kosong"));
        assert!(entry.report.is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let service = JobHistoryService::in_memory();
        let user_id = Uuid::new_v4();
        for _ in 0..150 {
            service.record_cancelled(job(user_id), &report());
        }
        assert_eq!(service.get_recent_for_user(user_id, 500).jobs.len(), MAX_HISTORY_SIZE);
    }

    #[test]
    fn test_history_is_per_user_newest_first() {
        let service = JobHistoryService::in_memory();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        let first = job(user_a);
        let first_id = first.id;
        service.record_completed(first, &report());
        service.record_failed(job(user_b), "x".into());
        let second = job(user_a);
        let second_id = second.id;
        service.record_cancelled(second, &report());

        let history = service.get_recent_for_user(user_a, 10);
        let ids: Vec<Uuid> = history.jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second_id, first_id]);
        assert_eq!(service.get_recent_for_user(user_a, 1).jobs.len(), 1);
    }

    #[test]
    fn test_outcome_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&JobOutcome::Cancelled).unwrap(), "\"cancelled\"");
    }
}
