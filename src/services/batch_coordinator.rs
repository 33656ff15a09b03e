//! Batch coordinator: the import entry point
//!
//! A single linear pass over fixed-size chunks. Validation failures are
//! row-granular, write failures fail the whole family group, and only a
//! failure outside every family transaction aborts the job.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::civil_store::CivilStore;
use super::family_upserter::FamilyUpserter;
use super::import_error::ImportError;
use super::row_validator::{validate_row, ResidentRecord};
use crate::defaults::{DEFAULT_CHUNK_DELAY_MS, DEFAULT_CHUNK_SIZE, DEFAULT_LOCALITY_NAME, DEFAULT_STORE_TIMEOUT_MS};
use crate::types::{ImportBatchResult, ImportProgress, ImportRowError, RawRow};

/// Import tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub store_timeout: Duration,
    pub locality: String,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::from_millis(DEFAULT_CHUNK_DELAY_MS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            locality: DEFAULT_LOCALITY_NAME.to_string(),
        }
    }
}

/// Cancellation and progress reporting for one import
#[derive(Debug, Default)]
pub struct ImportControl {
    cancel: CancellationToken,
    progress: Option<watch::Sender<ImportProgress>>,
}

impl ImportControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, progress: None }
    }

    pub fn with_progress(mut self, progress: watch::Sender<ImportProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn report(&self, result: &ImportBatchResult) {
        if let Some(progress) = &self.progress {
            progress.send_replace(ImportProgress::of(result));
        }
    }
}

pub struct BatchCoordinator<'a> {
    store: &'a dyn CivilStore,
    settings: ImportSettings,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(store: &'a dyn CivilStore, settings: ImportSettings) -> Self {
        Self { store, settings }
    }

    /// Import `rows` to completion
    pub async fn import_rows(&self, rows: &[RawRow]) -> ImportBatchResult {
        self.import_rows_with(rows, &ImportControl::default()).await
    }

    /// Import `rows`, stopping between chunks when `control` is cancelled.
    /// Always returns a complete report.
    pub async fn import_rows_with(&self, rows: &[RawRow], control: &ImportControl) -> ImportBatchResult {
        let started = Instant::now();
        let mut result = ImportBatchResult::new(rows.len());
        let chunk_size = self.settings.chunk_size.max(1);
        let chunk_count = rows.len().div_ceil(chunk_size);

        info!(
            "Importing {} rows in {} chunk(s) of {} using {} store",
            rows.len(),
            chunk_count,
            chunk_size,
            self.store.name()
        );

        let mut upserter = FamilyUpserter::new(self.store, self.settings.locality.clone(), self.settings.store_timeout);

        match upserter.prepare().await {
            Ok(()) => {
                for (index, chunk) in rows.chunks(chunk_size).enumerate() {
                    if control.is_cancelled() {
                        info!("Import cancelled before chunk {}/{}", index + 1, chunk_count);
                        result.cancelled = true;
                        break;
                    }

                    self.process_chunk(&mut upserter, chunk, index * chunk_size, &mut result).await;
                    control.report(&result);
                    info!(
                        "Chunk {}/{} done: {} ok, {} failed so far",
                        index + 1,
                        chunk_count,
                        result.success_count,
                        result.failed_count
                    );

                    if index + 1 < chunk_count && !self.settings.chunk_delay.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(self.settings.chunk_delay) => {}
                            _ = control.cancel.cancelled() => {}
                        }
                    }
                }
            }
            Err(err) => abort(&mut result, &err),
        }

        result.success = result.failed_count == 0 && !result.cancelled;
        result.duration = started.elapsed().as_millis() as u64;
        result.processed_at = Utc::now();

        info!(
            "Import finished in {} ms: {} ok, {} failed of {}{}",
            result.duration,
            result.success_count,
            result.failed_count,
            result.total_records,
            if result.cancelled { " (cancelled)" } else { "" }
        );
        result
    }

    async fn process_chunk(
        &self,
        upserter: &mut FamilyUpserter<'_>,
        chunk: &[RawRow],
        offset: usize,
        result: &mut ImportBatchResult,
    ) {
        for (family_card_number, members) in group_by_family(chunk, offset, result) {
            match upserter.upsert_family(&family_card_number, &members).await {
                Ok(write) => result.success_count += write.residents,
                Err(err) => {
                    warn!(
                        "Family {} failed ({} row(s)): {}",
                        family_card_number,
                        members.len(),
                        err
                    );
                    let message = err.to_string();
                    for member in &members {
                        result.failed_count += 1;
                        result
                            .errors
                            .push(ImportRowError::for_row(member.row_number, &member.raw, message.clone()));
                    }
                }
            }
        }
    }
}

/// Validate a chunk and group valid rows by family card number, in order of
/// first appearance. Invalid rows are recorded in `result`.
fn group_by_family(
    chunk: &[RawRow],
    offset: usize,
    result: &mut ImportBatchResult,
) -> Vec<(String, Vec<ResidentRecord>)> {
    let mut groups: Vec<(String, Vec<ResidentRecord>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (i, raw) in chunk.iter().enumerate() {
        let row_number = offset + i + 1;
        match validate_row(row_number, raw) {
            Ok(record) => match positions.get(&record.family_card_number) {
                Some(&position) => groups[position].1.push(record),
                None => {
                    positions.insert(record.family_card_number.clone(), groups.len());
                    groups.push((record.family_card_number.clone(), vec![record]));
                }
            },
            Err(message) => {
                result.failed_count += 1;
                result.errors.push(ImportRowError::for_row(row_number, raw, message));
            }
        }
    }

    groups
}

/// Mark every row not yet processed as failed after a job-level error
fn abort(result: &mut ImportBatchResult, err: &ImportError) {
    let remaining = result.total_records.saturating_sub(result.processed());
    error!("Import aborted, {} row(s) not processed: {}", remaining, err);
    result.failed_count += remaining;
    result.errors.push(ImportRowError {
        row: 0,
        nik: None,
        nama: None,
        error: format!("Fatal error: {}", err),
        data: None,
    });
}
