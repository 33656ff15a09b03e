//! Errors raised while writing one family group

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Tanggal lahir tidak valid untuk NIK {nik}: {value}")]
    InvalidBirthDate { nik: String, value: String },

    #[error("Operasi database '{operation}' melebihi batas waktu {timeout_ms} ms")]
    StoreTimeout { operation: &'static str, timeout_ms: u64 },

    #[error("{0:#}")]
    Store(#[from] anyhow::Error),
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;

/// Run one store call under `limit`; a timeout fails only the current group.
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> ImportResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ImportError::Store),
        Err(_) => Err(ImportError::StoreTimeout {
            operation,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
