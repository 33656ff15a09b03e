//! Configuration management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::defaults::{
    DEFAULT_CHUNK_DELAY_MS, DEFAULT_CHUNK_SIZE, DEFAULT_LOCALITY_NAME, DEFAULT_NATS_URL, DEFAULT_STORE_BACKEND,
    DEFAULT_STORE_TIMEOUT_MS, DEFAULT_UPLOAD_DIR,
};
use crate::services::batch_coordinator::ImportSettings;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Optional NATS credentials
    pub nats_user: Option<String>,
    pub nats_password: Option<String>,

    /// PostgreSQL connection string, required by the postgres store
    pub database_url: Option<String>,

    /// "postgres" or "memory"
    pub store_backend: String,

    /// Uploaded spreadsheets are read from here
    pub upload_dir: PathBuf,

    pub import: ImportSettings,
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", name, raw)),
        None => Ok(default),
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(env_var)
    }

    /// Load configuration with `STORE_BACKEND` forced to `backend`
    pub fn from_env_with_backend(backend: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|name| match name {
            "STORE_BACKEND" => Some(backend.to_string()),
            _ => env_var(name),
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let nats_url = lookup("NATS_URL").unwrap_or_else(|| DEFAULT_NATS_URL.to_string());
        let store_backend = lookup("STORE_BACKEND")
            .unwrap_or_else(|| DEFAULT_STORE_BACKEND.to_string())
            .to_lowercase();
        let database_url = lookup("DATABASE_URL");

        match store_backend.as_str() {
            "postgres" if database_url.is_none() => bail!("DATABASE_URL must be set for STORE_BACKEND=postgres"),
            "postgres" | "memory" => {}
            other => bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        }

        let chunk_size: usize = parse_var(&lookup, "IMPORT_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        if chunk_size == 0 {
            bail!("IMPORT_CHUNK_SIZE must be greater than 0");
        }
        let chunk_delay_ms: u64 = parse_var(&lookup, "IMPORT_CHUNK_DELAY_MS", DEFAULT_CHUNK_DELAY_MS)?;
        let store_timeout_ms: u64 = parse_var(&lookup, "IMPORT_STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?;

        Ok(Self {
            nats_url,
            nats_user: lookup("NATS_USER"),
            nats_password: lookup("NATS_PASSWORD"),
            database_url,
            store_backend,
            upload_dir: PathBuf::from(lookup("UPLOAD_DIR").unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string())),
            import: ImportSettings {
                chunk_size,
                chunk_delay: Duration::from_millis(chunk_delay_ms),
                store_timeout: Duration::from_millis(store_timeout_ms),
                locality: lookup("IMPORT_LOCALITY_NAME").unwrap_or_else(|| DEFAULT_LOCALITY_NAME.to_string()),
            },
        })
    }
}
