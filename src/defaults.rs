//! Tunable import defaults, overridable through the environment

/// Rows per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// Pause between chunks in milliseconds
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 100;

/// Bound on each store call in milliseconds
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 10_000;

/// Village name used in composed family card addresses
pub const DEFAULT_LOCALITY_NAME: &str = "Cepoko";

/// Where submitted spreadsheets are written before import
pub const DEFAULT_UPLOAD_DIR: &str = "uploads/tmp";

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

pub const DEFAULT_STORE_BACKEND: &str = "postgres";
