//! Type definitions

pub mod civil;
pub mod import;
pub mod import_job;
pub mod messages;

pub use civil::*;
pub use import::*;
pub use import_job::*;
pub use messages::*;
