//! Business logic services

pub mod batch_coordinator;
pub mod cancellation;
pub mod civil_store;
pub mod code_mapping;
pub mod family_upserter;
pub mod import_error;
pub mod import_processor;
pub mod job_history;
pub mod reference_resolver;
pub mod row_validator;
pub mod spreadsheet;
