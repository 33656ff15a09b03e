//! Database queries

pub mod family;
pub mod hierarchy;
