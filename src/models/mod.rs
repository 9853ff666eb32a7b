//! Core data models for the anonymous object host.
//!
//! These entities mirror the keyed tables the service persists: one row per
//! identifier in each table, all of them destroyed together on purge. They map
//! to SQLite rows via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod embed;
pub mod object;
pub mod records;
pub mod upload;
