//! Shared SQLite schema machinery.
//!
//! Declarative table definitions with creation, validation against a live
//! database, and `PRAGMA user_version` based migrations.

mod versioned_schema;

pub use versioned_schema::{
    Column, ForeignKeyAction, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

/// Offset added to schema versions in `PRAGMA user_version` so that a plain
/// SQLite file (version 0) is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 310;
