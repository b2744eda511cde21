//! Configuration types for adapters and change-set persistence.
//!
//! - `ConnectionConfig`: database connection settings
//! - `PersistOptions`: batching limits and write strategy for `TableChanges::persist`
//!
//! # Security
//! These configuration structs intentionally do NOT store passwords or credentials.

mod connection;
mod persist;

pub use connection::ConnectionConfig;
pub use persist::{
    DEFAULT_MAX_BULK_COPY_ROWS, DEFAULT_MAX_STATEMENT_LENGTH, DEFAULT_MIN_BULK_COPY_ROWS,
    PersistOptions,
};
