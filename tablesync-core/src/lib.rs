//! Core library for tablesync.
//!
//! Collects in-memory row changes for one table and writes them to SQL Server
//! or MySQL as a small number of batched statements. Rows are matched against
//! the target by primary key, so callers never decide between insert and
//! update themselves.
//!
//! # Security Guarantees
//! - No credentials stored or logged in any data structures
//! - Connection URLs are redacted in every error message
//! - Every generated statement is bounded by a length cap and a command timeout
//!
//! # Architecture
//! - [`changes`]: change-sets, row access and the SQL builder
//! - [`dialect`]: quoting, literals and staging syntax per engine
//! - [`adapters`]: the [`adapters::Database`] trait, its drivers and helpers
//! - [`error_codes`]: retry classification of driver error numbers

pub mod adapters;
pub mod changes;
pub mod dialect;
pub mod error;
pub mod error_codes;
pub mod logging;
pub mod models;
pub mod text;
pub mod value;

// Re-export commonly used types
pub use adapters::{ConnectionConfig, DataRecord, Database, DatabaseExt, PersistOptions};
pub use changes::{ChangeType, PersistPlan, PersistSummary, RowMut, RowRef, TableChanges};
pub use error::{Result, TableSyncError};
pub use error_codes::ErrorDisposition;
pub use models::{ColumnSchema, DatabaseProviderType, TableDefinition, UnifiedDataType};
pub use value::SqlValue;
