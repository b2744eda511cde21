//! Database access traits and factory.
//!
//! This module defines the [`Database`] trait the change-set persists
//! through, the [`DataRecord`] row type it reads back, and the adapters for
//! SQL Server and MySQL. The design emphasizes object safety: change-sets
//! hold an `Arc<dyn Database>`.
//!
//! # Module Structure
//! - `config`: Configuration types (`ConnectionConfig`, `PersistOptions`)
//! - `helpers`: Provided convenience operations (`DatabaseExt`)
//! - Database-specific modules (`mysql`, `mssql`)

use crate::changes::TableColumn;
use crate::dialect::{self, SqlDialect};
use crate::models::{ColumnSchema, DatabaseProviderType};
use crate::value::SqlValue;
use crate::{Result, TableSyncError};
use async_trait::async_trait;
use std::sync::Arc;

// Configuration module
pub mod config;

pub use config::{ConnectionConfig, PersistOptions};
pub use helpers::DatabaseExt;

/// One row returned by [`Database::query`], columns in select order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRecord {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl DataRecord {
    /// Pairs column names with values; extra names or values are dropped.
    pub fn new(columns: Vec<String>, mut values: Vec<SqlValue>) -> Self {
        let mut columns = columns;
        let len = columns.len().min(values.len());
        columns.truncate(len);
        values.truncate(len);
        Self { columns, values }
    }

    /// Value of the first column called `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|index| self.values.get(index))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Name/value pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Statement execution, row reading and schema introspection for one database.
///
/// # Security Guarantees
/// - Credentials are never stored in errors or logs
/// - Every statement is bounded by the configured command timeout
///
/// # Object Safety
/// This trait is object-safe, allowing for dynamic dispatch through
/// `Box<dyn Database>` or `Arc<dyn Database>`.
#[async_trait]
pub trait Database: Send + Sync {
    /// Returns the database type this adapter handles.
    fn provider_type(&self) -> DatabaseProviderType;

    /// SQL dialect of this database.
    fn dialect(&self) -> &'static dyn SqlDialect {
        dialect::for_provider(self.provider_type())
    }

    /// Runs a batch that returns no rows.
    ///
    /// # Returns
    /// Rows affected as reported by the driver.
    ///
    /// # Errors
    /// `Statement` with the SQL text and a retry classification, or
    /// `Timeout` when the command timeout elapses.
    async fn execute_non_query(&self, sql: &str) -> Result<u64>;

    /// Runs a batch and returns all rows of its result sets.
    ///
    /// # Errors
    /// Same as [`Database::execute_non_query`].
    async fn query(&self, sql: &str) -> Result<Vec<DataRecord>>;

    /// Writable and read-only columns of `table`, in ordinal order.
    ///
    /// An unknown table yields an empty list.
    async fn table_schema(&self, table: &str) -> Result<Vec<ColumnSchema>>;

    /// Streams rows into `table` with the driver's bulk copy.
    ///
    /// `rows` hold one value per entry of `columns`.
    ///
    /// # Default Implementation
    /// Returns `UnsupportedFeature`.
    async fn bulk_copy(
        &self,
        _table: &str,
        _columns: &[TableColumn],
        _rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        Err(TableSyncError::unsupported_feature(
            "bulk copy",
            self.provider_type().to_string(),
        ))
    }

    /// Tests the database connection.
    ///
    /// # Errors
    /// Returns error if connection fails or times out
    async fn test_connection(&self) -> Result<()>;

    /// Starts an ambient transaction; later statements run on its connection
    /// until [`Database::commit`] or [`Database::rollback`].
    async fn begin_transaction(&self) -> Result<()> {
        Err(TableSyncError::unsupported_feature(
            "transactions",
            self.provider_type().to_string(),
        ))
    }

    /// Commits the ambient transaction.
    async fn commit(&self) -> Result<()> {
        Err(TableSyncError::unsupported_feature(
            "transactions",
            self.provider_type().to_string(),
        ))
    }

    /// Rolls back the ambient transaction.
    async fn rollback(&self) -> Result<()> {
        Err(TableSyncError::unsupported_feature(
            "transactions",
            self.provider_type().to_string(),
        ))
    }
}

/// Factory function to create a database adapter from a connection URL.
///
/// `mysql://` selects MySQL, `mssql://` and `sqlserver://` select SQL Server.
///
/// # Errors
/// Returns error if:
/// - Connection string format is invalid
/// - Database type is not supported
/// - Required features are not compiled in
pub async fn create_database(connection_string: &str) -> Result<Arc<dyn Database>> {
    match detect_provider(connection_string)? {
        DatabaseProviderType::MySql => {
            #[cfg(feature = "mysql")]
            {
                let adapter = mysql::MySqlAdapter::new(connection_string).await?;
                Ok(Arc::new(adapter))
            }
            #[cfg(not(feature = "mysql"))]
            {
                Err(TableSyncError::unsupported_feature(
                    "MySQL adapter",
                    "Compile with --features mysql to enable MySQL support",
                ))
            }
        }
        DatabaseProviderType::SqlServer => {
            #[cfg(feature = "mssql")]
            {
                let adapter = mssql::SqlServerAdapter::new(connection_string).await?;
                Ok(Arc::new(adapter))
            }
            #[cfg(not(feature = "mssql"))]
            {
                Err(TableSyncError::unsupported_feature(
                    "SQL Server adapter",
                    "Compile with --features mssql to enable SQL Server support",
                ))
            }
        }
    }
}

/// Detects the provider from a connection URL scheme.
///
/// # Errors
/// Returns error if connection string format is unrecognized
pub fn detect_provider(connection_string: &str) -> Result<DatabaseProviderType> {
    if connection_string.starts_with("mysql://") || connection_string.starts_with("mariadb://") {
        Ok(DatabaseProviderType::MySql)
    } else if connection_string.starts_with("mssql://")
        || connection_string.starts_with("sqlserver://")
    {
        Ok(DatabaseProviderType::SqlServer)
    } else {
        Err(TableSyncError::configuration(
            "Unrecognized database connection string format",
        ))
    }
}

// Shared helper utilities
pub mod helpers;

// Database-specific adapter modules
#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mssql")]
pub mod mssql;
