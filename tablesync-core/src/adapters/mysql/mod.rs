//! MySQL database adapter with connection pooling.
//!
//! # Module Structure
//! - `connection`: Connection pool management and validation
//! - `type_mapping`: MySQL to unified data type conversion and value decoding
//! - `schema_collection`: Column introspection for change-sets
//!
//! Batches run through `sqlx::raw_sql`, so a whole generated batch (temporary
//! table, staging inserts, final join) executes on one connection.

pub mod connection;
pub mod schema_collection;
pub mod type_mapping;

#[cfg(test)]
mod tests;

use super::{ConnectionConfig, DataRecord, Database};
use crate::error::TableSyncError;
use crate::error_codes::classify;
use crate::models::{ColumnSchema, DatabaseProviderType};
use crate::value::SqlValue;
use crate::Result;
use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlDatabaseError, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Executor, MySqlPool, Row, TypeInfo, ValueRef};
use std::future::Future;
use tokio::sync::Mutex;

// Re-export public items from submodules
pub use type_mapping::map_mysql_type;

/// MySQL database adapter with connection pooling
pub struct MySqlAdapter {
    /// Connection pool for database operations
    pub pool: MySqlPool,
    /// Connection configuration (pool settings, timeouts, etc.)
    pub config: ConnectionConfig,
    /// Connection of the ambient transaction, if one is open
    transaction: Mutex<Option<PoolConnection<MySql>>>,
}

impl std::fmt::Debug for MySqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlAdapter")
            .field("config", &self.config)
            .field("pool_size", &self.pool.size())
            .field("pool_idle", &self.pool.num_idle())
            .finish_non_exhaustive()
    }
}

impl MySqlAdapter {
    fn from_pool(pool: MySqlPool, config: ConnectionConfig) -> Self {
        Self {
            pool,
            config,
            transaction: Mutex::new(None),
        }
    }

    /// Converts a driver error for `sql` into a classified statement error.
    pub(crate) fn statement_error(&self, sql: &str, error: sqlx::Error) -> TableSyncError {
        let number = match &error {
            sqlx::Error::Database(db_error) => db_error
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| i64::from(e.number())),
            _ => None,
        };
        let message = error.to_string();

        TableSyncError::statement_failed(
            sql,
            message,
            self.config.user_display(),
            classify(DatabaseProviderType::MySql, number),
            Some(Box::new(error)),
        )
    }

    /// Runs a driver future under the command timeout.
    pub(crate) async fn bounded<T, F>(&self, sql: &str, future: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.config.command_timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(self.statement_error(sql, error)),
            Err(_) => Err(TableSyncError::Timeout {
                statement: sql.to_string(),
                seconds: self.config.command_timeout.as_secs(),
            }),
        }
    }

    async fn finish_transaction(&self, statement: &str) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        let Some(mut connection) = transaction.take() else {
            return Err(TableSyncError::configuration("No transaction is open"));
        };
        self.bounded(statement, (&mut *connection).execute(sqlx::raw_sql(statement)))
            .await?;
        Ok(())
    }
}

/// Converts a text-protocol row into a [`DataRecord`].
fn to_record(row: &MySqlRow) -> DataRecord {
    let mut names = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        names.push(column.name().to_string());
        let type_name = column.type_info().name();

        let is_null = row.try_get_raw(index).map_or(true, |raw| raw.is_null());
        let value = if is_null {
            SqlValue::Null
        } else if type_mapping::is_binary_type(type_name) {
            row.try_get_unchecked::<Vec<u8>, _>(index)
                .map_or(SqlValue::Null, SqlValue::Binary)
        } else {
            row.try_get_unchecked::<String, _>(index)
                .map_or(SqlValue::Null, |text| type_mapping::decode_text_value(type_name, text))
        };
        values.push(value);
    }

    DataRecord::new(names, values)
}

#[async_trait]
impl Database for MySqlAdapter {
    fn provider_type(&self) -> DatabaseProviderType {
        DatabaseProviderType::MySql
    }

    async fn execute_non_query(&self, sql: &str) -> Result<u64> {
        let mut transaction = self.transaction.lock().await;
        let result = match transaction.as_mut() {
            Some(connection) => {
                self.bounded(sql, (&mut **connection).execute(sqlx::raw_sql(sql)))
                    .await?
            }
            None => {
                drop(transaction);
                self.bounded(sql, sqlx::raw_sql(sql).execute(&self.pool)).await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str) -> Result<Vec<DataRecord>> {
        let mut transaction = self.transaction.lock().await;
        let rows = match transaction.as_mut() {
            Some(connection) => {
                self.bounded(sql, (&mut **connection).fetch_all(sqlx::raw_sql(sql)))
                    .await?
            }
            None => {
                drop(transaction);
                self.bounded(sql, sqlx::raw_sql(sql).fetch_all(&self.pool))
                    .await?
            }
        };
        Ok(rows.iter().map(to_record).collect())
    }

    async fn table_schema(&self, table: &str) -> Result<Vec<ColumnSchema>> {
        schema_collection::collect_columns(self, table).await
    }

    async fn test_connection(&self) -> Result<()> {
        let result: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(TableSyncError::connection_failed)?;

        if result != 1 {
            return Err(TableSyncError::configuration(
                "Basic connectivity test failed: unexpected result",
            ));
        }

        tracing::info!(config = %self.config, "MySQL connection test succeeded");
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        if transaction.is_some() {
            return Err(TableSyncError::configuration(
                "A transaction is already open",
            ));
        }

        let mut connection = self
            .pool
            .acquire()
            .await
            .map_err(TableSyncError::connection_failed)?;
        self.bounded(
            "START TRANSACTION",
            (&mut *connection).execute(sqlx::raw_sql("START TRANSACTION")),
        )
        .await?;

        *transaction = Some(connection);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.finish_transaction("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish_transaction("ROLLBACK").await
    }
}
