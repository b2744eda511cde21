//! SQL Server database adapter built on tiberius.
//!
//! # Module Structure
//! - `connection`: Connection string parsing and socket setup
//! - `type_mapping`: SQL Server to unified data type conversion and cell decoding
//! - `schema_collection`: Column introspection for change-sets
//!
//! Batches are sent as single requests, so a generated batch with its table
//! variable and staging inserts runs in one scope. Bulk copies use the TDS
//! bulk-load protocol.

pub mod connection;
pub mod schema_collection;
pub mod type_mapping;

#[cfg(test)]
mod tests;

use super::{ConnectionConfig, DataRecord, Database};
use crate::changes::TableColumn;
use crate::error::TableSyncError;
use crate::error_codes::classify;
use crate::models::{ColumnSchema, DatabaseProviderType};
use crate::value::SqlValue;
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use tiberius::{Client, Config, Row, TokenRow};
use tokio::net::TcpStream;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio_util::compat::Compat;

pub use connection::{parse_sqlserver_connection_config, validate_sqlserver_connection_string};
pub use type_mapping::map_sqlserver_type;

pub(crate) type SqlServerClient = Client<Compat<TcpStream>>;

/// SQL Server adapter with connection management
pub struct SqlServerAdapter {
    /// Connection configuration (timeouts, application name, etc.)
    pub config: ConnectionConfig,
    /// Driver configuration, including credentials
    client_config: Config,
    /// Connection of the ambient transaction, if one is open
    transaction: Mutex<Option<SqlServerClient>>,
}

impl std::fmt::Debug for SqlServerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A connection borrowed for one operation.
enum Lease<'a> {
    Transaction(MappedMutexGuard<'a, SqlServerClient>),
    Fresh(Box<SqlServerClient>),
}

impl Deref for Lease<'_> {
    type Target = SqlServerClient;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Transaction(client) => client,
            Self::Fresh(client) => client,
        }
    }
}

impl DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Transaction(client) => client,
            Self::Fresh(client) => client,
        }
    }
}

impl SqlServerAdapter {
    fn from_parts(config: ConnectionConfig, client_config: Config) -> Self {
        Self {
            config,
            client_config,
            transaction: Mutex::new(None),
        }
    }

    /// The transaction connection when one is open, otherwise a new one.
    async fn lease(&self) -> Result<Lease<'_>> {
        match MutexGuard::try_map(self.transaction.lock().await, Option::as_mut) {
            Ok(client) => Ok(Lease::Transaction(client)),
            Err(idle) => {
                drop(idle);
                Ok(Lease::Fresh(Box::new(self.connect().await?)))
            }
        }
    }

    /// Converts a driver error for `sql` into a classified statement error.
    pub(crate) fn statement_error(&self, sql: &str, error: tiberius::error::Error) -> TableSyncError {
        let number = match &error {
            tiberius::error::Error::Server(token) => Some(i64::from(token.code())),
            _ => None,
        };
        let message = error.to_string();

        TableSyncError::statement_failed(
            sql,
            message,
            self.config.user_display(),
            classify(DatabaseProviderType::SqlServer, number),
            Some(Box::new(error)),
        )
    }

    /// Runs a driver future under the command timeout.
    pub(crate) async fn bounded<T, F>(&self, sql: &str, future: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, tiberius::error::Error>>,
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

    async fn run_simple(&self, client: &mut SqlServerClient, sql: &str) -> Result<Vec<Vec<Row>>> {
        self.bounded(sql, async {
            client.simple_query(sql).await?.into_results().await
        })
        .await
    }

    async fn finish_transaction(&self, statement: &str) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        let Some(mut client) = transaction.take() else {
            return Err(TableSyncError::configuration("No transaction is open"));
        };
        self.run_simple(&mut client, statement).await?;
        Ok(())
    }
}

/// Converts a result row into a [`DataRecord`].
fn to_record(row: &Row) -> DataRecord {
    let (names, values): (Vec<String>, Vec<SqlValue>) = row
        .cells()
        .map(|(column, data)| (column.name().to_string(), type_mapping::from_column_data(data)))
        .unzip();
    DataRecord::new(names, values)
}

/// Shapes bulk-copy rows for the target columns.
fn token_rows(columns: &[TableColumn], rows: &[Vec<SqlValue>]) -> Result<Vec<TokenRow<'static>>> {
    rows.iter()
        .map(|row| {
            let mut token = TokenRow::new();
            for (value, column) in row.iter().zip(columns) {
                let data = type_mapping::to_column_data(value, &column.data_type).ok_or_else(|| {
                    TableSyncError::conversion(value.to_string(), &column.name, column.data_type.name())
                })?;
                token.push(data);
            }
            Ok(token)
        })
        .collect()
}

#[async_trait]
impl Database for SqlServerAdapter {
    fn provider_type(&self) -> DatabaseProviderType {
        DatabaseProviderType::SqlServer
    }

    async fn execute_non_query(&self, sql: &str) -> Result<u64> {
        let mut client = self.lease().await?;
        let result = self.bounded(sql, client.execute(sql, &[])).await?;
        Ok(result.total())
    }

    async fn query(&self, sql: &str) -> Result<Vec<DataRecord>> {
        let mut client = self.lease().await?;
        let results = self.run_simple(&mut client, sql).await?;
        Ok(results.iter().flatten().map(to_record).collect())
    }

    async fn table_schema(&self, table: &str) -> Result<Vec<ColumnSchema>> {
        schema_collection::collect_columns(self, table).await
    }

    async fn bulk_copy(
        &self,
        table: &str,
        columns: &[TableColumn],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        let prepared = token_rows(columns, rows)?;
        let statement = format!("INSERT BULK {table}");

        let mut client = self.lease().await?;
        let result = self
            .bounded(&statement, async {
                let mut request = client.bulk_insert(table).await?;
                for row in prepared {
                    request.send(row).await?;
                }
                request.finalize().await
            })
            .await?;

        tracing::debug!(table, rows = rows.len(), "Bulk copy finished");
        Ok(result.total())
    }

    async fn test_connection(&self) -> Result<()> {
        let mut client = self.connect().await?;
        let results = self.run_simple(&mut client, "SELECT 1").await?;

        let value = results
            .first()
            .and_then(|rows| rows.first())
            .and_then(|row| row.try_get::<i32, _>(0).ok().flatten());
        if value != Some(1) {
            return Err(TableSyncError::configuration(
                "Basic connectivity test failed: unexpected result",
            ));
        }

        tracing::info!(config = %self.config, "SQL Server connection test succeeded");
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        if transaction.is_some() {
            return Err(TableSyncError::configuration(
                "A transaction is already open",
            ));
        }

        let mut client = self.connect().await?;
        self.run_simple(&mut client, "BEGIN TRANSACTION").await?;

        *transaction = Some(client);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.finish_transaction("COMMIT TRANSACTION").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish_transaction("ROLLBACK TRANSACTION").await
    }
}
