//! Convenience operations provided for every [`Database`].
//!
//! These build on the four primitives of the trait (`execute_non_query`,
//! `query`, `provider_type` and `dialect`), so adapters get them for free.

use super::Database;
use crate::value::{FromSqlValue, SqlValue};
use crate::{Result, TableSyncError};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// `GO` batch separators on a line of their own.
static GO_SEPARATOR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*GO\s*;?\s*$").ok());

/// Splits a script into batches at `GO` lines, dropping empty batches.
pub fn split_sql_script(script: &str) -> Vec<String> {
    let batches: Vec<&str> = match GO_SEPARATOR.as_ref() {
        Some(separator) => separator.split(script).collect(),
        None => vec![script],
    };
    batches
        .into_iter()
        .map(str::trim)
        .filter(|batch| !batch.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extension trait with scalar, list, script and lookup helpers.
///
/// # Example
/// ```rust,ignore
/// use tablesync_core::adapters::DatabaseExt;
///
/// let count: i64 = db.execute_scalar("SELECT COUNT(*) FROM Customer").await?;
/// let offset = db.utc_offset_minutes().await?;
/// ```
#[async_trait]
pub trait DatabaseExt: Database {
    /// First column of the first row, converted to `T`.
    ///
    /// # Errors
    /// `MissingScalar` when there is no row, the value is NULL, or it has an
    /// incompatible type.
    async fn execute_scalar<T>(&self, sql: &str) -> Result<T>
    where
        T: FromSqlValue + Send,
    {
        let value = self.try_execute_scalar::<SqlValue>(sql).await?.ok_or_else(|| {
            TableSyncError::MissingScalar {
                query: sql.to_string(),
                reason: "but no data was returned".to_string(),
            }
        })?;

        T::from_sql_value(&value).ok_or_else(|| TableSyncError::MissingScalar {
            query: sql.to_string(),
            reason: format!(
                "of type {} but got {}",
                std::any::type_name::<T>(),
                value.kind()
            ),
        })
    }

    /// First column of the first row, or `None` for no row or NULL.
    async fn try_execute_scalar<T>(&self, sql: &str) -> Result<Option<T>>
    where
        T: FromSqlValue + Send,
    {
        let records = self.query(sql).await?;
        Ok(records
            .first()
            .and_then(|record| record.values().first())
            .filter(|value| !value.is_null())
            .and_then(T::from_sql_value))
    }

    /// First column of the first row, or `default`.
    async fn execute_scalar_or<T>(&self, sql: &str, default: T) -> Result<T>
    where
        T: FromSqlValue + Send,
    {
        Ok(self.try_execute_scalar(sql).await?.unwrap_or(default))
    }

    /// First column of every row; NULLs and incompatible values are skipped.
    async fn execute_to_list<T>(&self, sql: &str) -> Result<Vec<T>>
    where
        T: FromSqlValue + Send,
    {
        let records = self.query(sql).await?;
        Ok(records
            .iter()
            .filter_map(|record| record.values().first())
            .filter_map(T::from_sql_value)
            .collect())
    }

    /// Server local time.
    async fn now(&self) -> Result<chrono::NaiveDateTime> {
        self.execute_scalar(self.dialect().now_query()).await
    }

    /// Server UTC time.
    async fn utc_now(&self) -> Result<chrono::NaiveDateTime> {
        self.execute_scalar(self.dialect().utc_now_query()).await
    }

    /// Difference between server local time and UTC, in minutes.
    async fn utc_offset_minutes(&self) -> Result<i64> {
        self.execute_scalar(self.dialect().utc_offset_query()).await
    }

    /// Runs each `GO`-separated batch of `script` in order.
    ///
    /// # Returns
    /// Number of batches executed.
    async fn run_sql_script(&self, script: &str) -> Result<usize> {
        let batches = split_sql_script(script);
        for batch in &batches {
            self.execute_non_query(batch).await?;
        }
        tracing::debug!(batches = batches.len(), "Ran SQL script");
        Ok(batches.len())
    }

    /// Reads a script file and runs it with [`DatabaseExt::run_sql_script`].
    async fn run_sql_script_file(&self, path: &Path) -> Result<usize> {
        let script = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TableSyncError::Io {
                context: format!("Cannot read SQL script {}", path.display()),
                source,
            })?;
        self.run_sql_script(&script).await
    }

    /// Whether a table or other schema object called `name` exists.
    async fn does_object_exist(&self, name: &str) -> Result<bool> {
        let sql = self.dialect().object_exists_query(name);
        Ok(self.try_execute_scalar::<SqlValue>(&sql).await?.is_some())
    }

    /// Looks up `column` in the row of `table` matching the key values,
    /// inserting a row with `default` first when none matches.
    ///
    /// # Errors
    /// `KeyCountMismatch` when names and values differ in length.
    async fn retrieve_or_insert(
        &self,
        table: &str,
        column: &str,
        default: SqlValue,
        key_names: &[&str],
        key_values: &[SqlValue],
    ) -> Result<SqlValue> {
        if key_names.len() != key_values.len() {
            return Err(TableSyncError::KeyCountMismatch {
                expected: key_names.len(),
                actual: key_values.len(),
            });
        }

        let dialect = self.dialect();
        let target = dialect.quote_table_name(table);
        let quoted_column = dialect.quote_identifier(column);
        let predicate = key_names
            .iter()
            .zip(key_values)
            .map(|(name, value)| {
                let name = dialect.quote_identifier(name);
                if value.is_null() {
                    format!("{name} IS NULL")
                } else {
                    format!("{name} = {}", dialect.format_value(value))
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        let where_clause = if predicate.is_empty() {
            String::new()
        } else {
            format!(" WHERE {predicate}")
        };

        let select = dialect.limit_query(
            &format!("SELECT {quoted_column} FROM {target}{where_clause}"),
            1,
        );
        if let Some(existing) = self.try_execute_scalar::<SqlValue>(&select).await? {
            return Ok(existing);
        }

        let columns = key_names
            .iter()
            .map(|name| dialect.quote_identifier(name))
            .chain(std::iter::once(quoted_column))
            .collect::<Vec<_>>()
            .join(", ");
        let values = key_values
            .iter()
            .chain(std::iter::once(&default))
            .map(|value| dialect.format_value(value))
            .collect::<Vec<_>>()
            .join(", ");
        self.execute_non_query(&format!("INSERT INTO {target} ({columns}) VALUES ({values})"))
            .await?;

        Ok(default)
    }
}

impl<D: Database + ?Sized> DatabaseExt for D {}
