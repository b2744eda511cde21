//! SQL dialect support.
//!
//! The change-set builder emits the same batch shapes for every engine; the
//! pieces that differ (quoting, staging tables, literals, upsert syntax and
//! time functions) come from a [`SqlDialect`].

mod mysql;
mod sqlserver;

pub use mysql::MySqlDialect;
pub use sqlserver::SqlServerDialect;

use crate::models::{DatabaseProviderType, UnifiedDataType};
use crate::value::SqlValue;

/// Alias of the target table in generated joins.
pub const TARGET_ALIAS: &str = "t";
/// Alias of the staging table in generated joins.
pub const STAGING_ALIAS: &str = "s";
/// Column of the existence-check staging table holding the row position.
pub const ROW_INDEX_COLUMN: &str = "i";

/// Trait for dialect-specific SQL generation.
pub trait SqlDialect: Send + Sync + std::fmt::Debug {
    /// Returns the provider this dialect targets.
    fn provider_type(&self) -> DatabaseProviderType;

    /// Quotes one identifier, escaping embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String;

    /// Whether `part` is already a quoted identifier.
    fn is_quoted(&self, part: &str) -> bool;

    /// Quotes a possibly schema-qualified table name part by part.
    fn quote_table_name(&self, name: &str) -> String {
        name.split('.')
            .map(|part| {
                if self.is_quoted(part) {
                    part.to_string()
                } else {
                    self.quote_identifier(part)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Name of the per-batch staging table.
    fn staging_table(&self) -> &'static str;

    /// Text emitted once at the top of every batch.
    fn batch_prologue(&self) -> &'static str {
        ""
    }

    /// Text emitted once at the end of every batch that used a staging table.
    fn batch_epilogue(&self) -> String {
        String::new()
    }

    /// Terminator appended to each statement inside a batch.
    fn statement_terminator(&self) -> &'static str {
        ";"
    }

    /// Declares the staging table.
    ///
    /// `columns` are complete column definitions; `primary_key` holds
    /// quoted key column names and may be empty.
    fn declare_staging_table(&self, columns: &[String], primary_key: &[String]) -> String;

    /// Column type used for staging a value of `data_type`.
    fn column_type(&self, data_type: &UnifiedDataType) -> String;

    /// Renders a string literal with the dialect's escaping rules.
    fn string_literal(&self, text: &str) -> String;

    /// Renders a binary literal.
    fn binary_literal(&self, bytes: &[u8]) -> String;

    /// Escapes `LIKE` metacharacters so `text` matches literally.
    ///
    /// The result is pattern text, not yet a string literal. Defaults to the
    /// bracket form of [`crate::text::escape_magic_sql_like_chars`].
    fn escape_like(&self, text: &str) -> String {
        crate::text::escape_magic_sql_like_chars(text)
    }

    /// Renders a value as an inline SQL literal.
    fn format_value(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => String::from(if *v { "1" } else { "0" }),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) if v.is_finite() => format!("{v:?}"),
            SqlValue::Float(_) => "NULL".to_string(),
            SqlValue::Decimal(v) if is_numeric_literal(v) => v.clone(),
            SqlValue::Decimal(v) | SqlValue::Text(v) => self.string_literal(v),
            SqlValue::Binary(v) => self.binary_literal(v),
            SqlValue::Guid(_) | SqlValue::Date(_) | SqlValue::Time(_) | SqlValue::DateTime(_) => {
                format!("'{value}'")
            }
        }
    }

    /// Join update of the target from the staging table.
    ///
    /// `assignments`, `join` and `predicate` are already rendered against
    /// [`TARGET_ALIAS`] and [`STAGING_ALIAS`].
    fn update_from_staging(
        &self,
        target: &str,
        assignments: &str,
        join: &str,
        predicate: &str,
    ) -> String;

    /// Whether the driver can stream rows with a native bulk copy.
    fn supports_bulk_copy(&self) -> bool {
        false
    }

    /// Tail turning a multi-row `INSERT ... VALUES` into an upsert.
    ///
    /// Returns `None` when the dialect has no single-statement upsert.
    fn upsert_clause(&self, _update_columns: &[String]) -> Option<String> {
        None
    }

    /// Query returning the server's local time.
    fn now_query(&self) -> &'static str;

    /// Query returning the server's UTC time.
    fn utc_now_query(&self) -> &'static str;

    /// Query returning the server's UTC offset in minutes.
    fn utc_offset_query(&self) -> &'static str;

    /// Restricts a SELECT to its first `count` rows.
    fn limit_query(&self, sql: &str, count: usize) -> String;

    /// Query returning a non-null scalar when the object exists.
    fn object_exists_query(&self, name: &str) -> String;

    /// Expression locating `substring` within `text`, 1-based.
    fn char_index(&self, substring: &str, text: &str, start: usize) -> String;
}

/// Returns the dialect for a provider.
pub fn for_provider(provider: DatabaseProviderType) -> &'static dyn SqlDialect {
    match provider {
        DatabaseProviderType::SqlServer => &SqlServerDialect,
        DatabaseProviderType::MySql => &MySqlDialect,
    }
}

fn is_numeric_literal(text: &str) -> bool {
    !text.is_empty()
        && text.parse::<f64>().is_ok()
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02X}");
        out
    })
}

#[cfg(test)]
mod tests;
