//! Column metadata and the default-value policy.

use crate::dialect::SqlDialect;
use crate::models::{ColumnSchema, UnifiedDataType};
use crate::value::SqlValue;
use crate::{Result, TableSyncError};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;

use super::row::RowChange;

/// Reserved audit column refreshed on every insert and update.
pub const TIMESTAMP_COLUMN: &str = "UtcLastModifiedOn";

/// Columns excluded by [`filter_staging_columns`].
const STAGING_EXCLUDED_COLUMNS: [&str; 3] = [TIMESTAMP_COLUMN, "DeletedBy", "Deleted"];

/// Accepts every column of a data record.
pub fn filter_none(_column: &str) -> bool {
    true
}

/// Rejects the audit and soft-delete columns maintained by the target database.
pub fn filter_staging_columns(column: &str) -> bool {
    !STAGING_EXCLUDED_COLUMNS
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(column))
}

/// One writable column of a change-set table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub data_type: UnifiedDataType,
    pub is_key: bool,
    pub allow_db_null: bool,
    pub is_identity: bool,
    /// Position in the owning schema.
    pub index: usize,
    /// Dialect type used when staging values of this column.
    pub full_sql_definition: String,
}

impl TableColumn {
    pub(crate) fn from_schema(schema: ColumnSchema, index: usize, dialect: &dyn SqlDialect) -> Self {
        let full_sql_definition = dialect.column_type(&schema.data_type);
        Self {
            name: schema.name,
            data_type: schema.data_type,
            is_key: schema.is_key,
            allow_db_null: schema.allow_null && !schema.is_key,
            is_identity: schema.is_identity,
            index,
            full_sql_definition,
        }
    }

    /// Whether this is the reserved `UtcLastModifiedOn` audit column.
    pub fn is_timestamp(&self) -> bool {
        self.name.eq_ignore_ascii_case(TIMESTAMP_COLUMN)
    }

    /// The value used when a row leaves this column unassigned.
    ///
    /// Nullable columns get NULL; booleans, numbers and dates get their zero
    /// value (SQL Server's minimum datetime for dates). Anything else has no
    /// default.
    pub fn generate_default_value_or_null(&self) -> Option<SqlValue> {
        if self.allow_db_null {
            return Some(SqlValue::Null);
        }

        match &self.data_type {
            UnifiedDataType::Boolean => Some(SqlValue::Bool(false)),
            UnifiedDataType::Integer { .. } => Some(SqlValue::Int(0)),
            UnifiedDataType::Float { .. } => Some(SqlValue::Float(0.0)),
            UnifiedDataType::Decimal { .. } => Some(SqlValue::Decimal("0".to_string())),
            UnifiedDataType::DateTime { .. } => sql_server_min_date()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(SqlValue::DateTime),
            UnifiedDataType::Date => sql_server_min_date().map(SqlValue::Date),
            _ => None,
        }
    }

    /// Column definition for a staging table.
    pub(crate) fn staging_definition(&self, dialect: &dyn SqlDialect) -> String {
        format!(
            "{} {} {}",
            dialect.quote_identifier(&self.name),
            self.full_sql_definition,
            if self.allow_db_null { "NULL" } else { "NOT NULL" }
        )
    }
}

fn sql_server_min_date() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1753, 1, 1)
}

/// Columns of one table with case-insensitive name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<TableColumn>,
    lookup: HashMap<String, usize>,
}

impl TableSchema {
    pub(crate) fn new(
        table_name: impl Into<String>,
        columns: Vec<ColumnSchema>,
        dialect: &dyn SqlDialect,
    ) -> Self {
        let columns: Vec<TableColumn> = columns
            .into_iter()
            .enumerate()
            .map(|(index, schema)| TableColumn::from_schema(schema, index, dialect))
            .collect();
        let lookup = columns
            .iter()
            .map(|c| (c.name.to_lowercase(), c.index))
            .collect();

        Self {
            table_name: table_name.into(),
            columns,
            lookup,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Names of the key columns, in schema order.
    pub fn key_names(&self) -> Vec<&str> {
        self.key_columns().map(|c| c.name.as_str()).collect()
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &TableColumn> {
        self.columns.iter().filter(|c| c.is_key)
    }

    pub fn has_keys(&self) -> bool {
        self.columns.iter().any(|c| c.is_key)
    }

    pub fn try_column_index(&self, name: &str) -> Option<usize> {
        self.lookup.get(&name.to_lowercase()).copied()
    }

    /// Position of a column.
    ///
    /// # Errors
    /// `UnknownColumn` when the table has no such column.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.try_column_index(name)
            .ok_or_else(|| TableSyncError::unknown_column(name, &self.table_name))
    }

    pub fn column(&self, name: &str) -> Result<&TableColumn> {
        self.column_index(name).map(|index| &self.columns[index])
    }

    /// Marks columns as keys; keys are never nullable.
    pub(crate) fn mark_keys(&mut self, names: &[&str]) -> Result<()> {
        let indexes = names
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Result<Vec<_>>>()?;
        for index in indexes {
            let column = &mut self.columns[index];
            column.is_key = true;
            column.allow_db_null = false;
        }
        Ok(())
    }
}

/// Produces a value for an unassigned column, or `None` to defer to the next generator.
///
/// The row is absent when the value is needed outside any row, such as the
/// fresh timestamp of an update statement.
pub type DefaultValueGenerator =
    Arc<dyn Fn(Option<&RowChange>, &TableColumn) -> Option<SqlValue> + Send + Sync>;

/// Ordered generator chain; the first non-`None` answer wins.
#[derive(Clone)]
pub(crate) struct DefaultValues {
    generators: Vec<DefaultValueGenerator>,
}

impl std::fmt::Debug for DefaultValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultValues")
            .field("generators", &self.generators.len())
            .finish()
    }
}

impl Default for DefaultValues {
    fn default() -> Self {
        let fresh_timestamp: DefaultValueGenerator =
            Arc::new(|_: Option<&RowChange>, column: &TableColumn| {
                column
                    .is_timestamp()
                    .then(|| SqlValue::DateTime(chrono::Utc::now().naive_utc()))
            });
        let column_default: DefaultValueGenerator =
            Arc::new(|_: Option<&RowChange>, column: &TableColumn| {
                column.generate_default_value_or_null()
            });

        Self {
            generators: vec![fresh_timestamp, column_default],
        }
    }
}

impl DefaultValues {
    /// Adds a generator ahead of the built-in ones.
    pub(crate) fn push_front(&mut self, generator: DefaultValueGenerator) {
        self.generators.insert(0, generator);
    }

    /// Runs the chain, failing with the row's values when nothing answers.
    pub(crate) fn resolve(
        &self,
        row: Option<&RowChange>,
        column: &TableColumn,
        columns: &[TableColumn],
        table_name: &str,
    ) -> Result<SqlValue> {
        if let Some(value) = self.generators.iter().find_map(|g| g(row, column)) {
            return Ok(value);
        }

        let row_values = row.map_or_else(String::new, |row| {
            columns
                .iter()
                .map(|c| {
                    let value = row.value(c.index).map_or_else(String::new, ToString::to_string);
                    format!("{} = {value}", c.name)
                })
                .collect::<Vec<_>>()
                .join(", ")
        });

        Err(TableSyncError::NoDefaultValue {
            column: column.name.clone(),
            column_type: column.data_type.name(),
            table: table_name.to_string(),
            row_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlServerDialect;

    fn column(name: &str, data_type: UnifiedDataType, nullable: bool) -> TableColumn {
        let mut schema = ColumnSchema::new(name, data_type);
        schema.allow_null = nullable;
        TableColumn::from_schema(schema, 0, &SqlServerDialect)
    }

    #[test]
    fn test_timestamp_detection_is_case_insensitive() {
        let c = column(
            "utclastmodifiedon",
            UnifiedDataType::DateTime {
                with_timezone: false,
            },
            false,
        );
        assert!(c.is_timestamp());
        assert!(!column("Name", UnifiedDataType::String { max_length: None }, true).is_timestamp());
    }

    #[test]
    fn test_defaults_by_type() {
        let int = UnifiedDataType::Integer {
            bits: 32,
            signed: true,
        };
        assert_eq!(
            column("A", int.clone(), true).generate_default_value_or_null(),
            Some(SqlValue::Null)
        );
        assert_eq!(
            column("A", int, false).generate_default_value_or_null(),
            Some(SqlValue::Int(0))
        );
        assert_eq!(
            column("B", UnifiedDataType::Boolean, false).generate_default_value_or_null(),
            Some(SqlValue::Bool(false))
        );
        assert_eq!(
            column("C", UnifiedDataType::String { max_length: None }, false)
                .generate_default_value_or_null(),
            None
        );
    }

    #[test]
    fn test_datetime_default_is_sql_server_minimum() {
        let c = column(
            "At",
            UnifiedDataType::DateTime {
                with_timezone: false,
            },
            false,
        );
        assert_eq!(
            c.generate_default_value_or_null().map(|v| v.to_string()),
            Some("1753-01-01 00:00:00.000".to_string())
        );
    }

    #[test]
    fn test_key_columns_are_never_nullable() {
        let schema = ColumnSchema {
            is_key: true,
            ..ColumnSchema::new("Id", UnifiedDataType::Uuid)
        };
        let c = TableColumn::from_schema(schema, 0, &SqlServerDialect);
        assert!(!c.allow_db_null);
        assert_eq!(c.full_sql_definition, "uniqueidentifier");
    }

    #[test]
    fn test_staging_filter() {
        assert!(!filter_staging_columns("deleted"));
        assert!(!filter_staging_columns("UTCLASTMODIFIEDON"));
        assert!(filter_staging_columns("Name"));
        assert!(filter_none("Deleted"));
    }

    #[test]
    fn test_resolve_reports_row_values() {
        let name = column("Name", UnifiedDataType::String { max_length: None }, false);
        let mut row = RowChange::new(1);
        row.values_mut()[0] = None;

        let error = DefaultValues::default()
            .resolve(Some(&row), &name, std::slice::from_ref(&name), "Customer")
            .unwrap_err();
        let text = error.to_string();
        assert!(text.contains("column Name"));
        assert!(text.contains("table Customer"));
        assert!(text.contains("Name = "));
    }

    #[test]
    fn test_custom_generator_runs_first() {
        let name = column("Name", UnifiedDataType::String { max_length: None }, true);
        let mut defaults = DefaultValues::default();
        defaults.push_front(Arc::new(|_: Option<&RowChange>, c: &TableColumn| {
            (c.name == "Name").then(|| SqlValue::Text("anonymous".into()))
        }));

        let value = defaults.resolve(None, &name, &[], "Customer").unwrap();
        assert_eq!(value, SqlValue::Text("anonymous".into()));
    }
}
