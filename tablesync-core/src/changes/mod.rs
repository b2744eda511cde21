//! In-memory change-sets for one table, persisted as batched upserts.
//!
//! A [`TableChanges`] holds the table schema, the pending rows and an index
//! from key tuples to rows. [`TableChanges::persist`] first asks the
//! database which keyed rows already exist, classifies the rest as inserts,
//! and then runs the insert/update (or native upsert) batches planned by the
//! builder.
//!
//! # Example
//! ```rust
//! use tablesync_core::changes::TableChanges;
//! use tablesync_core::models::{ColumnSchema, DatabaseProviderType, UnifiedDataType};
//!
//! let mut changes = TableChanges::offline(
//!     DatabaseProviderType::SqlServer,
//!     "dbo.Customer",
//!     vec![
//!         ColumnSchema::new("Id", UnifiedDataType::Integer { bits: 32, signed: true }).key(),
//!         ColumnSchema::new("Name", UnifiedDataType::String { max_length: Some(50) }),
//!     ],
//! );
//!
//! let mut row = changes.get_or_create_by_key_values(vec![1.into()])?;
//! row.set("Name", "Alice")?;
//!
//! let plan = changes.plan()?;
//! assert_eq!(plan.existence_checks.len(), 1);
//! # Ok::<(), tablesync_core::TableSyncError>(())
//! ```

mod builder;
mod column;
mod row;

#[cfg(test)]
mod tests;

pub use builder::{PersistPlan, PlannedBatch, PlannedStep};
pub use column::{
    DefaultValueGenerator, TIMESTAMP_COLUMN, TableColumn, TableSchema, filter_none,
    filter_staging_columns,
};
pub use row::{ChangeType, RowChange, RowMut, RowRef, RowSource};

use crate::adapters::{Database, PersistOptions};
use crate::dialect::{self, SqlDialect};
use crate::models::{ColumnSchema, DatabaseProviderType};
use crate::value::{FromSqlValue, SqlValue};
use crate::{Result, TableSyncError};
use builder::SqlBuilder;
use column::DefaultValues;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Hook run on every new row, before key values are assigned.
pub type KeyInitializer = Box<dyn Fn(&mut RowMut<'_>) -> Result<()> + Send + Sync>;

/// Counts reported by a successful persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PersistSummary {
    pub inserts: usize,
    pub updates: usize,
    /// SQL batches executed, existence checks included.
    pub batches: usize,
    pub bulk_copies: usize,
}

/// The pending changes for one table.
pub struct TableChanges {
    database: Option<Arc<dyn Database>>,
    dialect: &'static dyn SqlDialect,
    schema: TableSchema,
    annotations: Vec<String>,
    rows: Vec<RowChange>,
    key_index: HashMap<Vec<SqlValue>, usize>,
    has_been_persisted: bool,
    options: PersistOptions,
    defaults: DefaultValues,
    key_initializer: Option<KeyInitializer>,
}

impl std::fmt::Debug for TableChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableChanges")
            .field("table_name", &self.schema.table_name)
            .field("dialect", &self.dialect)
            .field("columns", &self.schema.columns.len())
            .field("rows", &self.rows.len())
            .field("annotations", &self.annotations)
            .field("has_been_persisted", &self.has_been_persisted)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TableChanges {
    fn build(
        database: Option<Arc<dyn Database>>,
        dialect: &'static dyn SqlDialect,
        table_name: &str,
        columns: Vec<ColumnSchema>,
    ) -> Self {
        let columns: Vec<ColumnSchema> = columns.into_iter().filter(|c| !c.is_read_only).collect();
        Self {
            database,
            dialect,
            schema: TableSchema::new(table_name, columns, dialect),
            annotations: Vec::new(),
            rows: Vec::new(),
            key_index: HashMap::new(),
            has_been_persisted: false,
            options: PersistOptions::default(),
            defaults: DefaultValues::default(),
            key_initializer: None,
        }
    }

    /// Introspects `table_name` and returns an empty change-set for it.
    ///
    /// Read-only columns (computed, rowversion) are left out.
    ///
    /// # Errors
    /// Fails when introspection fails or the table has no writable columns.
    pub async fn load(database: Arc<dyn Database>, table_name: &str) -> Result<Self> {
        let columns = database.table_schema(table_name).await?;
        let dialect = database.dialect();
        let changes = Self::build(Some(database), dialect, table_name, columns);

        if changes.schema.columns.is_empty() {
            return Err(TableSyncError::configuration(format!(
                "Table {table_name} does not exist or has no writable columns"
            )));
        }

        tracing::debug!(
            table = table_name,
            columns = changes.schema.columns.len(),
            keys = ?changes.key_names(),
            "Loaded table schema"
        );
        Ok(changes)
    }

    /// Builds a change-set from a known schema without introspection.
    pub fn with_schema(
        database: Arc<dyn Database>,
        table_name: &str,
        columns: Vec<ColumnSchema>,
    ) -> Self {
        let dialect = database.dialect();
        Self::build(Some(database), dialect, table_name, columns)
    }

    /// Builds a change-set that can only be planned, never persisted.
    pub fn offline(
        provider: DatabaseProviderType,
        table_name: &str,
        columns: Vec<ColumnSchema>,
    ) -> Self {
        Self::build(None, dialect::for_provider(provider), table_name, columns)
    }

    pub fn table_name(&self) -> &str {
        &self.schema.table_name
    }

    pub const fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.schema.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.column_names().collect()
    }

    pub fn key_names(&self) -> Vec<&str> {
        self.schema.key_names()
    }

    /// Annotation names in registration order.
    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    pub const fn dialect(&self) -> &'static dyn SqlDialect {
        self.dialect
    }

    pub const fn has_been_persisted(&self) -> bool {
        self.has_been_persisted
    }

    pub const fn options(&self) -> &PersistOptions {
        &self.options
    }

    pub const fn options_mut(&mut self) -> &mut PersistOptions {
        &mut self.options
    }

    pub fn set_options(&mut self, options: PersistOptions) {
        self.options = options;
    }

    /// Marks columns as keys and NOT NULL.
    ///
    /// Keys are never un-marked. The key index is rebuilt from the rows whose
    /// new key tuple is fully assigned.
    ///
    /// # Errors
    /// `UnknownColumn` if any name is not a column; nothing changes then.
    pub fn set_columns_as_keys(&mut self, names: &[&str]) -> Result<()> {
        self.schema.mark_keys(names)?;
        self.rebuild_key_index();
        Ok(())
    }

    fn rebuild_key_index(&mut self) {
        let keys: Vec<usize> = self.schema.key_columns().map(|c| c.index).collect();
        self.key_index.clear();
        for (position, row) in self.rows.iter().enumerate() {
            let tuple = keys
                .iter()
                .map(|index| row.value(*index).cloned())
                .collect::<Option<Vec<_>>>();
            // Earliest row wins when several share a tuple.
            if let Some(tuple) = tuple {
                self.key_index.entry(tuple).or_insert(position);
            }
        }
    }

    /// Adds a generator consulted before the built-in defaults.
    pub fn add_default_value_generator(&mut self, generator: DefaultValueGenerator) {
        self.defaults.push_front(generator);
    }

    /// Sets the hook run on every new row.
    pub fn set_key_initializer(&mut self, initializer: KeyInitializer) {
        self.key_initializer = Some(initializer);
    }

    fn view(&self, position: usize) -> Option<RowRef<'_>> {
        self.rows.get(position).map(|row| RowRef {
            row,
            schema: &self.schema,
            annotations: &self.annotations,
            position,
        })
    }

    /// Read access to the row at `position`.
    pub fn row(&self, position: usize) -> Option<RowRef<'_>> {
        self.view(position)
    }

    /// Write access to the row at `position`.
    ///
    /// Changing key columns of a row found by key does not move it in the
    /// key index.
    pub fn row_mut(&mut self, position: usize) -> Option<RowMut<'_>> {
        let row = self.rows.get_mut(position)?;
        Some(RowMut {
            row,
            schema: &self.schema,
            annotations: &mut self.annotations,
            position,
        })
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        (0..self.rows.len()).filter_map(|position| self.view(position))
    }

    pub const fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First row matching `predicate`.
    pub fn find<P>(&self, predicate: P) -> Option<RowRef<'_>>
    where
        P: Fn(&RowRef<'_>) -> bool,
    {
        self.rows().find(|row| predicate(row))
    }

    /// Appends an empty row and runs the key initializer on it.
    ///
    /// # Errors
    /// Whatever the key initializer returns; the row is discarded then.
    pub fn new_row(&mut self) -> Result<RowMut<'_>> {
        let position = self.push_row()?;
        self.row_mut(position)
            .ok_or_else(|| TableSyncError::configuration("new row vanished"))
    }

    fn push_row(&mut self) -> Result<usize> {
        let position = self.rows.len();
        self.rows.push(RowChange::new(self.schema.columns.len()));

        if let Some(initializer) = &self.key_initializer {
            let mut row = RowMut {
                row: &mut self.rows[position],
                schema: &self.schema,
                annotations: &mut self.annotations,
                position,
            };
            if let Err(e) = initializer(&mut row) {
                self.rows.pop();
                return Err(e);
            }
        }

        Ok(position)
    }

    /// Returns the row with the given key tuple, creating it if needed.
    ///
    /// Keys are given in key-column order and converted to the key column
    /// types. A new row runs the key initializer before its keys are set.
    ///
    /// # Errors
    /// `KeyCountMismatch` when `keys` does not have one value per key column,
    /// `Conversion` when a key does not fit its column.
    pub fn get_or_create_by_key_values(&mut self, keys: Vec<SqlValue>) -> Result<RowMut<'_>> {
        let key_columns: Vec<&TableColumn> = self.schema.key_columns().collect();
        if keys.len() != key_columns.len() {
            return Err(TableSyncError::KeyCountMismatch {
                expected: key_columns.len(),
                actual: keys.len(),
            });
        }

        let tuple = keys
            .into_iter()
            .zip(&key_columns)
            .map(|(value, column)| value.convert_to(&column.data_type, &column.name))
            .collect::<Result<Vec<_>>>()?;
        let key_indexes: Vec<usize> = key_columns.iter().map(|c| c.index).collect();

        let position = match self.key_index.get(&tuple) {
            Some(position) => *position,
            None => {
                let position = self.push_row()?;
                let slots = self.rows[position].values_mut();
                for (index, value) in key_indexes.into_iter().zip(tuple.iter().cloned()) {
                    slots[index] = Some(value);
                }
                self.key_index.insert(tuple, position);
                position
            }
        };

        self.row_mut(position)
            .ok_or_else(|| TableSyncError::configuration("indexed row vanished"))
    }

    pub fn has_column_or_annotation(&self, name: &str) -> bool {
        self.schema.try_column_index(name).is_some() || self.annotation_index(name).is_some()
    }

    /// Position of a column.
    ///
    /// # Errors
    /// `UnknownColumn` when the table has no such column.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.schema.column_index(name)
    }

    pub fn try_column_index(&self, name: &str) -> Option<usize> {
        self.schema.try_column_index(name)
    }

    pub fn annotation_index(&self, name: &str) -> Option<usize> {
        row::annotation_position(&self.annotations, name)
    }

    /// Runs the default-value chain for a column, optionally in the context
    /// of the row at `position`.
    ///
    /// # Errors
    /// `UnknownColumn`, or `NoDefaultValue` when no generator answers.
    pub fn default_value_for_column(
        &self,
        column: &str,
        position: Option<usize>,
    ) -> Result<SqlValue> {
        let column = self.schema.column(column)?;
        let row = position.and_then(|p| self.rows.get(p));
        self.defaults
            .resolve(row, column, &self.schema.columns, &self.schema.table_name)
    }

    /// A reusable accessor for one column or annotation.
    ///
    /// # Errors
    /// `UnknownColumn` when `name` is neither a column nor a registered
    /// annotation.
    pub fn make_getter<T: FromSqlValue>(&self, name: &str) -> Result<ValueGetter<T>> {
        let source = match self.schema.try_column_index(name) {
            Some(index) => GetterSource::Column(index),
            None => self
                .annotation_index(name)
                .map(GetterSource::Annotation)
                .ok_or_else(|| TableSyncError::unknown_column(name, self.table_name()))?,
        };

        Ok(ValueGetter {
            name: name.to_string(),
            source,
            target: PhantomData,
        })
    }

    /// Drops all rows and the key index; schema and annotations stay.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.key_index.clear();
        self.has_been_persisted = false;
    }

    fn builder<'a>(&'a self, rows: &'a [RowChange]) -> SqlBuilder<'a> {
        SqlBuilder::new(
            &self.schema,
            rows,
            self.dialect,
            &self.options,
            &self.defaults,
        )
    }

    /// The batches a persist would run, assuming no unknown row exists yet.
    ///
    /// # Errors
    /// Invalid options, or `NoDefaultValue` for an insert row.
    pub fn plan(&self) -> Result<PersistPlan> {
        self.options.validate()?;

        let existence_checks = self.builder(&self.rows).existence_checks();

        let mut classified = self.rows.clone();
        for row in &mut classified {
            if row.is_unknown_change() {
                row.set_change_type(ChangeType::Insert);
            }
        }
        let writes = self.builder(&classified).writes()?;

        Ok(PersistPlan {
            existence_checks,
            writes,
        })
    }

    /// Writes every pending row.
    ///
    /// Does nothing when there are no rows. Unknown rows whose key exists in
    /// the table become updates, all other unknown rows become inserts.
    ///
    /// # Errors
    /// Invalid options, a change-set without a database, `NoDefaultValue`,
    /// or the first failing statement. Earlier batches stay committed unless
    /// the database runs inside a transaction.
    pub async fn persist(&mut self) -> Result<PersistSummary> {
        if self.rows.is_empty() {
            tracing::debug!(table = %self.schema.table_name, "No rows to persist");
            return Ok(PersistSummary::default());
        }

        self.options.validate()?;
        let database = self.database.clone().ok_or_else(|| {
            TableSyncError::configuration(format!(
                "Change-set for {} has no database",
                self.schema.table_name
            ))
        })?;

        let mut summary = PersistSummary::default();

        let existing = self.find_existing_rows(database.as_ref(), &mut summary).await?;
        for position in existing {
            if let Some(row) = self.rows.get_mut(position) {
                row.set_change_type(ChangeType::Update);
            }
        }
        for row in &mut self.rows {
            if row.is_unknown_change() {
                row.set_change_type(ChangeType::Insert);
            }
        }

        summary.inserts = self
            .rows
            .iter()
            .filter(|r| r.change_type() == ChangeType::Insert)
            .count();
        summary.updates = self.rows.len() - summary.inserts;

        let builder = self.builder(&self.rows);
        for step in builder.writes()? {
            match step {
                PlannedStep::Sql(batch) => {
                    tracing::debug!(rows = batch.rows.len(), length = batch.sql.len(), "Running batch");
                    tracing::trace!(sql = %batch.sql, "Batch SQL");
                    database.execute_non_query(&batch.sql).await?;
                    summary.batches += 1;
                }
                PlannedStep::BulkCopy { rows } => {
                    self.bulk_copy(database.as_ref(), &builder, &rows).await?;
                    summary.bulk_copies += 1;
                }
            }
        }

        self.has_been_persisted = true;
        tracing::info!(
            table = %self.schema.table_name,
            inserts = summary.inserts,
            updates = summary.updates,
            batches = summary.batches,
            bulk_copies = summary.bulk_copies,
            "Persisted changes"
        );
        Ok(summary)
    }

    async fn find_existing_rows(
        &self,
        database: &dyn Database,
        summary: &mut PersistSummary,
    ) -> Result<Vec<usize>> {
        let mut existing = Vec::new();
        for batch in self.builder(&self.rows).existence_checks() {
            tracing::trace!(sql = %batch.sql, "Existence check SQL");
            let records = database.query(&batch.sql).await?;
            summary.batches += 1;
            existing.extend(records.iter().filter_map(|record| {
                record
                    .values()
                    .first()
                    .and_then(i64::from_sql_value)
                    .and_then(|i| usize::try_from(i).ok())
            }));
        }
        Ok(existing)
    }

    async fn bulk_copy(
        &self,
        database: &dyn Database,
        builder: &SqlBuilder<'_>,
        rows: &[usize],
    ) -> Result<()> {
        let values = rows
            .iter()
            .map(|position| builder.insert_values(*position))
            .collect::<Result<Vec<_>>>()?;
        let columns: Vec<TableColumn> = builder.insert_columns().into_iter().cloned().collect();

        tracing::debug!(rows = values.len(), table = %self.schema.table_name, "Bulk copying rows");
        if let Err(error) = database
            .bulk_copy(&self.schema.table_name, &columns, &values)
            .await
        {
            tracing::error!(table = %self.schema.table_name, %error, "Bulk copy failed");
            for row in &values {
                let dump = columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| format!("{} = {value}", column.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                tracing::error!("{dump}");
            }
            return Err(error);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GetterSource {
    Column(usize),
    Annotation(usize),
}

/// Typed accessor created by [`TableChanges::make_getter`].
#[derive(Debug, Clone)]
pub struct ValueGetter<T> {
    name: String,
    source: GetterSource,
    target: PhantomData<fn() -> T>,
}

impl<T: FromSqlValue> ValueGetter<T> {
    /// Reads the value from `row`; unassigned and null both give `None`.
    ///
    /// # Errors
    /// `Conversion` when the stored value has an incompatible type.
    pub fn get(&self, row: &RowRef<'_>) -> Result<Option<T>> {
        let value = match self.source {
            GetterSource::Column(index) => row.get_at(index),
            GetterSource::Annotation(index) => row.row().annotation(index),
        };

        match value {
            None | Some(SqlValue::Null) => Ok(None),
            Some(value) => T::from_sql_value(value).map(Some).ok_or_else(|| {
                TableSyncError::conversion(
                    value.to_string(),
                    &self.name,
                    std::any::type_name::<T>(),
                )
            }),
        }
    }
}
