//! Turns a change-set into batched SQL.
//!
//! Every batch has the same shape: an optional prologue, a staging-table
//! declaration, one fragment per row, and a trailer that joins the staging
//! table against the target. Fragments are packed greedily so no batch
//! exceeds the statement cap unless a single row already does.

use super::column::{DefaultValues, TableColumn, TableSchema};
use super::row::{ChangeType, RowChange};
use crate::Result;
use crate::adapters::PersistOptions;
use crate::dialect::{ROW_INDEX_COLUMN, STAGING_ALIAS, SqlDialect, TARGET_ALIAS};
use crate::value::SqlValue;
use indexmap::IndexMap;
use serde::Serialize;

/// One SQL batch and the rows it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedBatch {
    pub sql: String,
    /// Positions of the rows in the change-set.
    pub rows: Vec<usize>,
}

/// One write step of a persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlannedStep {
    Sql(PlannedBatch),
    /// Rows streamed through the driver's bulk copy.
    BulkCopy { rows: Vec<usize> },
}

impl PlannedStep {
    pub fn rows(&self) -> &[usize] {
        match self {
            Self::Sql(batch) => &batch.rows,
            Self::BulkCopy { rows } => rows,
        }
    }
}

/// Everything a persist would run, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistPlan {
    /// Queries returning the positions of rows that already exist.
    pub existence_checks: Vec<PlannedBatch>,
    pub writes: Vec<PlannedStep>,
}

impl PersistPlan {
    pub fn is_empty(&self) -> bool {
        self.existence_checks.is_empty() && self.writes.is_empty()
    }

    /// Renders the plan as a script with `GO` between batches.
    pub fn to_script(&self) -> String {
        let mut script = String::new();
        let batches = self.existence_checks.iter().map(|b| b.sql.clone()).chain(
            self.writes.iter().map(|step| match step {
                PlannedStep::Sql(batch) => batch.sql.clone(),
                PlannedStep::BulkCopy { rows } => {
                    format!("-- bulk copy of {} rows\n", rows.len())
                }
            }),
        );
        for sql in batches {
            script.push_str(&sql);
            if !sql.ends_with('\n') {
                script.push('\n');
            }
            script.push_str("GO\n");
        }
        script
    }
}

/// Builds the batches for one planning call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SqlBuilder<'a> {
    schema: &'a TableSchema,
    rows: &'a [RowChange],
    dialect: &'a dyn SqlDialect,
    options: &'a PersistOptions,
    defaults: &'a DefaultValues,
}

impl<'a> SqlBuilder<'a> {
    pub(crate) const fn new(
        schema: &'a TableSchema,
        rows: &'a [RowChange],
        dialect: &'a dyn SqlDialect,
        options: &'a PersistOptions,
        defaults: &'a DefaultValues,
    ) -> Self {
        Self {
            schema,
            rows,
            dialect,
            options,
            defaults,
        }
    }

    fn target(&self) -> String {
        self.dialect.quote_table_name(&self.schema.table_name)
    }

    fn quote(&self, column: &TableColumn) -> String {
        self.dialect.quote_identifier(&column.name)
    }

    fn keys(&self) -> Vec<&'a TableColumn> {
        self.schema.key_columns().collect()
    }

    fn has_all_keys(&self, row: &RowChange) -> bool {
        self.schema
            .key_columns()
            .all(|key| row.value(key.index).is_some_and(|v| !v.is_null()))
    }

    fn literal_list<'v>(&self, values: impl IntoIterator<Item = &'v SqlValue>) -> String {
        values
            .into_iter()
            .map(|v| self.dialect.format_value(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn staging_insert(&self, values: &str) -> String {
        format!(
            "INSERT INTO {} VALUES ({values}){}",
            self.dialect.staging_table(),
            self.dialect.statement_terminator()
        )
    }

    fn staging_header(&self, columns: &[String], primary_key: &[String]) -> String {
        format!(
            "{}{}",
            self.dialect.batch_prologue(),
            self.dialect.declare_staging_table(columns, primary_key)
        )
    }

    fn key_join(&self) -> String {
        self.schema
            .key_columns()
            .map(|key| {
                let name = self.quote(key);
                format!("{TARGET_ALIAS}.{name} = {STAGING_ALIAS}.{name}")
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Batches that select the `i` of every unknown row whose key exists in
    /// the target table.
    ///
    /// Rows with a missing or null key part cannot exist yet and are left out.
    pub(crate) fn existence_checks(&self) -> Vec<PlannedBatch> {
        let keys = self.keys();
        if keys.is_empty() {
            return Vec::new();
        }

        let fragments: Vec<(usize, String)> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.is_unknown_change() && self.has_all_keys(row))
            .map(|(position, row)| {
                let index = SqlValue::Int(i64::try_from(position).unwrap_or(i64::MAX));
                let values = self.literal_list(
                    keys.iter()
                        .filter_map(|key| row.value(key.index))
                        .chain(std::iter::once(&index)),
                );
                (position, self.staging_insert(&values))
            })
            .collect();

        if fragments.is_empty() {
            return Vec::new();
        }

        let index_column = self.dialect.quote_identifier(ROW_INDEX_COLUMN);
        let mut staging_columns: Vec<String> = keys
            .iter()
            .map(|key| key.staging_definition(self.dialect))
            .collect();
        staging_columns.push(format!("{index_column} int NOT NULL"));
        let primary_key: Vec<String> = keys.iter().map(|key| self.quote(key)).collect();

        let header = self.staging_header(&staging_columns, &primary_key);
        let trailer = format!(
            "\nSELECT {STAGING_ALIAS}.{index_column} FROM {} AS {STAGING_ALIAS} INNER JOIN {} AS {TARGET_ALIAS} ON {}{}\n{}",
            self.dialect.staging_table(),
            self.target(),
            self.key_join(),
            self.dialect.statement_terminator(),
            self.dialect.batch_epilogue()
        );

        chunk_statements(
            &header,
            "\n",
            fragments,
            &trailer,
            self.options.max_statement_length,
        )
    }

    /// Columns written by inserts: everything except identity columns.
    pub(crate) fn insert_columns(&self) -> Vec<&'a TableColumn> {
        self.schema
            .columns
            .iter()
            .filter(|c| !c.is_identity)
            .collect()
    }

    /// Values for every insert column of one row, defaults filled in.
    ///
    /// # Errors
    /// `NoDefaultValue` when an unassigned column has no default.
    pub(crate) fn insert_values(&self, position: usize) -> Result<Vec<SqlValue>> {
        let row = &self.rows[position];
        self.insert_columns()
            .into_iter()
            .map(|column| self.value_or_default(row, column))
            .collect()
    }

    fn value_or_default(&self, row: &RowChange, column: &TableColumn) -> Result<SqlValue> {
        match row.value(column.index) {
            Some(value) => Ok(value.clone()),
            None => self.defaults.resolve(
                Some(row),
                column,
                &self.schema.columns,
                &self.schema.table_name,
            ),
        }
    }

    fn rows_of(&self, change_type: ChangeType) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.change_type() == change_type)
            .map(|(position, _)| position)
            .collect()
    }

    /// Insert steps: staged SQL for small sets or dialects without bulk copy,
    /// bulk-copy chunks otherwise.
    pub(crate) fn inserts(&self) -> Result<Vec<PlannedStep>> {
        let inserts = self.rows_of(ChangeType::Insert);
        if inserts.is_empty() {
            return Ok(Vec::new());
        }

        let bulk = self.options.use_bulk_copy
            && self.dialect.supports_bulk_copy()
            && inserts.len() >= self.options.min_bulk_copy_rows;

        if bulk {
            return Ok(inserts
                .chunks(self.options.max_bulk_copy_rows.max(1))
                .map(|chunk| PlannedStep::BulkCopy {
                    rows: chunk.to_vec(),
                })
                .collect());
        }

        let columns = self.insert_columns();
        let fragments = inserts
            .into_iter()
            .map(|position| {
                let values = self.insert_values(position)?;
                Ok((position, self.staging_insert(&self.literal_list(&values))))
            })
            .collect::<Result<Vec<_>>>()?;

        let staging_columns: Vec<String> = columns
            .iter()
            .map(|c| c.staging_definition(self.dialect))
            .collect();
        let column_list = columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ");

        let header = self.staging_header(&staging_columns, &[]);
        let trailer = format!(
            "\nINSERT INTO {} ({column_list}) SELECT {column_list} FROM {}{}\n{}",
            self.target(),
            self.dialect.staging_table(),
            self.dialect.statement_terminator(),
            self.dialect.batch_epilogue()
        );

        Ok(chunk_statements(
            &header,
            "\n",
            fragments,
            &trailer,
            self.options.max_statement_length,
        )
        .into_iter()
        .map(PlannedStep::Sql)
        .collect())
    }

    /// Columns an update of `row` would write: assigned, non-key,
    /// non-identity and not the audit timestamp.
    fn update_map(&self, row: &RowChange) -> Vec<usize> {
        self.schema
            .columns
            .iter()
            .filter(|c| !c.is_key && !c.is_identity && !c.is_timestamp())
            .filter(|c| row.value(c.index).is_some())
            .map(|c| c.index)
            .collect()
    }

    fn group_by_update_map(&self, positions: Vec<usize>) -> IndexMap<Vec<usize>, Vec<usize>> {
        let mut groups: IndexMap<Vec<usize>, Vec<usize>> = IndexMap::new();
        for position in positions {
            let map = self.update_map(&self.rows[position]);
            groups.entry(map).or_default().push(position);
        }
        groups
    }

    fn timestamp_columns(&self) -> Vec<&'a TableColumn> {
        self.schema
            .columns
            .iter()
            .filter(|c| c.is_timestamp())
            .collect()
    }

    /// One join update per distinct set of assigned columns.
    ///
    /// Only rows where at least one assigned column differs are touched. The
    /// audit timestamp is always refreshed on the rows that change.
    pub(crate) fn updates(&self) -> Result<Vec<PlannedBatch>> {
        let (keyed, missing_keys): (Vec<usize>, Vec<usize>) = self
            .rows_of(ChangeType::Update)
            .into_iter()
            .partition(|position| self.has_all_keys(&self.rows[*position]));

        if !missing_keys.is_empty() {
            tracing::warn!(
                table = %self.schema.table_name,
                rows = missing_keys.len(),
                "Skipping update rows without a complete key"
            );
        }

        let keys = self.keys();
        let mut batches = Vec::new();

        for (map, positions) in self.group_by_update_map(keyed) {
            if map.is_empty() {
                continue;
            }

            let mapped: Vec<&TableColumn> =
                map.iter().map(|index| &self.schema.columns[*index]).collect();

            let fragments: Vec<(usize, String)> = positions
                .iter()
                .map(|position| {
                    let row = &self.rows[*position];
                    let values = self.literal_list(
                        keys.iter()
                            .chain(mapped.iter())
                            .filter_map(|column| row.value(column.index)),
                    );
                    (*position, self.staging_insert(&values))
                })
                .collect();

            let staging_columns: Vec<String> = keys
                .iter()
                .chain(mapped.iter())
                .map(|c| c.staging_definition(self.dialect))
                .collect();
            let primary_key: Vec<String> = keys.iter().map(|key| self.quote(key)).collect();

            let mut assignments: Vec<String> = mapped
                .iter()
                .map(|c| {
                    let name = self.quote(c);
                    format!("{TARGET_ALIAS}.{name} = {STAGING_ALIAS}.{name}")
                })
                .collect();
            for column in self.timestamp_columns() {
                let fresh = self.defaults.resolve(
                    None,
                    column,
                    &self.schema.columns,
                    &self.schema.table_name,
                )?;
                assignments.push(format!(
                    "{TARGET_ALIAS}.{} = {}",
                    self.quote(column),
                    self.dialect.format_value(&fresh)
                ));
            }

            let predicate = mapped
                .iter()
                .map(|c| self.difference_clause(c))
                .collect::<Vec<_>>()
                .join("\nOR ");

            let header = self.staging_header(&staging_columns, &primary_key);
            let trailer = format!(
                "\n{}{}",
                self.dialect.update_from_staging(
                    &self.target(),
                    &assignments.join(",\n"),
                    &self.key_join(),
                    &predicate,
                ),
                self.dialect.batch_epilogue()
            );

            batches.extend(chunk_statements(
                &header,
                "\n",
                fragments,
                &trailer,
                self.options.max_statement_length,
            ));
        }

        Ok(batches)
    }

    fn difference_clause(&self, column: &TableColumn) -> String {
        let name = self.quote(column);
        let target = format!("{TARGET_ALIAS}.{name}");
        let staged = format!("{STAGING_ALIAS}.{name}");
        if column.allow_db_null {
            format!(
                "({target} <> {staged} OR ({target} IS NULL AND {staged} IS NOT NULL) OR ({target} IS NOT NULL AND {staged} IS NULL))"
            )
        } else {
            format!("{target} <> {staged}")
        }
    }

    /// Multi-row `INSERT ... VALUES` with the dialect's upsert tail, one group
    /// per distinct set of assigned columns.
    ///
    /// Returns `None` when the dialect has no native upsert.
    pub(crate) fn native_upserts(&self) -> Result<Option<Vec<PlannedBatch>>> {
        if self.dialect.upsert_clause(&[]).is_none() {
            return Ok(None);
        }

        let positions: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| match row.change_type() {
                ChangeType::Update => self.has_all_keys(row),
                _ => true,
            })
            .map(|(position, _)| position)
            .collect();

        let column_list = self
            .schema
            .columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let header = format!(
            "{}INSERT INTO {} ({column_list}) VALUES\n",
            self.dialect.batch_prologue(),
            self.target()
        );

        let mut batches = Vec::new();
        for (map, group) in self.group_by_update_map(positions) {
            // Updates that assign nothing have nothing to write.
            let group: Vec<usize> = group
                .into_iter()
                .filter(|position| {
                    !map.is_empty() || self.rows[*position].change_type() != ChangeType::Update
                })
                .collect();
            if group.is_empty() {
                continue;
            }

            let fragments = group
                .into_iter()
                .map(|position| {
                    let row = &self.rows[position];
                    let values = self
                        .schema
                        .columns
                        .iter()
                        .map(|column| match row.value(column.index) {
                            None if column.is_identity => Ok(SqlValue::Null),
                            _ => self.value_or_default(row, column),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Ok((position, format!("({})", self.literal_list(&values))))
                })
                .collect::<Result<Vec<_>>>()?;

            let mut update_columns: Vec<String> = map
                .iter()
                .map(|index| self.quote(&self.schema.columns[*index]))
                .chain(self.timestamp_columns().into_iter().map(|c| self.quote(c)))
                .collect();
            if update_columns.is_empty() {
                // A no-op assignment keeps the statement valid for pure inserts.
                if let Some(first) = self.schema.key_columns().next().or(self.schema.columns.first()) {
                    update_columns.push(self.quote(first));
                }
            }

            let trailer = self
                .dialect
                .upsert_clause(&update_columns)
                .unwrap_or_default();

            batches.extend(chunk_statements(
                &header,
                ",\n",
                fragments,
                &trailer,
                self.options.max_statement_length,
            ));
        }

        Ok(Some(batches))
    }

    /// All write steps in execution order.
    pub(crate) fn writes(&self) -> Result<Vec<PlannedStep>> {
        if self.options.use_native_upsert
            && let Some(upserts) = self.native_upserts()?
        {
            return Ok(upserts.into_iter().map(PlannedStep::Sql).collect());
        }

        let mut steps = self.inserts()?;
        steps.extend(self.updates()?.into_iter().map(PlannedStep::Sql));
        Ok(steps)
    }
}

/// Packs fragments into batches of `header + fragments + trailer`.
///
/// A fragment is appended only if the batch stays within `cap`; a batch
/// always holds at least one fragment.
pub(crate) fn chunk_statements(
    header: &str,
    separator: &str,
    fragments: Vec<(usize, String)>,
    trailer: &str,
    cap: usize,
) -> Vec<PlannedBatch> {
    let mut batches = Vec::new();
    let mut sql = String::from(header);
    let mut rows = Vec::new();

    for (row, fragment) in fragments {
        let addition = if rows.is_empty() {
            fragment.len()
        } else {
            separator.len() + fragment.len()
        };

        if !rows.is_empty() && sql.len() + addition + trailer.len() > cap {
            sql.push_str(trailer);
            batches.push(PlannedBatch {
                sql: std::mem::replace(&mut sql, String::from(header)),
                rows: std::mem::take(&mut rows),
            });
        }

        if !rows.is_empty() {
            sql.push_str(separator);
        }
        sql.push_str(&fragment);
        rows.push(row);
    }

    if !rows.is_empty() {
        sql.push_str(trailer);
        batches.push(PlannedBatch { sql, rows });
    }

    tracing::debug!(batches = batches.len(), "Chunked statements");
    batches
}
