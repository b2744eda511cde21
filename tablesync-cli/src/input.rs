//! Reading row files and schema files, and staging rows into a change-set.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tablesync_core::changes::RowSource;
use tablesync_core::{SqlValue, TableChanges, TableDefinition};

/// One input row, as read from the JSON file.
pub type JsonRow = Map<String, Value>;

/// Reads a JSON array of objects.
///
/// # Errors
/// Fails when the file cannot be read, is not JSON, or is not an array of
/// objects.
pub fn read_rows(path: &Path) -> Result<Vec<JsonRow>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read row file {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("Row file {} is not valid JSON", path.display()))?;

    let Value::Array(items) = value else {
        bail!("Row file {} must contain a JSON array", path.display());
    };

    items
        .into_iter()
        .enumerate()
        .map(|(position, item)| match item {
            Value::Object(row) => Ok(row),
            other => Err(anyhow!(
                "Row {position} in {} is not an object: {other}",
                path.display()
            )),
        })
        .collect()
}

/// Reads a table definition file.
///
/// # Errors
/// Fails when the file cannot be read or does not describe a table.
pub fn read_table_definition(path: &Path) -> Result<TableDefinition> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    let definition: TableDefinition = serde_json::from_str(&text)
        .with_context(|| format!("Schema file {} is not a table definition", path.display()))?;

    if definition.columns.is_empty() {
        bail!("Schema file {} defines no columns", path.display());
    }
    Ok(definition)
}

/// Adds `rows` to `changes`, matching them by key.
///
/// Rows sharing a key tuple merge into one change; field names match columns
/// without regard to case. A table without keys gets one new row per object.
/// Fields that are not columns are skipped with a warning.
///
/// # Errors
/// Fails when a row lacks a key field or a value does not fit its column.
pub fn stage_rows(changes: &mut TableChanges, rows: &[JsonRow]) -> Result<usize> {
    let keys: Vec<String> = changes.key_names().into_iter().map(str::to_string).collect();
    let mut ignored = BTreeSet::new();

    for (position, row) in rows.iter().enumerate() {
        ignored.extend(
            row.keys()
                .filter(|name| changes.try_column_index(name).is_none())
                .cloned(),
        );

        let mut target = if keys.is_empty() {
            changes.new_row()?
        } else {
            let key_values = keys
                .iter()
                .map(|key| {
                    row.property(key)
                        .ok_or_else(|| anyhow!("Row {position} has no value for key column {key}"))
                })
                .collect::<Result<Vec<_>>>()?;
            changes
                .get_or_create_by_key_values(key_values)
                .with_context(|| format!("Row {position} has an invalid key"))?
        };

        target
            .apply_dictionary_with(
                row.iter().map(|(name, value)| (name, SqlValue::from_json(value))),
                false,
            )
            .with_context(|| format!("Row {position} does not fit the table"))?;
    }

    if !ignored.is_empty() {
        tracing::warn!(fields = ?ignored, "Skipped fields that are not table columns");
    }

    let staged = changes.rows().count();
    tracing::debug!(input = rows.len(), staged, "Staged input rows");
    Ok(staged)
}
