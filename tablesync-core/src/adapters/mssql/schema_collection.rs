//! SQL Server table introspection.
//!
//! Column metadata comes from `INFORMATION_SCHEMA`, with identity and
//! computed flags from `COLUMNPROPERTY`.

use super::SqlServerAdapter;
use super::type_mapping::map_sqlserver_type;
use crate::Result;
use crate::adapters::{DataRecord, Database};
use crate::error::TableSyncError;
use crate::models::ColumnSchema;
use crate::value::SqlValue;

/// Splits `schema.table`, either part optionally bracket-quoted.
pub(crate) fn split_table_name(table: &str) -> (Option<String>, String) {
    let unquote = |part: &str| {
        part.strip_prefix('[')
            .and_then(|p| p.strip_suffix(']'))
            .map_or_else(|| part.to_string(), |p| p.replace("]]", "]"))
    };
    match table.rsplit_once('.') {
        Some((schema, name)) => (Some(unquote(schema)), unquote(name)),
        None => (None, unquote(table)),
    }
}

fn string_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

pub(crate) fn columns_query(schema: Option<&str>, name: &str) -> String {
    let schema = schema.map_or_else(|| "SCHEMA_NAME()".to_string(), string_literal);
    format!(
        "SELECT c.COLUMN_NAME AS column_name,
       c.DATA_TYPE AS data_type,
       CAST(c.CHARACTER_MAXIMUM_LENGTH AS int) AS char_max_length,
       CAST(c.NUMERIC_PRECISION AS int) AS numeric_precision,
       CAST(c.NUMERIC_SCALE AS int) AS numeric_scale,
       c.IS_NULLABLE AS is_nullable,
       CAST(COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)), c.COLUMN_NAME, 'IsIdentity') AS int) AS is_identity,
       CAST(COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)), c.COLUMN_NAME, 'IsComputed') AS int) AS is_computed,
       CASE WHEN k.COLUMN_NAME IS NULL THEN 0 ELSE 1 END AS is_key
FROM INFORMATION_SCHEMA.COLUMNS c
LEFT JOIN (
    SELECT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
        ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME AND tc.CONSTRAINT_SCHEMA = ku.CONSTRAINT_SCHEMA
    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
) k ON k.TABLE_SCHEMA = c.TABLE_SCHEMA AND k.TABLE_NAME = c.TABLE_NAME AND k.COLUMN_NAME = c.COLUMN_NAME
WHERE c.TABLE_SCHEMA = {schema} AND c.TABLE_NAME = {name}
ORDER BY c.ORDINAL_POSITION",
        name = string_literal(name)
    )
}

fn text(record: &DataRecord, field: &str) -> Result<String> {
    match record.get(field) {
        Some(SqlValue::Text(value)) => Ok(value.clone()),
        other => Err(TableSyncError::conversion(
            format!("{other:?}"),
            field,
            "String",
        )),
    }
}

fn int(record: &DataRecord, field: &str) -> Option<i64> {
    match record.get(field) {
        Some(SqlValue::Int(value)) => Some(*value),
        _ => None,
    }
}

/// Collects the columns of `table` in ordinal order.
pub(crate) async fn collect_columns(adapter: &SqlServerAdapter, table: &str) -> Result<Vec<ColumnSchema>> {
    let (schema, name) = split_table_name(table);
    let records = adapter.query(&columns_query(schema.as_deref(), &name)).await?;

    let columns = records
        .iter()
        .map(|record| {
            let data_type = text(record, "data_type")?;
            let rowversion = matches!(data_type.to_lowercase().as_str(), "timestamp" | "rowversion");

            Ok(ColumnSchema {
                name: text(record, "column_name")?,
                data_type: map_sqlserver_type(
                    &data_type,
                    int(record, "char_max_length").and_then(|v| i32::try_from(v).ok()),
                    int(record, "numeric_precision").and_then(|v| u8::try_from(v).ok()),
                    int(record, "numeric_scale").and_then(|v| u8::try_from(v).ok()),
                ),
                is_key: int(record, "is_key") == Some(1),
                allow_null: text(record, "is_nullable")?.eq_ignore_ascii_case("YES"),
                is_identity: int(record, "is_identity") == Some(1),
                is_read_only: rowversion || int(record, "is_computed") == Some(1),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(table, columns = columns.len(), "Collected SQL Server columns");
    Ok(columns)
}
