//! MySQL table introspection.
//!
//! Reads column metadata for one table from `INFORMATION_SCHEMA.COLUMNS`;
//! no table data is fetched.

use super::MySqlAdapter;
use super::type_mapping::map_mysql_type;
use crate::Result;
use crate::models::ColumnSchema;
use sqlx::Row;

/// Text columns are cast so their collation does not affect decoding.
const COLUMNS_QUERY: &str = "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name,
       CAST(DATA_TYPE AS CHAR) AS data_type,
       CAST(COLUMN_TYPE AS CHAR) AS column_type,
       CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS char_max_length,
       CAST(NUMERIC_PRECISION AS SIGNED) AS numeric_precision,
       CAST(NUMERIC_SCALE AS SIGNED) AS numeric_scale,
       CAST(IS_NULLABLE AS CHAR) AS is_nullable,
       CAST(COLUMN_KEY AS CHAR) AS column_key,
       CAST(EXTRA AS CHAR) AS extra
FROM INFORMATION_SCHEMA.COLUMNS
WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
ORDER BY ORDINAL_POSITION";

/// Splits `schema.table` (either part optionally backtick-quoted).
pub(crate) fn split_table_name(table: &str) -> (Option<String>, String) {
    let unquote = |part: &str| part.trim_matches('`').replace("``", "`");
    match table.rsplit_once('.') {
        Some((schema, name)) => (Some(unquote(schema)), unquote(name)),
        None => (None, unquote(table)),
    }
}

/// Collects the columns of `table` in ordinal order.
pub(crate) async fn collect_columns(adapter: &MySqlAdapter, table: &str) -> Result<Vec<ColumnSchema>> {
    let (schema, name) = split_table_name(table);

    let rows = adapter
        .bounded(
            COLUMNS_QUERY,
            sqlx::query(COLUMNS_QUERY)
                .bind(schema)
                .bind(&name)
                .fetch_all(&adapter.pool),
        )
        .await?;

    let columns = rows
        .iter()
        .map(|row| {
            let column_name: String = row.try_get("column_name")?;
            let data_type: String = row.try_get("data_type")?;
            let column_type: String = row.try_get("column_type")?;
            let char_max_length: Option<i64> = row.try_get("char_max_length")?;
            let numeric_precision: Option<i64> = row.try_get("numeric_precision")?;
            let numeric_scale: Option<i64> = row.try_get("numeric_scale")?;
            let is_nullable: String = row.try_get("is_nullable")?;
            let column_key: String = row.try_get("column_key")?;
            let extra: String = row.try_get("extra")?;

            let data_type = map_mysql_type(
                &data_type,
                &column_type,
                char_max_length.and_then(|v| u32::try_from(v).ok()),
                numeric_precision.and_then(|v| u8::try_from(v).ok()),
                numeric_scale.and_then(|v| u8::try_from(v).ok()),
            );
            let extra = extra.to_lowercase();

            Ok(ColumnSchema {
                name: column_name,
                data_type,
                is_key: column_key.eq_ignore_ascii_case("PRI"),
                allow_null: is_nullable.eq_ignore_ascii_case("YES"),
                is_identity: extra.contains("auto_increment"),
                is_read_only: extra.contains("generated"),
            })
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
        .map_err(|e| adapter.statement_error(COLUMNS_QUERY, e))?;

    tracing::debug!(table, columns = columns.len(), "Collected MySQL columns");
    Ok(columns)
}
