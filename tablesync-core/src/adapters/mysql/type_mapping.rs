//! MySQL type conversion.
//!
//! Maps catalog type names to the unified data type system and decodes the
//! text-protocol values returned for multi-statement batches.

use crate::models::UnifiedDataType;
use crate::value::SqlValue;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Maps a MySQL data type to the unified data type system.
///
/// # Arguments
/// * `data_type` - `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE`, e.g. `varchar`
/// * `column_type` - `COLUMN_TYPE`, e.g. `tinyint(1) unsigned`
/// * `char_max_length` - Maximum character length for string and binary types
/// * `numeric_precision` - Precision for numeric types
/// * `numeric_scale` - Scale for decimal types
///
/// # Example
/// ```rust
/// use tablesync_core::adapters::mysql::map_mysql_type;
/// use tablesync_core::models::UnifiedDataType;
///
/// let unified = map_mysql_type("varchar", "varchar(255)", Some(255), None, None);
/// assert!(matches!(unified, UnifiedDataType::String { max_length: Some(255) }));
/// ```
pub fn map_mysql_type(
    data_type: &str,
    column_type: &str,
    char_max_length: Option<u32>,
    numeric_precision: Option<u8>,
    numeric_scale: Option<u8>,
) -> UnifiedDataType {
    let column_type = column_type.to_lowercase();
    let signed = !column_type.contains("unsigned");

    match data_type.to_lowercase().as_str() {
        "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "enum" | "set" => {
            UnifiedDataType::String {
                max_length: char_max_length,
            }
        }
        "longtext" => UnifiedDataType::String { max_length: None },

        // TINYINT(1) is MySQL's boolean
        "tinyint" if column_type.starts_with("tinyint(1)") => UnifiedDataType::Boolean,
        "tinyint" => UnifiedDataType::Integer { bits: 8, signed },
        "smallint" | "year" => UnifiedDataType::Integer { bits: 16, signed },
        "mediumint" => UnifiedDataType::Integer { bits: 24, signed },
        "int" | "integer" => UnifiedDataType::Integer { bits: 32, signed },
        "bigint" => UnifiedDataType::Integer { bits: 64, signed },

        "decimal" | "numeric" => UnifiedDataType::Decimal {
            precision: numeric_precision.unwrap_or(10),
            scale: numeric_scale.unwrap_or(0),
        },
        "float" => UnifiedDataType::Float {
            precision: Some(24),
        },
        "double" | "real" => UnifiedDataType::Float {
            precision: Some(53),
        },

        "boolean" | "bool" => UnifiedDataType::Boolean,
        "bit" if column_type == "bit(1)" => UnifiedDataType::Boolean,

        "date" => UnifiedDataType::Date,
        "time" => UnifiedDataType::Time,
        "datetime" | "timestamp" => UnifiedDataType::DateTime {
            with_timezone: false,
        },

        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "bit" => {
            UnifiedDataType::Binary {
                max_length: char_max_length,
            }
        }
        "longblob" => UnifiedDataType::Binary { max_length: None },

        "json" => UnifiedDataType::Json,

        other => UnifiedDataType::Custom {
            type_name: other.to_string(),
        },
    }
}

/// Whether a result column type carries raw bytes rather than text.
pub fn is_binary_type(type_name: &str) -> bool {
    matches!(
        type_name,
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" | "GEOMETRY"
    )
}

/// Decodes a text-protocol value according to its result column type.
///
/// Values that do not parse as their declared type are kept as text.
pub fn decode_text_value(type_name: &str, text: String) -> SqlValue {
    let base = type_name.trim_end_matches(" UNSIGNED");
    let parsed = match base {
        "BOOLEAN" => text.parse::<i64>().ok().map(|v| SqlValue::Bool(v != 0)),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => text
            .parse::<i64>()
            .ok()
            .map(SqlValue::Int)
            .or_else(|| Some(SqlValue::Decimal(text.clone()))),
        "FLOAT" | "DOUBLE" => text.parse::<f64>().ok().map(SqlValue::Float),
        "DECIMAL" => Some(SqlValue::Decimal(text.clone())),
        "DATE" => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .ok()
            .map(SqlValue::Date),
        "TIME" => NaiveTime::parse_from_str(&text, "%H:%M:%S%.f")
            .ok()
            .map(SqlValue::Time),
        "DATETIME" | "TIMESTAMP" => NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(SqlValue::DateTime),
        _ => None,
    };
    parsed.unwrap_or(SqlValue::Text(text))
}
