//! SQL Server type conversion.
//!
//! Maps catalog type names to the unified data type system and converts
//! between tiberius column data and [`SqlValue`].

use crate::models::UnifiedDataType;
use crate::value::SqlValue;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use std::borrow::Cow;
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, FromSql, IntoSql};

/// Maps a SQL Server data type to the unified data type system.
///
/// # Arguments
/// * `data_type` - `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE`, e.g. `nvarchar`
/// * `char_max_length` - Character length; `-1` marks `(max)` types
/// * `numeric_precision` - Precision for numeric types
/// * `numeric_scale` - Scale for decimal types
///
/// # Example
/// ```rust
/// use tablesync_core::adapters::mssql::map_sqlserver_type;
/// use tablesync_core::models::UnifiedDataType;
///
/// let unified = map_sqlserver_type("nvarchar", Some(-1), None, None);
/// assert_eq!(unified, UnifiedDataType::String { max_length: None });
/// ```
pub fn map_sqlserver_type(
    data_type: &str,
    char_max_length: Option<i32>,
    numeric_precision: Option<u8>,
    numeric_scale: Option<u8>,
) -> UnifiedDataType {
    let max_length = char_max_length.and_then(|v| u32::try_from(v).ok());

    match data_type.to_lowercase().as_str() {
        "char" | "varchar" | "nchar" | "nvarchar" => UnifiedDataType::String { max_length },
        "text" | "ntext" | "xml" | "sysname" => UnifiedDataType::String { max_length: None },

        "tinyint" => UnifiedDataType::Integer {
            bits: 8,
            signed: false,
        },
        "smallint" => UnifiedDataType::Integer {
            bits: 16,
            signed: true,
        },
        "int" => UnifiedDataType::Integer {
            bits: 32,
            signed: true,
        },
        "bigint" => UnifiedDataType::Integer {
            bits: 64,
            signed: true,
        },

        "decimal" | "numeric" => UnifiedDataType::Decimal {
            precision: numeric_precision.unwrap_or(18),
            scale: numeric_scale.unwrap_or(0),
        },
        "money" => UnifiedDataType::Decimal {
            precision: 19,
            scale: 4,
        },
        "smallmoney" => UnifiedDataType::Decimal {
            precision: 10,
            scale: 4,
        },
        "real" => UnifiedDataType::Float {
            precision: Some(24),
        },
        "float" => UnifiedDataType::Float {
            precision: Some(numeric_precision.unwrap_or(53)),
        },

        "bit" => UnifiedDataType::Boolean,
        "uniqueidentifier" => UnifiedDataType::Uuid,

        "date" => UnifiedDataType::Date,
        "time" => UnifiedDataType::Time,
        "datetime" | "datetime2" | "smalldatetime" => UnifiedDataType::DateTime {
            with_timezone: false,
        },
        "datetimeoffset" => UnifiedDataType::DateTime {
            with_timezone: true,
        },

        "binary" | "varbinary" => UnifiedDataType::Binary { max_length },
        "image" | "timestamp" | "rowversion" => UnifiedDataType::Binary { max_length: None },

        other => UnifiedDataType::Custom {
            type_name: other.to_string(),
        },
    }
}

/// Converts a tiberius cell into a [`SqlValue`].
pub fn from_column_data(data: &ColumnData<'static>) -> SqlValue {
    match data {
        ColumnData::U8(Some(v)) => SqlValue::Int(i64::from(*v)),
        ColumnData::I16(Some(v)) => SqlValue::Int(i64::from(*v)),
        ColumnData::I32(Some(v)) => SqlValue::Int(i64::from(*v)),
        ColumnData::I64(Some(v)) => SqlValue::Int(*v),
        ColumnData::F32(Some(v)) => SqlValue::Float(f64::from(*v)),
        ColumnData::F64(Some(v)) => SqlValue::Float(*v),
        ColumnData::Bit(Some(v)) => SqlValue::Bool(*v),
        ColumnData::String(Some(v)) => SqlValue::Text(v.to_string()),
        ColumnData::Guid(Some(v)) => SqlValue::Guid(*v),
        ColumnData::Binary(Some(v)) => SqlValue::Binary(v.to_vec()),
        ColumnData::Numeric(Some(v)) => SqlValue::Decimal(v.to_string()),
        ColumnData::Xml(Some(v)) => SqlValue::Text(v.to_string()),
        ColumnData::Date(Some(_)) => temporal::<NaiveDate>(data, SqlValue::Date),
        ColumnData::Time(Some(_)) => temporal::<NaiveTime>(data, SqlValue::Time),
        ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_)) => temporal::<NaiveDateTime>(data, SqlValue::DateTime),
        // Offsets are dropped; values are kept as UTC wall-clock time
        ColumnData::DateTimeOffset(Some(_)) => {
            temporal::<DateTime<FixedOffset>>(data, |v| SqlValue::DateTime(v.naive_utc()))
        }
        _ => SqlValue::Null,
    }
}

fn temporal<'a, T: FromSql<'a>>(data: &'a ColumnData<'static>, wrap: impl FnOnce(T) -> SqlValue) -> SqlValue {
    match T::from_sql(data) {
        Ok(Some(value)) => wrap(value),
        _ => SqlValue::Null,
    }
}

/// Converts a value for a bulk-copy row, shaped by the target column type.
///
/// Returns `None` when the value cannot be represented in the column.
pub fn to_column_data(value: &SqlValue, data_type: &UnifiedDataType) -> Option<ColumnData<'static>> {
    let data = match (value, data_type) {
        (SqlValue::Null, _) => null_for(data_type),

        (SqlValue::Int(v), UnifiedDataType::Integer { bits: 8, .. }) => {
            ColumnData::U8(Some(u8::try_from(*v).ok()?))
        }
        (SqlValue::Int(v), UnifiedDataType::Integer { bits: 16, .. }) => {
            ColumnData::I16(Some(i16::try_from(*v).ok()?))
        }
        (SqlValue::Int(v), UnifiedDataType::Integer { bits: 32, .. }) => {
            ColumnData::I32(Some(i32::try_from(*v).ok()?))
        }
        (SqlValue::Int(v), UnifiedDataType::Integer { .. }) => ColumnData::I64(Some(*v)),
        (SqlValue::Int(v), UnifiedDataType::Boolean) => ColumnData::Bit(Some(*v != 0)),
        (SqlValue::Bool(v), UnifiedDataType::Boolean) => ColumnData::Bit(Some(*v)),
        (SqlValue::Bool(v), UnifiedDataType::Integer { .. }) => ColumnData::U8(Some(u8::from(*v))),

        #[allow(clippy::cast_possible_truncation)]
        (SqlValue::Float(v), UnifiedDataType::Float { precision: Some(p) }) if *p <= 24 => {
            ColumnData::F32(Some(*v as f32))
        }
        (SqlValue::Float(v), UnifiedDataType::Float { .. }) => ColumnData::F64(Some(*v)),
        #[allow(clippy::cast_precision_loss)]
        (SqlValue::Int(v), UnifiedDataType::Float { .. }) => ColumnData::F64(Some(*v as f64)),

        (SqlValue::Decimal(text), UnifiedDataType::Decimal { scale, .. }) => {
            ColumnData::Numeric(Some(Numeric::new_with_scale(scaled_integer(text, *scale)?, *scale)))
        }
        (SqlValue::Int(v), UnifiedDataType::Decimal { scale, .. }) => {
            let factor = 10_i128.checked_pow(u32::from(*scale))?;
            ColumnData::Numeric(Some(Numeric::new_with_scale(
                i128::from(*v).checked_mul(factor)?,
                *scale,
            )))
        }

        (SqlValue::Guid(v), _) => ColumnData::Guid(Some(*v)),
        (SqlValue::Binary(v), _) => ColumnData::Binary(Some(Cow::Owned(v.clone()))),
        (SqlValue::Date(v), _) => (*v).into_sql(),
        (SqlValue::Time(v), _) => (*v).into_sql(),
        (SqlValue::DateTime(v), UnifiedDataType::DateTime { with_timezone: true }) => {
            DateTime::<chrono::Utc>::from_naive_utc_and_offset(*v, chrono::Utc)
                .fixed_offset()
                .into_sql()
        }
        (SqlValue::DateTime(v), _) => (*v).into_sql(),

        (SqlValue::Text(text), _) => ColumnData::String(Some(Cow::Owned(text.clone()))),
        (other, _) => ColumnData::String(Some(Cow::Owned(other.to_string()))),
    };
    Some(data)
}

fn null_for(data_type: &UnifiedDataType) -> ColumnData<'static> {
    match data_type {
        UnifiedDataType::Integer { bits: 8, .. } => ColumnData::U8(None),
        UnifiedDataType::Integer { bits: 16, .. } => ColumnData::I16(None),
        UnifiedDataType::Integer { bits: 32, .. } => ColumnData::I32(None),
        UnifiedDataType::Integer { .. } => ColumnData::I64(None),
        UnifiedDataType::Float { precision: Some(p) } if *p <= 24 => ColumnData::F32(None),
        UnifiedDataType::Float { .. } => ColumnData::F64(None),
        UnifiedDataType::Decimal { .. } => ColumnData::Numeric(None),
        UnifiedDataType::Boolean => ColumnData::Bit(None),
        UnifiedDataType::Uuid => ColumnData::Guid(None),
        UnifiedDataType::Binary { .. } => ColumnData::Binary(None),
        UnifiedDataType::Date => ColumnData::Date(None),
        UnifiedDataType::Time => ColumnData::Time(None),
        UnifiedDataType::DateTime {
            with_timezone: true,
        } => ColumnData::DateTimeOffset(None),
        UnifiedDataType::DateTime { .. } => ColumnData::DateTime2(None),
        _ => ColumnData::String(None),
    }
}

/// Parses decimal text into an integer scaled by `10^scale`.
///
/// Extra fractional digits are truncated.
pub(crate) fn scaled_integer(text: &str, scale: u8) -> Option<i128> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let scale = usize::from(scale);
    let mut combined = String::with_capacity(whole.len() + scale);
    combined.push_str(whole);
    combined.extend(fraction.chars().chain(std::iter::repeat('0')).take(scale));

    let mut magnitude: i128 = if combined.is_empty() {
        0
    } else {
        combined.parse().ok()?
    };
    // Dropped digits round half away from zero, as the server does for literals.
    if fraction.chars().nth(scale).is_some_and(|c| c >= '5') {
        magnitude = magnitude.checked_add(1)?;
    }
    Some(if negative { -magnitude } else { magnitude })
}
