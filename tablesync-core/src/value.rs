//! Dynamically typed cell values.
//!
//! [`SqlValue::Null`] is the single database-null representation. Equality
//! and hashing are structural (floats compare by bit pattern) so composite
//! key tuples can be used as hash map keys.

use crate::models::UnifiedDataType;
use crate::{Result, TableSyncError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Formats accepted when parsing text into a datetime.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// One cell value.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric kept in its textual form.
    Decimal(String),
    Text(String),
    Binary(Vec<u8>),
    Guid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Decimal(a), Self::Decimal(b)) | (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            (Self::Guid(a), Self::Guid(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SqlValue {}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Decimal(v) | Self::Text(v) => v.hash(state),
            Self::Binary(v) => v.hash(state),
            Self::Guid(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
            Self::Time(v) => v.hash(state),
            Self::DateTime(v) => v.hash(state),
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Decimal(v) | Self::Text(v) => f.write_str(v),
            Self::Binary(v) => {
                f.write_str("0x")?;
                for byte in v {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            Self::Guid(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.3f")),
            Self::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.3f")),
        }
    }
}

impl SqlValue {
    /// Whether this is the database null.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Variant name used in diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Decimal(_) => "Decimal",
            Self::Text(_) => "Text",
            Self::Binary(_) => "Binary",
            Self::Guid(_) => "Guid",
            Self::Date(_) => "Date",
            Self::Time(_) => "Time",
            Self::DateTime(_) => "DateTime",
        }
    }

    /// Converts the value to the representation used for `target` columns.
    ///
    /// `Null` converts to `Null` for every type. `column` only feeds the
    /// error message.
    pub fn convert_to(self, target: &UnifiedDataType, column: &str) -> Result<Self> {
        if self.is_null() {
            return Ok(self);
        }

        let fail = |value: &Self| {
            TableSyncError::conversion(format!("{value} ({})", value.kind()), column, target.name())
        };

        match target {
            UnifiedDataType::String { .. } | UnifiedDataType::Json => match self {
                Self::Text(_) => Ok(self),
                Self::Binary(_) => Err(fail(&self)),
                other => Ok(Self::Text(other.to_string())),
            },
            UnifiedDataType::Integer { bits, signed } => {
                let number = match &self {
                    Self::Int(v) => Some(*v),
                    Self::Bool(v) => Some(i64::from(*v)),
                    Self::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => {
                        #[allow(clippy::cast_possible_truncation)]
                        Some(*v as i64)
                    }
                    Self::Decimal(v) | Self::Text(v) => parse_integer(v.trim()),
                    _ => None,
                };
                match number {
                    Some(n) if integer_fits(n, *bits, *signed) => Ok(Self::Int(n)),
                    _ => Err(fail(&self)),
                }
            }
            UnifiedDataType::Float { .. } => match &self {
                Self::Float(_) => Ok(self),
                #[allow(clippy::cast_precision_loss)]
                Self::Int(v) => Ok(Self::Float(*v as f64)),
                Self::Decimal(v) | Self::Text(v) => {
                    v.trim().parse().map(Self::Float).map_err(|_| fail(&self))
                }
                _ => Err(fail(&self)),
            },
            UnifiedDataType::Decimal { .. } => match &self {
                Self::Decimal(_) => Ok(self),
                Self::Int(v) => Ok(Self::Decimal(v.to_string())),
                Self::Float(v) if v.is_finite() => Ok(Self::Decimal(v.to_string())),
                Self::Text(v) if v.trim().parse::<f64>().is_ok() => {
                    Ok(Self::Decimal(v.trim().to_string()))
                }
                _ => Err(fail(&self)),
            },
            UnifiedDataType::Boolean => match &self {
                Self::Bool(_) => Ok(self),
                Self::Int(v) => Ok(Self::Bool(*v != 0)),
                Self::Text(v) => match v.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Ok(Self::Bool(true)),
                    "false" | "0" | "no" => Ok(Self::Bool(false)),
                    _ => Err(fail(&self)),
                },
                _ => Err(fail(&self)),
            },
            UnifiedDataType::DateTime { .. } => match &self {
                Self::DateTime(_) => Ok(self),
                Self::Date(d) => Ok(Self::DateTime(d.and_time(NaiveTime::MIN))),
                Self::Text(v) => parse_datetime(v.trim()).map(Self::DateTime).ok_or_else(|| fail(&self)),
                _ => Err(fail(&self)),
            },
            UnifiedDataType::Date => match &self {
                Self::Date(_) => Ok(self),
                Self::DateTime(dt) => Ok(Self::Date(dt.date())),
                Self::Text(v) => NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")
                    .ok()
                    .or_else(|| parse_datetime(v.trim()).map(|dt| dt.date()))
                    .map(Self::Date)
                    .ok_or_else(|| fail(&self)),
                _ => Err(fail(&self)),
            },
            UnifiedDataType::Time => match &self {
                Self::Time(_) => Ok(self),
                Self::DateTime(dt) => Ok(Self::Time(dt.time())),
                Self::Text(v) => NaiveTime::parse_from_str(v.trim(), "%H:%M:%S%.f")
                    .map(Self::Time)
                    .map_err(|_| fail(&self)),
                _ => Err(fail(&self)),
            },
            UnifiedDataType::Binary { .. } => match self {
                Self::Binary(_) => Ok(self),
                Self::Text(v) => Ok(Self::Binary(v.into_bytes())),
                other => Err(fail(&other)),
            },
            UnifiedDataType::Uuid => match &self {
                Self::Guid(_) => Ok(self),
                Self::Text(v) => Uuid::parse_str(v.trim())
                    .map(Self::Guid)
                    .map_err(|_| fail(&self)),
                _ => Err(fail(&self)),
            },
            UnifiedDataType::Custom { .. } => Ok(self),
        }
    }

    /// Builds a value from a JSON scalar; arrays and objects become JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or_else(|| Self::Decimal(n.to_string())),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    /// Converts the value to JSON for diagnostics and CLI output.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    text.parse::<i64>().ok().or_else(|| {
        // "12.0" from decimal columns
        let (whole, fraction) = text.split_once('.')?;
        if fraction.chars().all(|c| c == '0') {
            whole.parse().ok()
        } else {
            None
        }
    })
}

const fn integer_fits(value: i64, bits: u8, signed: bool) -> bool {
    if bits == 0 {
        return false;
    }
    if bits >= 64 {
        return signed || value >= 0;
    }
    if signed {
        let limit = 1i64 << (bits - 1);
        value >= -limit && value < limit
    } else {
        value >= 0 && value < (1i64 << bits)
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(with_offset) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(with_offset.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

macro_rules! impl_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(impl From<$source> for SqlValue {
            fn from(value: $source) -> Self {
                Self::$variant(value.into())
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Binary,
    Uuid => Guid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Extraction of Rust values from cells, used by typed getters.
pub trait FromSqlValue: Sized {
    /// Returns `None` when the value has an incompatible type.
    fn from_sql_value(value: &SqlValue) -> Option<Self>;
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Bool(v) => Some(Self::from(*v)),
            _ => None,
        }
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        i64::from_sql_value(value).and_then(|v| Self::try_from(v).ok())
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            SqlValue::Int(v) => Some(*v as Self),
            SqlValue::Decimal(v) => v.parse().ok(),
            _ => None,
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Bool(v) => Some(*v),
            SqlValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Text(v) | SqlValue::Decimal(v) => Some(v.clone()),
            SqlValue::Null | SqlValue::Binary(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl FromSqlValue for Uuid {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Guid(v) => Some(*v),
            SqlValue::Text(v) => Self::parse_str(v).ok(),
            _ => None,
        }
    }
}

impl FromSqlValue for NaiveDateTime {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::DateTime(v) => Some(*v),
            SqlValue::Date(d) => Some(d.and_time(NaiveTime::MIN)),
            _ => None,
        }
    }
}

impl FromSqlValue for NaiveDate {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Date(v) => Some(*v),
            SqlValue::DateTime(v) => Some(v.date()),
            _ => None,
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Binary(v) => Some(v.clone()),
            _ => None,
        }
    }
}
