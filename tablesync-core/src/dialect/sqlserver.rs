//! SQL Server dialect: table variables, bracket quoting and `TOP`.

use super::{STAGING_ALIAS, SqlDialect, TARGET_ALIAS, hex};
use crate::models::{DatabaseProviderType, UnifiedDataType};
use regex::Regex;
use std::sync::LazyLock;

static FIRST_SELECT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\b").ok());

/// Longest `nvarchar(n)`; longer columns use `nvarchar(max)`.
const MAX_NVARCHAR_LENGTH: u32 = 4000;
const MAX_VARBINARY_LENGTH: u32 = 8000;

/// SQL Server dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn provider_type(&self) -> DatabaseProviderType {
        DatabaseProviderType::SqlServer
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn is_quoted(&self, part: &str) -> bool {
        part.len() >= 2 && part.starts_with('[') && part.ends_with(']')
    }

    fn staging_table(&self) -> &'static str {
        "@T"
    }

    fn batch_prologue(&self) -> &'static str {
        "SET NOCOUNT ON\n"
    }

    fn statement_terminator(&self) -> &'static str {
        ""
    }

    fn declare_staging_table(&self, columns: &[String], primary_key: &[String]) -> String {
        let mut sql = format!("DECLARE {} table (\n", self.staging_table());
        if !primary_key.is_empty() {
            sql.push_str(&format!("PRIMARY KEY ({}),\n", primary_key.join(", ")));
        }
        sql.push_str(&columns.join(",\n"));
        sql.push_str(")\n");
        sql
    }

    fn column_type(&self, data_type: &UnifiedDataType) -> String {
        match data_type {
            UnifiedDataType::String { max_length } => match max_length {
                Some(n) if *n > 0 && *n <= MAX_NVARCHAR_LENGTH => format!("nvarchar({n})"),
                _ => "nvarchar(max)".to_string(),
            },
            UnifiedDataType::Integer { bits, signed: true } => match bits {
                0..=16 => "smallint".to_string(),
                17..=32 => "int".to_string(),
                _ => "bigint".to_string(),
            },
            UnifiedDataType::Integer { bits, signed: false } => match bits {
                0..=8 => "tinyint".to_string(),
                9..=15 => "smallint".to_string(),
                16..=31 => "int".to_string(),
                32..=63 => "bigint".to_string(),
                _ => "decimal(20,0)".to_string(),
            },
            UnifiedDataType::Float { precision } => match precision {
                Some(p) if *p <= 24 => "real".to_string(),
                _ => "float".to_string(),
            },
            UnifiedDataType::Decimal { precision, scale } => {
                format!("decimal({precision},{scale})")
            }
            UnifiedDataType::Boolean => "bit".to_string(),
            UnifiedDataType::DateTime { with_timezone } => {
                if *with_timezone {
                    "datetimeoffset(3)".to_string()
                } else {
                    "datetime2(3)".to_string()
                }
            }
            UnifiedDataType::Date => "date".to_string(),
            UnifiedDataType::Time => "time(3)".to_string(),
            UnifiedDataType::Binary { max_length } => match max_length {
                Some(n) if *n > 0 && *n <= MAX_VARBINARY_LENGTH => format!("varbinary({n})"),
                _ => "varbinary(max)".to_string(),
            },
            UnifiedDataType::Json => "nvarchar(max)".to_string(),
            UnifiedDataType::Uuid => "uniqueidentifier".to_string(),
            UnifiedDataType::Custom { type_name } => type_name.clone(),
        }
    }

    fn string_literal(&self, text: &str) -> String {
        format!("N'{}'", text.replace('\'', "''"))
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("0x{}", hex(bytes))
    }

    fn update_from_staging(
        &self,
        target: &str,
        assignments: &str,
        join: &str,
        predicate: &str,
    ) -> String {
        format!(
            "UPDATE {TARGET_ALIAS} SET\n{assignments}\nFROM {target} AS {TARGET_ALIAS} INNER JOIN {} AS {STAGING_ALIAS} ON ({join})\nWHERE\n{predicate}\n",
            self.staging_table()
        )
    }

    fn supports_bulk_copy(&self) -> bool {
        true
    }

    fn now_query(&self) -> &'static str {
        "SELECT GETDATE()"
    }

    fn utc_now_query(&self) -> &'static str {
        "SELECT GETUTCDATE()"
    }

    fn utc_offset_query(&self) -> &'static str {
        "SELECT DATEDIFF(mi, GETUTCDATE(), GETDATE())"
    }

    fn limit_query(&self, sql: &str, count: usize) -> String {
        match FIRST_SELECT.as_ref() {
            Some(select) => select
                .replacen(sql, 1, format!("SELECT TOP {count}").as_str())
                .into_owned(),
            None => sql.to_string(),
        }
    }

    fn object_exists_query(&self, name: &str) -> String {
        format!("SELECT OBJECT_ID({})", self.string_literal(name))
    }

    fn char_index(&self, substring: &str, text: &str, start: usize) -> String {
        format!("CHARINDEX({substring}, {text}, {start})")
    }
}
