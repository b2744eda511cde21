//! MySQL dialect: temporary tables, backtick quoting and
//! `ON DUPLICATE KEY UPDATE`.

use super::{STAGING_ALIAS, SqlDialect, TARGET_ALIAS, hex};
use crate::models::{DatabaseProviderType, UnifiedDataType};

/// Longest `varchar(n)` staged inline; longer columns use `longtext`.
const MAX_VARCHAR_LENGTH: u32 = 16_383;
const MAX_VARBINARY_LENGTH: u32 = 65_535;

/// MySQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn provider_type(&self) -> DatabaseProviderType {
        DatabaseProviderType::MySql
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn is_quoted(&self, part: &str) -> bool {
        part.len() >= 2 && part.starts_with('`') && part.ends_with('`')
    }

    fn staging_table(&self) -> &'static str {
        "Tmp"
    }

    fn batch_epilogue(&self) -> String {
        format!("DROP TEMPORARY TABLE IF EXISTS {};\n", self.staging_table())
    }

    fn declare_staging_table(&self, columns: &[String], primary_key: &[String]) -> String {
        let name = self.staging_table();
        let mut sql = format!("DROP TEMPORARY TABLE IF EXISTS {name};\n\nCREATE TEMPORARY TABLE {name} (\n");
        if !primary_key.is_empty() {
            sql.push_str(&format!("PRIMARY KEY ({}),\n", primary_key.join(", ")));
        }
        sql.push_str(&columns.join(",\n"));
        sql.push_str(");\n");
        sql
    }

    fn column_type(&self, data_type: &UnifiedDataType) -> String {
        match data_type {
            UnifiedDataType::String { max_length } => match max_length {
                Some(n) if *n > 0 && *n <= MAX_VARCHAR_LENGTH => format!("varchar({n})"),
                _ => "longtext".to_string(),
            },
            UnifiedDataType::Integer { bits, signed } => {
                let base = match bits {
                    0..=8 => "tinyint",
                    9..=16 => "smallint",
                    17..=24 => "mediumint",
                    25..=32 => "int",
                    _ => "bigint",
                };
                if *signed {
                    base.to_string()
                } else {
                    format!("{base} unsigned")
                }
            }
            UnifiedDataType::Float { precision } => match precision {
                Some(p) if *p <= 24 => "float".to_string(),
                _ => "double".to_string(),
            },
            UnifiedDataType::Decimal { precision, scale } => {
                format!("decimal({precision},{scale})")
            }
            UnifiedDataType::Boolean => "tinyint(1)".to_string(),
            UnifiedDataType::DateTime { .. } => "datetime(3)".to_string(),
            UnifiedDataType::Date => "date".to_string(),
            UnifiedDataType::Time => "time(3)".to_string(),
            UnifiedDataType::Binary { max_length } => match max_length {
                Some(n) if *n > 0 && *n <= MAX_VARBINARY_LENGTH => format!("varbinary({n})"),
                _ => "longblob".to_string(),
            },
            UnifiedDataType::Json => "json".to_string(),
            UnifiedDataType::Uuid => "char(36)".to_string(),
            UnifiedDataType::Custom { type_name } => type_name.clone(),
        }
    }

    fn string_literal(&self, text: &str) -> String {
        format!("'{}'", text.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex(bytes))
    }

    // No bracket classes in MySQL; backslash is the default LIKE escape.
    fn escape_like(&self, text: &str) -> String {
        let mut escaped = String::with_capacity(text.len() + 4);
        for c in text.chars() {
            if matches!(c, '\\' | '%' | '_') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    fn update_from_staging(
        &self,
        target: &str,
        assignments: &str,
        join: &str,
        predicate: &str,
    ) -> String {
        format!(
            "UPDATE {target} AS {TARGET_ALIAS}\nINNER JOIN {} AS {STAGING_ALIAS} ON ({join})\nSET\n{assignments}\nWHERE\n{predicate};\n",
            self.staging_table()
        )
    }

    fn upsert_clause(&self, update_columns: &[String]) -> Option<String> {
        let assignments = update_columns
            .iter()
            .map(|column| format!("{column}=VALUES({column})"))
            .collect::<Vec<_>>()
            .join(",");
        Some(format!("\nON DUPLICATE KEY UPDATE {assignments};\n"))
    }

    fn now_query(&self) -> &'static str {
        "SELECT NOW()"
    }

    fn utc_now_query(&self) -> &'static str {
        "SELECT UTC_TIMESTAMP()"
    }

    fn utc_offset_query(&self) -> &'static str {
        "SELECT TIMESTAMPDIFF(MINUTE, UTC_TIMESTAMP(), NOW())"
    }

    fn limit_query(&self, sql: &str, count: usize) -> String {
        let trimmed = sql.trim_end().trim_end_matches(';');
        format!("{trimmed} LIMIT {count}")
    }

    fn object_exists_query(&self, name: &str) -> String {
        let table = name.rsplit('.').next().unwrap_or(name).trim_matches('`');
        format!(
            "SELECT 1 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {}",
            self.string_literal(table)
        )
    }

    fn char_index(&self, substring: &str, text: &str, start: usize) -> String {
        format!("LOCATE({substring}, {text}, {start})")
    }
}
