//! Schema models shared by the adapters, the dialects and the change-set.
//!
//! Column metadata is normalized into [`UnifiedDataType`] so the SQL builder
//! never has to reason about driver-specific type names.

use serde::{Deserialize, Serialize};

/// Database engines that change-sets can be persisted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseProviderType {
    SqlServer,
    MySql,
}

impl std::fmt::Display for DatabaseProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlServer => write!(f, "SQL Server"),
            Self::MySql => write!(f, "MySQL"),
        }
    }
}

impl std::str::FromStr for DatabaseProviderType {
    type Err = crate::TableSyncError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "sql-server" => Ok(Self::SqlServer),
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => Err(crate::TableSyncError::configuration(format!(
                "Unknown database provider '{other}', expected 'sqlserver' or 'mysql'"
            ))),
        }
    }
}

/// Unified data type representation across database engines
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnifiedDataType {
    /// String/text types with optional length
    String { max_length: Option<u32> },
    /// Integer types with bit width
    Integer { bits: u8, signed: bool },
    /// Floating point types
    Float { precision: Option<u8> },
    /// Exact numerics
    Decimal { precision: u8, scale: u8 },
    /// Boolean type
    Boolean,
    /// Date and time types
    DateTime { with_timezone: bool },
    /// Date only
    Date,
    /// Time only
    Time,
    /// Binary data
    Binary { max_length: Option<u32> },
    /// JSON documents
    Json,
    /// UUID type
    Uuid,
    /// Custom/database-specific types
    Custom { type_name: String },
}

impl UnifiedDataType {
    /// Whether the type holds numbers (integers, floats or decimals).
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Integer { .. } | Self::Float { .. } | Self::Decimal { .. }
        )
    }

    /// Short type name used in diagnostics.
    pub fn name(&self) -> String {
        match self {
            Self::String { .. } => "String".to_string(),
            Self::Integer { bits, signed } => {
                format!("{}{bits}", if *signed { "Int" } else { "UInt" })
            }
            Self::Float { .. } => "Double".to_string(),
            Self::Decimal { .. } => "Decimal".to_string(),
            Self::Boolean => "Boolean".to_string(),
            Self::DateTime { .. } => "DateTime".to_string(),
            Self::Date => "Date".to_string(),
            Self::Time => "Time".to_string(),
            Self::Binary { .. } => "Binary".to_string(),
            Self::Json => "Json".to_string(),
            Self::Uuid => "Guid".to_string(),
            Self::Custom { type_name } => type_name.clone(),
        }
    }
}

/// Column metadata as reported by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: UnifiedDataType,
    #[serde(default)]
    pub is_key: bool,
    #[serde(default = "default_allow_null")]
    pub allow_null: bool,
    #[serde(default)]
    pub is_identity: bool,
    /// Computed and rowversion columns; never written.
    #[serde(default)]
    pub is_read_only: bool,
}

const fn default_allow_null() -> bool {
    true
}

impl ColumnSchema {
    /// Creates a nullable, non-key column.
    pub fn new(name: impl Into<String>, data_type: UnifiedDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_key: false,
            allow_null: true,
            is_identity: false,
            is_read_only: false,
        }
    }

    /// Marks the column as part of the primary key (keys are never nullable).
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.allow_null = false;
        self
    }

    /// Marks the column NOT NULL.
    pub const fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    /// Marks the column as an identity / auto-increment column.
    pub const fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }

    /// Marks the column as read-only (computed, rowversion).
    pub const fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }
}

/// A table name plus its columns, as stored in schema files for offline planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
