//! Tests for the schema models.

use super::*;

#[test]
fn test_provider_type_display() {
    assert_eq!(DatabaseProviderType::SqlServer.to_string(), "SQL Server");
    assert_eq!(DatabaseProviderType::MySql.to_string(), "MySQL");
}

#[test]
fn test_provider_type_from_str() {
    assert_eq!(
        "mssql".parse::<DatabaseProviderType>().unwrap(),
        DatabaseProviderType::SqlServer
    );
    assert_eq!(
        "MySQL".parse::<DatabaseProviderType>().unwrap(),
        DatabaseProviderType::MySql
    );
    assert!("oracle".parse::<DatabaseProviderType>().is_err());
}

#[test]
fn test_key_columns_are_not_nullable() {
    let column =
        ColumnSchema::new("Id", UnifiedDataType::Integer { bits: 32, signed: true }).key();
    assert!(column.is_key);
    assert!(!column.allow_null);
}

#[test]
fn test_numeric_types() {
    assert!(UnifiedDataType::Integer { bits: 8, signed: false }.is_numeric());
    assert!(UnifiedDataType::Decimal { precision: 18, scale: 2 }.is_numeric());
    assert!(UnifiedDataType::Float { precision: None }.is_numeric());
    assert!(!UnifiedDataType::Boolean.is_numeric());
    assert!(!UnifiedDataType::String { max_length: None }.is_numeric());
}

#[test]
fn test_type_names() {
    assert_eq!(
        UnifiedDataType::Integer { bits: 64, signed: true }.name(),
        "Int64"
    );
    assert_eq!(UnifiedDataType::Uuid.name(), "Guid");
    assert_eq!(
        UnifiedDataType::Custom { type_name: "geography".to_string() }.name(),
        "geography"
    );
}

#[test]
fn test_table_definition_deserializes_with_defaults() {
    let json = serde_json::json!({
        "name": "Customer",
        "columns": [
            { "name": "Id", "data_type": { "Integer": { "bits": 32, "signed": true } }, "is_key": true, "allow_null": false },
            { "name": "Name", "data_type": { "String": { "max_length": 50 } } }
        ]
    });

    let table: TableDefinition = serde_json::from_value(json).unwrap();
    assert_eq!(table.columns.len(), 2);
    assert!(table.columns[0].is_key);
    assert!(table.columns[1].allow_null);
    assert!(!table.columns[1].is_identity);
}
