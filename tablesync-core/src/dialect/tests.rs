use super::*;
use chrono::NaiveDate;

#[test]
fn test_quote_identifier_escapes_closing_quote() {
    assert_eq!(SqlServerDialect.quote_identifier("a]b"), "[a]]b]");
    assert_eq!(MySqlDialect.quote_identifier("a`b"), "`a``b`");
}

#[test]
fn test_quote_table_name_keeps_quoted_parts() {
    assert_eq!(
        SqlServerDialect.quote_table_name("dbo.Customer"),
        "[dbo].[Customer]"
    );
    assert_eq!(
        SqlServerDialect.quote_table_name("[dbo].Customer"),
        "[dbo].[Customer]"
    );
    assert_eq!(MySqlDialect.quote_table_name("shop.orders"), "`shop`.`orders`");
}

#[test]
fn test_format_scalars() {
    let dialect = SqlServerDialect;
    assert_eq!(dialect.format_value(&SqlValue::Null), "NULL");
    assert_eq!(dialect.format_value(&SqlValue::Bool(true)), "1");
    assert_eq!(dialect.format_value(&SqlValue::Bool(false)), "0");
    assert_eq!(dialect.format_value(&SqlValue::Int(-4)), "-4");
    assert_eq!(dialect.format_value(&SqlValue::Float(1.0)), "1.0");
    assert_eq!(dialect.format_value(&SqlValue::Float(f64::NAN)), "NULL");
    assert_eq!(
        dialect.format_value(&SqlValue::Decimal("12.50".into())),
        "12.50"
    );
}

#[test]
fn test_format_text_escaping() {
    assert_eq!(
        SqlServerDialect.format_value(&SqlValue::Text("O'Neil".into())),
        "N'O''Neil'"
    );
    assert_eq!(
        MySqlDialect.format_value(&SqlValue::Text(r"a\'b".into())),
        r"'a\\''b'"
    );
}

#[test]
fn test_non_numeric_decimal_is_quoted() {
    assert_eq!(
        SqlServerDialect.format_value(&SqlValue::Decimal("1; DROP TABLE x".into())),
        "N'1; DROP TABLE x'"
    );
}

#[test]
fn test_format_datetime_has_milliseconds() {
    let at = NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_milli_opt(3, 4, 5, 6)
        .unwrap();
    assert_eq!(
        SqlServerDialect.format_value(&SqlValue::DateTime(at)),
        "'2024-01-02 03:04:05.006'"
    );
}

#[test]
fn test_format_binary() {
    assert_eq!(
        SqlServerDialect.format_value(&SqlValue::Binary(vec![0xDE, 0xAD])),
        "0xDEAD"
    );
    assert_eq!(MySqlDialect.format_value(&SqlValue::Binary(vec![])), "X''");
}

#[test]
fn test_column_types() {
    let varchar = UnifiedDataType::String {
        max_length: Some(50),
    };
    assert_eq!(SqlServerDialect.column_type(&varchar), "nvarchar(50)");
    assert_eq!(MySqlDialect.column_type(&varchar), "varchar(50)");

    let unbounded = UnifiedDataType::String { max_length: None };
    assert_eq!(SqlServerDialect.column_type(&unbounded), "nvarchar(max)");
    assert_eq!(MySqlDialect.column_type(&unbounded), "longtext");

    let uint = UnifiedDataType::Integer {
        bits: 32,
        signed: false,
    };
    assert_eq!(SqlServerDialect.column_type(&uint), "bigint");
    assert_eq!(MySqlDialect.column_type(&uint), "int unsigned");
    assert_eq!(
        SqlServerDialect.column_type(&UnifiedDataType::Boolean),
        "bit"
    );
}

#[test]
fn test_staging_declarations() {
    let columns = vec!["[Id] int NOT NULL".to_string()];
    let keys = vec!["[Id]".to_string()];
    assert_eq!(
        SqlServerDialect.declare_staging_table(&columns, &keys),
        "DECLARE @T table (\nPRIMARY KEY ([Id]),\n[Id] int NOT NULL)\n"
    );

    let columns = vec!["`Id` int NOT NULL".to_string()];
    let sql = MySqlDialect.declare_staging_table(&columns, &[]);
    assert!(sql.starts_with("DROP TEMPORARY TABLE IF EXISTS Tmp;"));
    assert!(sql.contains("CREATE TEMPORARY TABLE Tmp (\n`Id` int NOT NULL);"));
}

#[test]
fn test_only_mysql_has_native_upsert() {
    assert!(SqlServerDialect.upsert_clause(&["[A]".to_string()]).is_none());
    assert_eq!(
        MySqlDialect.upsert_clause(&["`A`".to_string(), "`B`".to_string()]),
        Some("\nON DUPLICATE KEY UPDATE `A`=VALUES(`A`),`B`=VALUES(`B`);\n".to_string())
    );
}

#[test]
fn test_limit_query() {
    assert_eq!(
        SqlServerDialect.limit_query("select Name from Customer", 5),
        "SELECT TOP 5 Name from Customer"
    );
    assert_eq!(
        MySqlDialect.limit_query("SELECT Name FROM Customer;", 5),
        "SELECT Name FROM Customer LIMIT 5"
    );
}

#[test]
fn test_for_provider() {
    assert_eq!(
        for_provider(DatabaseProviderType::MySql).provider_type(),
        DatabaseProviderType::MySql
    );
    assert!(for_provider(DatabaseProviderType::SqlServer).supports_bulk_copy());
    assert!(!for_provider(DatabaseProviderType::MySql).supports_bulk_copy());
}
