//! MySQL persist integration tests.
//!
//! This test suite covers:
//! - Column introspection (keys, auto-increment, generated columns)
//! - Insert-then-update persists through the native upsert path
//! - Existence checks against the staged temporary table
//! - Transactions and uniqueness-violation classification

#![cfg(feature = "mysql")]

use std::sync::Arc;
use std::time::Duration;
use tablesync_core::{
    Database, DatabaseExt, Result, SqlValue, TableChanges, TableSyncError,
    adapters::mysql::MySqlAdapter,
};
use testcontainers_modules::{
    mysql::Mysql,
    testcontainers::{ContainerAsync, runners::AsyncRunner},
};

const CUSTOMER_TABLE: &str = "CREATE TABLE customer (
    id INT NOT NULL PRIMARY KEY,
    name VARCHAR(50) NULL,
    visits INT NOT NULL DEFAULT 0,
    UtcLastModifiedOn DATETIME(3) NULL
)";

/// Helper function to wait for MySQL to be ready
async fn wait_for_mysql_ready(adapter: &MySqlAdapter, max_attempts: u32) -> Result<()> {
    let mut attempts = 0;
    loop {
        match adapter.test_connection().await {
            Ok(()) => return Ok(()),
            Err(error) if attempts + 1 >= max_attempts => return Err(error),
            Err(_) => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

async fn start_mysql() -> Result<(ContainerAsync<Mysql>, Arc<MySqlAdapter>)> {
    let mysql = Mysql::default().start().await.unwrap();
    let port = mysql.get_host_port_ipv4(3306).await.unwrap();
    let database_url = format!("mysql://root@localhost:{port}/test?command_timeout=20");

    let adapter = MySqlAdapter::new(&database_url).await?;
    wait_for_mysql_ready(&adapter, 60).await?;
    adapter.execute_non_query(CUSTOMER_TABLE).await?;
    Ok((mysql, Arc::new(adapter)))
}

#[tokio::test]
async fn test_mysql_introspection() -> Result<()> {
    let (_container, adapter) = start_mysql().await?;
    adapter
        .execute_non_query(
            "CREATE TABLE invoice (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                net DECIMAL(10,2) NOT NULL,
                gross DECIMAL(10,2) AS (net * 1.2) VIRTUAL,
                paid TINYINT(1) NOT NULL DEFAULT 0
            )",
        )
        .await?;

    let columns = adapter.table_schema("invoice").await?;
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "net", "gross", "paid"]);
    assert!(columns[0].is_key && columns[0].is_identity);
    assert!(columns[2].is_read_only);
    assert!(!columns[3].allow_null);

    let changes = TableChanges::load(adapter.clone(), "invoice").await?;
    assert_eq!(changes.column_names(), vec!["id", "net", "paid"]);

    assert!(adapter.table_schema("missing_table").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_mysql_insert_then_update() -> Result<()> {
    let (_container, adapter) = start_mysql().await?;

    let mut changes = TableChanges::load(adapter.clone(), "customer").await?;
    for (id, name) in [(1, "A"), (2, "Z")] {
        changes
            .get_or_create_by_key_values(vec![id.into()])?
            .set("name", name)?;
    }
    let summary = changes.persist().await?;
    assert_eq!(summary.inserts, 2);
    assert_eq!(adapter.execute_scalar::<i64>("SELECT COUNT(*) FROM customer").await?, 2);

    let mut changes = TableChanges::load(adapter.clone(), "customer").await?;
    changes
        .get_or_create_by_key_values(vec![1.into()])?
        .set("name", "B")?;
    changes
        .get_or_create_by_key_values(vec![3.into()])?
        .set("visits", 5)?;
    let summary = changes.persist().await?;
    assert_eq!(summary.updates, 1);
    assert_eq!(summary.inserts, 1);

    let names: Vec<String> = adapter
        .execute_to_list("SELECT COALESCE(name, '-') FROM customer ORDER BY id")
        .await?;
    assert_eq!(names, vec!["B", "Z", "-"]);

    let stamped: i64 = adapter
        .execute_scalar("SELECT COUNT(*) FROM customer WHERE UtcLastModifiedOn IS NOT NULL")
        .await?;
    assert_eq!(stamped, 3);
    Ok(())
}

#[tokio::test]
async fn test_mysql_staged_writes_without_native_upsert() -> Result<()> {
    let (_container, adapter) = start_mysql().await?;
    adapter
        .execute_non_query("INSERT INTO customer (id, name, visits) VALUES (1, 'A', 1)")
        .await?;

    let mut changes = TableChanges::load(adapter.clone(), "customer").await?;
    changes.options_mut().use_native_upsert = false;
    changes
        .get_or_create_by_key_values(vec![1.into()])?
        .set("visits", 2)?;
    changes
        .get_or_create_by_key_values(vec![2.into()])?
        .set("name", "N")?;

    let summary = changes.persist().await?;
    assert_eq!((summary.inserts, summary.updates), (1, 1));
    assert_eq!(
        adapter
            .execute_scalar::<i64>("SELECT visits FROM customer WHERE id = 1")
            .await?,
        2
    );
    Ok(())
}

#[tokio::test]
async fn test_mysql_transaction_rollback() -> Result<()> {
    let (_container, adapter) = start_mysql().await?;

    adapter.begin_transaction().await?;
    adapter
        .execute_non_query("INSERT INTO customer (id, name) VALUES (10, 'T')")
        .await?;
    adapter.rollback().await?;

    let count: i64 = adapter.execute_scalar("SELECT COUNT(*) FROM customer").await?;
    assert_eq!(count, 0);
    assert!(adapter.commit().await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_mysql_duplicate_key_is_uniqueness_violation() -> Result<()> {
    let (_container, adapter) = start_mysql().await?;
    let insert = "INSERT INTO customer (id, name) VALUES (1, 'A')";
    adapter.execute_non_query(insert).await?;

    let error = adapter.execute_non_query(insert).await.unwrap_err();
    assert!(error.is_uniqueness_violation());
    assert!(!error.may_retry());
    assert!(matches!(error, TableSyncError::Statement { ref statement, .. } if statement == insert));

    let value: Option<SqlValue> = adapter
        .try_execute_scalar("SELECT name FROM customer WHERE id = 2")
        .await?;
    assert_eq!(value, None);
    Ok(())
}
