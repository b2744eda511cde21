//! Tests for change-sets and the SQL builder.
//!
//! Persist paths run against a recording database that answers existence
//! checks from a fixed list of row positions.

use super::builder::chunk_statements;
use super::*;
use crate::adapters::{DataRecord, Database, PersistOptions};
use crate::models::{ColumnSchema, DatabaseProviderType, UnifiedDataType};
use crate::value::SqlValue;
use crate::TableSyncError;
use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// =============================================================================
// Fixtures
// =============================================================================

struct RecordingDatabase {
    provider: DatabaseProviderType,
    columns: Vec<ColumnSchema>,
    existing: Vec<i64>,
    reject_bulk_copy: bool,
    executed: Mutex<Vec<String>>,
    queried: Mutex<Vec<String>>,
    bulk_copied: Mutex<Vec<usize>>,
}

impl RecordingDatabase {
    fn new(provider: DatabaseProviderType, columns: Vec<ColumnSchema>) -> Self {
        Self {
            provider,
            columns,
            existing: Vec::new(),
            reject_bulk_copy: false,
            executed: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
            bulk_copied: Mutex::new(Vec::new()),
        }
    }

    fn with_existing(mut self, positions: &[i64]) -> Self {
        self.existing = positions.to_vec();
        self
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    fn provider_type(&self) -> DatabaseProviderType {
        self.provider
    }

    async fn execute_non_query(&self, sql: &str) -> crate::Result<u64> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(0)
    }

    async fn query(&self, sql: &str) -> crate::Result<Vec<DataRecord>> {
        self.queried.lock().unwrap().push(sql.to_string());
        Ok(self
            .existing
            .iter()
            .map(|i| DataRecord::new(vec!["i".to_string()], vec![SqlValue::Int(*i)]))
            .collect())
    }

    async fn table_schema(&self, _table: &str) -> crate::Result<Vec<ColumnSchema>> {
        Ok(self.columns.clone())
    }

    async fn bulk_copy(
        &self,
        _table: &str,
        _columns: &[TableColumn],
        rows: &[Vec<SqlValue>],
    ) -> crate::Result<u64> {
        if self.reject_bulk_copy {
            return Err(TableSyncError::configuration("bulk copy rejected"));
        }
        self.bulk_copied.lock().unwrap().push(rows.len());
        Ok(rows.len() as u64)
    }

    async fn test_connection(&self) -> crate::Result<()> {
        Ok(())
    }
}

fn int() -> UnifiedDataType {
    UnifiedDataType::Integer {
        bits: 32,
        signed: true,
    }
}

fn text(length: u32) -> UnifiedDataType {
    UnifiedDataType::String {
        max_length: Some(length),
    }
}

fn customer_columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("Id", int()).key(),
        ColumnSchema::new("Name", text(50)),
    ]
}

fn customer(provider: DatabaseProviderType) -> TableChanges {
    TableChanges::offline(provider, "Customer", customer_columns())
}

// =============================================================================
// Rows and Keys
// =============================================================================

#[test]
fn test_get_or_create_by_key_values_is_idempotent() {
    let mut changes = customer(DatabaseProviderType::SqlServer);

    let first = changes
        .get_or_create_by_key_values(vec![1.into()])
        .unwrap()
        .position();
    let again = changes
        .get_or_create_by_key_values(vec!["1".into()])
        .unwrap()
        .position();

    assert_eq!(first, again);
    assert_eq!(changes.row_count(), 1);
    assert_eq!(
        changes.row(first).unwrap().get("id").unwrap(),
        Some(&SqlValue::Int(1))
    );
}

#[test]
fn test_get_or_create_rejects_wrong_key_count() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    let error = changes
        .get_or_create_by_key_values(vec![1.into(), 2.into()])
        .unwrap_err();
    assert!(matches!(
        error,
        TableSyncError::KeyCountMismatch {
            expected: 1,
            actual: 2
        }
    ));
    assert_eq!(changes.row_count(), 0);
}

#[test]
fn test_key_initializer_runs_before_keys_are_set() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    changes.set_key_initializer(Box::new(|row: &mut RowMut<'_>| {
        assert_eq!(row.try_get("Id"), None);
        row.set("Name", "unnamed")
    }));

    let row = changes.get_or_create_by_key_values(vec![9.into()]).unwrap();
    assert_eq!(row.get("Name").unwrap(), Some(&SqlValue::Text("unnamed".into())));
    assert_eq!(row.get("Id").unwrap(), Some(&SqlValue::Int(9)));
}

#[test]
fn test_set_columns_as_keys_indexes_existing_rows() {
    let mut changes = TableChanges::offline(
        DatabaseProviderType::MySql,
        "events",
        vec![
            ColumnSchema::new("Code", text(10)),
            ColumnSchema::new("Hits", int()),
        ],
    );
    changes.new_row().unwrap().set("Code", "a").unwrap();

    assert!(changes.set_columns_as_keys(&["Missing"]).is_err());
    assert!(changes.key_names().is_empty());

    changes.set_columns_as_keys(&["code"]).unwrap();
    assert_eq!(changes.key_names(), vec!["Code"]);
    assert!(!changes.columns()[0].allow_db_null);

    let position = changes
        .get_or_create_by_key_values(vec!["a".into()])
        .unwrap()
        .position();
    assert_eq!(position, 0);
    assert_eq!(changes.row_count(), 1);
}

#[test]
fn test_failing_key_initializer_discards_the_row() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    changes.set_key_initializer(Box::new(|_: &mut RowMut<'_>| {
        Err(TableSyncError::configuration("no id available"))
    }));

    assert!(changes.new_row().is_err());
    assert!(changes.get_or_create_by_key_values(vec![1.into()]).is_err());
    assert_eq!(changes.rows().count(), 0);
    assert!(changes.plan().unwrap().writes.is_empty());
}

#[test]
fn test_set_columns_as_keys_keeps_first_duplicate() {
    let mut changes = TableChanges::offline(
        DatabaseProviderType::MySql,
        "events",
        vec![
            ColumnSchema::new("Code", text(10)),
            ColumnSchema::new("Hits", int()),
        ],
    );
    for hits in [1, 2] {
        let mut row = changes.new_row().unwrap();
        row.set("Code", "a").unwrap();
        row.set("Hits", hits).unwrap();
    }

    changes.set_columns_as_keys(&["Code"]).unwrap();

    let row = changes.get_or_create_by_key_values(vec!["a".into()]).unwrap();
    assert_eq!(row.position(), 0);
    assert_eq!(row.get("Hits").unwrap(), Some(&SqlValue::Int(1)));
    assert_eq!(changes.row_count(), 2);
}

#[test]
fn test_set_converts_to_column_type() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    let mut row = changes.new_row().unwrap();

    row.set("Id", "42").unwrap();
    assert_eq!(row.get("Id").unwrap(), Some(&SqlValue::Int(42)));

    assert!(matches!(
        row.set("Id", "forty-two"),
        Err(TableSyncError::Conversion { .. })
    ));
    assert!(matches!(
        row.set("Nope", 1),
        Err(TableSyncError::UnknownColumn { .. })
    ));
}

#[test]
fn test_unset_and_null_are_distinct() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    let mut row = changes.new_row().unwrap();

    row.set("Name", SqlValue::Null).unwrap();
    assert_eq!(row.get("Name").unwrap(), Some(&SqlValue::Null));

    row.unset("Name").unwrap();
    assert_eq!(row.get("Name").unwrap(), None);
}

#[test]
fn test_clear_keeps_schema_and_annotations() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    changes
        .get_or_create_by_key_values(vec![1.into()])
        .unwrap()
        .set_annotation("Source", "feed");

    changes.clear();
    assert_eq!(changes.row_count(), 0);
    assert_eq!(changes.annotations(), ["Source".to_string()]);
    assert_eq!(changes.column_names(), vec!["Id", "Name"]);

    changes.get_or_create_by_key_values(vec![1.into()]).unwrap();
    assert_eq!(changes.row_count(), 1);
}

#[test]
fn test_find_and_typed_getter() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    for (id, name) in [(1, "Ann"), (2, "Bob")] {
        changes
            .get_or_create_by_key_values(vec![id.into()])
            .unwrap()
            .set("Name", name)
            .unwrap();
    }

    let id = changes.make_getter::<i64>("Id").unwrap();
    let name = changes.make_getter::<String>("Name").unwrap();
    let bob = changes
        .find(|row| name.get(row).unwrap().as_deref() == Some("Bob"))
        .unwrap();
    assert_eq!(id.get(&bob).unwrap(), Some(2));

    assert!(changes.make_getter::<i64>("Unknown").is_err());
    assert!(matches!(
        name.get(&changes.row(0).unwrap()),
        Ok(Some(ref n)) if n == "Ann"
    ));
}

// =============================================================================
// Annotations and Row Sources
// =============================================================================

#[test]
fn test_annotations_are_registered_per_table() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    changes
        .get_or_create_by_key_values(vec![1.into()])
        .unwrap()
        .set_annotation("Batch", 7);
    changes.get_or_create_by_key_values(vec![2.into()]).unwrap();

    assert!(changes.has_column_or_annotation("batch"));
    assert_eq!(changes.annotation_index("BATCH"), Some(0));

    let second = changes.row(1).unwrap();
    assert_eq!(second.get_annotation("Batch").unwrap(), None);
    assert!(matches!(
        second.get_annotation("Other"),
        Err(TableSyncError::UnknownAnnotation { .. })
    ));

    let getter = changes.make_getter::<i64>("Batch").unwrap();
    assert_eq!(getter.get(&changes.row(0).unwrap()).unwrap(), Some(7));
}

#[test]
fn test_dictionary_round_trip() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    let mut row = changes.new_row().unwrap();
    row.apply_dictionary([("Id", SqlValue::Int(3)), ("Name", "Cy".into()), ("Tag", "vip".into())])
        .unwrap();

    let dictionary = row.to_dictionary();
    assert_eq!(
        dictionary.keys().collect::<Vec<_>>(),
        vec!["Id", "Name", "Tag"]
    );
    assert_eq!(dictionary["Tag"], Some(SqlValue::Text("vip".into())));

    let mut copy = customer(DatabaseProviderType::SqlServer);
    let mut target = copy.new_row().unwrap();
    target
        .apply_dictionary(dictionary.into_iter().map(|(k, v)| (k, SqlValue::from(v))))
        .unwrap();
    assert_eq!(target.get("Name").unwrap(), Some(&SqlValue::Text("Cy".into())));
    assert_eq!(
        target.get_annotation("Tag").unwrap(),
        Some(&SqlValue::Text("vip".into()))
    );
}

#[test]
fn test_apply_dictionary_can_drop_extraneous_names() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    let mut row = changes.new_row().unwrap();
    row.apply_dictionary_with([("Name", "Di"), ("Tag", "x")], false)
        .unwrap();
    drop(row);
    assert!(changes.annotations().is_empty());
}

#[test]
fn test_apply_data_record_respects_filter_and_nulls() {
    let mut changes = TableChanges::offline(
        DatabaseProviderType::SqlServer,
        "Customer",
        vec![
            ColumnSchema::new("Id", int()).key(),
            ColumnSchema::new("Name", text(50)),
            ColumnSchema::new(TIMESTAMP_COLUMN, UnifiedDataType::DateTime { with_timezone: false }),
        ],
    );
    let record = DataRecord::new(
        vec!["Id".into(), "Name".into(), "UtcLastModifiedOn".into(), "Region".into()],
        vec![SqlValue::Int(4), SqlValue::Null, SqlValue::Null, "EU".into()],
    );

    let mut row = changes.new_row().unwrap();
    row.apply_data_record(&record, true, filter_staging_columns)
        .unwrap();
    assert_eq!(row.get("Id").unwrap(), Some(&SqlValue::Int(4)));
    assert_eq!(row.get("Name").unwrap(), None);
    assert_eq!(row.get(TIMESTAMP_COLUMN).unwrap(), None);
    assert_eq!(
        row.get_annotation("Region").unwrap(),
        Some(&SqlValue::Text("EU".into()))
    );

    let mut other = changes.new_row().unwrap();
    other.apply_data_record_with(&record, false, false).unwrap();
    assert_eq!(other.get("Name").unwrap(), Some(&SqlValue::Null));
    assert_eq!(changes.annotations(), ["Region".to_string()]);
}

#[test]
fn test_apply_object_properties_and_serializable() {
    #[derive(serde::Serialize)]
    struct Customer {
        #[serde(rename = "ID")]
        id: i32,
        name: String,
        ignored: bool,
    }

    let mut changes = customer(DatabaseProviderType::MySql);
    let mut row = changes.new_row().unwrap();
    row.apply_serializable(&Customer {
        id: 11,
        name: "Flo".into(),
        ignored: true,
    })
    .unwrap();
    assert_eq!(row.get("Id").unwrap(), Some(&SqlValue::Int(11)));
    assert_eq!(row.get("Name").unwrap(), Some(&SqlValue::Text("Flo".into())));

    let properties: HashMap<String, SqlValue> =
        HashMap::from([("name".to_string(), SqlValue::Text("Gus".into()))]);
    row.apply_object_properties(&properties).unwrap();
    assert_eq!(row.get("Name").unwrap(), Some(&SqlValue::Text("Gus".into())));
    drop(row);
    assert!(changes.annotations().is_empty());
}

#[test]
fn test_apply_xml_element_reads_matching_attributes() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    let mut row = changes.new_row().unwrap();
    row.apply_xml_element(r#"<Customer Id="5" Name="Eve &amp; Co" Extra="x"><Child/></Customer>"#)
        .unwrap();

    assert_eq!(row.get("Id").unwrap(), Some(&SqlValue::Int(5)));
    assert_eq!(row.get("Name").unwrap(), Some(&SqlValue::Text("Eve & Co".into())));
    assert!(row.apply_xml_element("<unclosed").is_err());
}

// =============================================================================
// Default Values
// =============================================================================

#[test]
fn test_custom_default_generator_wins() {
    let mut changes = TableChanges::offline(
        DatabaseProviderType::SqlServer,
        "Customer",
        vec![
            ColumnSchema::new("Id", int()).key(),
            ColumnSchema::new("Code", text(5)).not_null(),
        ],
    );

    assert!(matches!(
        changes.default_value_for_column("Code", None),
        Err(TableSyncError::NoDefaultValue { .. })
    ));

    changes.add_default_value_generator(Arc::new(|_, column| {
        (column.name == "Code").then(|| SqlValue::Text("NEW".into()))
    }));
    assert_eq!(
        changes.default_value_for_column("Code", None).unwrap(),
        SqlValue::Text("NEW".into())
    );
}

#[test]
fn test_plan_fails_without_default_for_insert() {
    let mut changes = TableChanges::offline(
        DatabaseProviderType::SqlServer,
        "Customer",
        vec![
            ColumnSchema::new("Id", int()).key(),
            ColumnSchema::new("Code", text(5)).not_null(),
        ],
    );
    changes.get_or_create_by_key_values(vec![1.into()]).unwrap();

    let error = changes.plan().unwrap_err();
    assert!(matches!(
        error,
        TableSyncError::NoDefaultValue { ref column, .. } if column == "Code"
    ));
}

// =============================================================================
// Planning
// =============================================================================

#[test]
fn test_keyless_table_plans_only_inserts() {
    let mut changes = TableChanges::offline(
        DatabaseProviderType::SqlServer,
        "Log",
        vec![ColumnSchema::new("Message", text(100))],
    );
    for message in ["a", "b"] {
        changes.new_row().unwrap().set("Message", message).unwrap();
    }

    let plan = changes.plan().unwrap();
    assert!(plan.existence_checks.is_empty());
    assert_eq!(plan.writes.len(), 1);
    let PlannedStep::Sql(batch) = &plan.writes[0] else {
        panic!("expected a SQL batch");
    };
    assert_eq!(batch.rows, vec![0, 1]);
    assert!(batch.sql.contains("INSERT INTO [Log] ([Message]) SELECT [Message] FROM @T"));
}

#[test]
fn test_existence_check_shape() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    changes
        .get_or_create_by_key_values(vec![1.into()])
        .unwrap()
        .set("Name", "O'Hara")
        .unwrap();
    // A row without its key cannot exist yet.
    changes.new_row().unwrap();

    let plan = changes.plan().unwrap();
    assert_eq!(plan.existence_checks.len(), 1);
    let check = &plan.existence_checks[0];
    assert_eq!(check.rows, vec![0]);
    assert!(check.sql.starts_with("SET NOCOUNT ON\nDECLARE @T table (\nPRIMARY KEY ([Id]),"));
    assert!(check.sql.contains("INSERT INTO @T VALUES (1, 0)"));
    assert!(check.sql.contains("SELECT s.[i] FROM @T AS s INNER JOIN [Customer] AS t ON t.[Id] = s.[Id]"));
}

#[test]
fn test_bulk_copy_threshold() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    for id in 0..10 {
        changes.get_or_create_by_key_values(vec![id.into()]).unwrap();
    }
    let plan = changes.plan().unwrap();
    assert!(matches!(&plan.writes[..], [PlannedStep::BulkCopy { rows }] if rows.len() == 10));

    changes.options_mut().use_bulk_copy = false;
    let plan = changes.plan().unwrap();
    assert!(matches!(&plan.writes[..], [PlannedStep::Sql(_)]));

    changes.set_options(PersistOptions::default().with_max_bulk_copy_rows(4));
    let plan = changes.plan().unwrap();
    let sizes: Vec<usize> = plan.writes.iter().map(|step| step.rows().len()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
}

#[test]
fn test_mysql_plans_native_upsert() {
    let mut changes = customer(DatabaseProviderType::MySql);
    changes
        .get_or_create_by_key_values(vec![1.into()])
        .unwrap()
        .set("Name", "Hal")
        .unwrap();

    let plan = changes.plan().unwrap();
    let PlannedStep::Sql(batch) = &plan.writes[0] else {
        panic!("expected a SQL batch");
    };
    assert!(batch.sql.contains("INSERT INTO `Customer` (`Id`, `Name`) VALUES\n(1, 'Hal')"));
    assert!(batch.sql.contains("ON DUPLICATE KEY UPDATE `Name`=VALUES(`Name`)"));

    changes.options_mut().use_native_upsert = false;
    let plan = changes.plan().unwrap();
    let PlannedStep::Sql(batch) = &plan.writes[0] else {
        panic!("expected a SQL batch");
    };
    assert!(batch.sql.contains("CREATE TEMPORARY TABLE Tmp"));
}

#[test]
fn test_small_statement_cap_splits_batches() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    changes.set_options(
        PersistOptions::default()
            .with_bulk_copy(false)
            .with_max_statement_length(256),
    );
    for id in 0..40 {
        changes
            .get_or_create_by_key_values(vec![id.into()])
            .unwrap()
            .set("Name", format!("name {id}"))
            .unwrap();
    }

    let plan = changes.plan().unwrap();
    assert!(plan.existence_checks.len() > 1);
    for batch in &plan.existence_checks {
        assert!(batch.sql.len() <= 256 || batch.rows.len() == 1);
    }
    let covered: usize = plan.writes.iter().map(|step| step.rows().len()).sum();
    assert_eq!(covered, 40);
}

#[test]
fn test_plan_script_separates_batches() {
    let mut changes = customer(DatabaseProviderType::SqlServer);
    changes.get_or_create_by_key_values(vec![1.into()]).unwrap();
    let script = changes.plan().unwrap().to_script();
    assert_eq!(script.matches("\nGO\n").count(), 2);
}

// =============================================================================
// Persisting
// =============================================================================

#[tokio::test]
async fn test_persist_updates_existing_row() {
    let database = Arc::new(
        RecordingDatabase::new(DatabaseProviderType::SqlServer, customer_columns())
            .with_existing(&[0]),
    );
    let mut changes = TableChanges::load(database.clone(), "Customer").await.unwrap();
    changes
        .get_or_create_by_key_values(vec![1.into()])
        .unwrap()
        .set("Name", "B")
        .unwrap();

    let summary = changes.persist().await.unwrap();
    assert_eq!(summary.updates, 1);
    assert_eq!(summary.inserts, 0);
    assert_eq!(summary.batches, 2);
    assert!(changes.has_been_persisted());
    assert_eq!(changes.row(0).unwrap().change_type(), ChangeType::Update);

    let executed = database.executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].contains("INSERT INTO @T VALUES (1, N'B')"));
    assert!(executed[0].contains("UPDATE t SET\nt.[Name] = s.[Name]"));
    assert!(executed[0].contains("t.[Name] <> s.[Name]"));
}

#[tokio::test]
async fn test_persist_groups_updates_by_assigned_columns() {
    let columns = vec![
        ColumnSchema::new("Id", int()).key(),
        ColumnSchema::new("Name", text(50)).not_null(),
        ColumnSchema::new("City", text(30)),
    ];
    let database = Arc::new(
        RecordingDatabase::new(DatabaseProviderType::SqlServer, columns).with_existing(&[0, 1, 2]),
    );
    let mut changes = TableChanges::load(database.clone(), "Customer").await.unwrap();
    for (id, column, value) in [(1, "Name", "A"), (2, "City", "Oslo"), (3, "Name", "C")] {
        changes
            .get_or_create_by_key_values(vec![id.into()])
            .unwrap()
            .set(column, value)
            .unwrap();
    }

    let summary = changes.persist().await.unwrap();
    assert_eq!(summary.updates, 3);
    assert_eq!(summary.batches, 3);

    let executed = database.executed();
    assert_eq!(executed.len(), 2);

    let names = &executed[0];
    assert!(names.contains("VALUES (1, N'A')"));
    assert!(names.contains("VALUES (3, N'C')"));
    assert!(!names.contains("Oslo"));
    assert!(names.contains("t.[Name] = s.[Name]"));
    assert!(!names.contains("t.[City] = s.[City]"));
    assert!(names.contains("t.[Name] <> s.[Name]"));
    assert!(!names.contains("t.[Name] IS NULL"));

    let cities = &executed[1];
    assert!(cities.contains("VALUES (2, N'Oslo')"));
    assert!(!cities.contains("N'A'"));
    assert!(!cities.contains("t.[Name] = s.[Name]"));
    assert!(cities.contains(
        "(t.[City] <> s.[City] OR (t.[City] IS NULL AND s.[City] IS NOT NULL) OR (t.[City] IS NOT NULL AND s.[City] IS NULL))"
    ));
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_persist_traces_executed_sql() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let database = Arc::new(
        RecordingDatabase::new(DatabaseProviderType::SqlServer, customer_columns())
            .with_existing(&[0]),
    );
    let mut changes = TableChanges::load(database.clone(), "Customer").await.unwrap();
    changes
        .get_or_create_by_key_values(vec![1.into()])
        .unwrap()
        .set("Name", "B")
        .unwrap();
    changes.persist().await.unwrap();

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("Existence check SQL"));
    assert!(output.contains("Batch SQL"));
    assert!(output.contains("UPDATE t SET"));
}

#[tokio::test]
async fn test_persist_inserts_new_row() {
    let database = Arc::new(RecordingDatabase::new(
        DatabaseProviderType::SqlServer,
        customer_columns(),
    ));
    let mut changes = TableChanges::load(database.clone(), "Customer").await.unwrap();
    changes
        .get_or_create_by_key_values(vec![1.into()])
        .unwrap()
        .set("Name", "A")
        .unwrap();

    let summary = changes.persist().await.unwrap();
    assert_eq!(summary.inserts, 1);
    assert_eq!(changes.row(0).unwrap().change_type(), ChangeType::Insert);
    assert!(database.executed()[0].contains("INSERT INTO [Customer] ([Id], [Name]) SELECT [Id], [Name] FROM @T"));
}

#[tokio::test]
async fn test_persist_update_without_assignments_writes_nothing() {
    let database = Arc::new(
        RecordingDatabase::new(DatabaseProviderType::SqlServer, customer_columns())
            .with_existing(&[0]),
    );
    let mut changes = TableChanges::load(database.clone(), "Customer").await.unwrap();
    changes.get_or_create_by_key_values(vec![1.into()]).unwrap();

    let summary = changes.persist().await.unwrap();
    assert_eq!(summary.updates, 1);
    assert!(database.executed().is_empty());
}

#[tokio::test]
async fn test_persist_refreshes_timestamp_on_update() {
    let mut columns = customer_columns();
    columns.push(ColumnSchema::new(
        TIMESTAMP_COLUMN,
        UnifiedDataType::DateTime {
            with_timezone: false,
        },
    ));
    let database = Arc::new(
        RecordingDatabase::new(DatabaseProviderType::SqlServer, columns).with_existing(&[0]),
    );
    let mut changes = TableChanges::load(database.clone(), "Customer").await.unwrap();
    changes
        .get_or_create_by_key_values(vec![1.into()])
        .unwrap()
        .set("Name", "C")
        .unwrap();

    changes.persist().await.unwrap();
    let executed = database.executed();
    assert!(executed[0].contains("t.[UtcLastModifiedOn] = '"));
    assert!(!executed[0].contains("s.[UtcLastModifiedOn]"));
}

#[tokio::test]
async fn test_persist_bulk_copies_large_insert_sets() {
    let database = Arc::new(RecordingDatabase::new(
        DatabaseProviderType::SqlServer,
        customer_columns(),
    ));
    let mut changes = TableChanges::load(database.clone(), "Customer").await.unwrap();
    for id in 0..12 {
        changes.get_or_create_by_key_values(vec![id.into()]).unwrap();
    }

    let summary = changes.persist().await.unwrap();
    assert_eq!(summary.bulk_copies, 1);
    assert_eq!(*database.bulk_copied.lock().unwrap(), vec![12]);
    assert!(database.executed().is_empty());
}

#[tokio::test]
async fn test_persist_returns_bulk_copy_error() {
    let mut database = RecordingDatabase::new(DatabaseProviderType::SqlServer, customer_columns());
    database.reject_bulk_copy = true;
    let mut changes = TableChanges::load(Arc::new(database), "Customer").await.unwrap();
    for id in 0..10 {
        changes.get_or_create_by_key_values(vec![id.into()]).unwrap();
    }

    let error = changes.persist().await.unwrap_err();
    assert!(matches!(
        error,
        TableSyncError::Configuration { ref message } if message == "bulk copy rejected"
    ));
    assert!(!changes.has_been_persisted());
}

#[tokio::test]
async fn test_persist_without_rows_or_database() {
    let database = Arc::new(RecordingDatabase::new(
        DatabaseProviderType::SqlServer,
        customer_columns(),
    ));
    let mut changes = TableChanges::load(database.clone(), "Customer").await.unwrap();
    assert_eq!(changes.persist().await.unwrap(), PersistSummary::default());
    assert!(database.queried.lock().unwrap().is_empty());

    let mut offline = customer(DatabaseProviderType::SqlServer);
    offline.get_or_create_by_key_values(vec![1.into()]).unwrap();
    assert!(matches!(
        offline.persist().await,
        Err(TableSyncError::Configuration { .. })
    ));
}

#[tokio::test]
async fn test_load_skips_read_only_columns_and_rejects_empty_tables() {
    let mut columns = customer_columns();
    columns.push(ColumnSchema::new("Version", UnifiedDataType::Binary { max_length: None }).read_only());
    let database = Arc::new(RecordingDatabase::new(DatabaseProviderType::SqlServer, columns));
    let changes = TableChanges::load(database, "Customer").await.unwrap();
    assert_eq!(changes.column_names(), vec!["Id", "Name"]);

    let empty = Arc::new(RecordingDatabase::new(DatabaseProviderType::MySql, Vec::new()));
    assert!(TableChanges::load(empty, "missing").await.is_err());
}

// =============================================================================
// Statement Chunking Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_chunks_cover_every_fragment_once(
        lengths in proptest::collection::vec(1usize..120, 0..60),
        cap in 40usize..600,
    ) {
        let fragments: Vec<(usize, String)> = lengths
            .iter()
            .enumerate()
            .map(|(row, len)| (row, "x".repeat(*len)))
            .collect();
        let header = "HEADER\n";
        let trailer = "\nTRAILER";

        let batches = chunk_statements(header, "\n", fragments, trailer, cap);

        let rows: Vec<usize> = batches.iter().flat_map(|b| b.rows.iter().copied()).collect();
        prop_assert_eq!(rows, (0..lengths.len()).collect::<Vec<_>>());

        for batch in &batches {
            prop_assert!(!batch.rows.is_empty());
            prop_assert!(batch.sql.starts_with(header));
            prop_assert!(batch.sql.ends_with(trailer));
            prop_assert!(batch.sql.len() <= cap || batch.rows.len() == 1);
        }
    }
}
