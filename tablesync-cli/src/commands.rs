//! Command bodies for `upsert`, `plan` and `test`.

use crate::input::{read_rows, read_table_definition, stage_rows};
use crate::{BatchArgs, ConnectionArgs, PlanArgs, TestArgs, UpsertArgs};
use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tablesync_core::adapters::create_database;
use tablesync_core::error::redact_database_url;
use tablesync_core::{Database, DatabaseProviderType, PersistSummary, TableChanges};
use tracing::{error, info, warn};

impl ConnectionArgs {
    /// The connection URL, with the prompted password filled in when asked.
    ///
    /// # Errors
    /// Fails when the URL cannot carry a password or the prompt fails.
    pub fn resolve_url(&self) -> Result<String> {
        if !self.password_prompt {
            return Ok(self.database_url.clone());
        }

        let mut url = url::Url::parse(&self.database_url)
            .context("Database URL is not a valid URL")?;
        let password =
            rpassword::prompt_password("Database password: ").context("Failed to read password")?;
        if url.set_password(Some(&password)).is_err() {
            bail!("Database URL cannot carry a password");
        }
        Ok(url.to_string())
    }
}

fn configure(changes: &mut TableChanges, batch: &BatchArgs) -> Result<()> {
    if !batch.keys.is_empty() {
        let keys: Vec<&str> = batch.keys.iter().map(String::as_str).collect();
        changes.set_columns_as_keys(&keys)?;
    }

    let options = batch.persist_options();
    options.validate()?;
    changes.set_options(options);
    Ok(())
}

async fn connect(connection: &ConnectionArgs) -> Result<Arc<dyn Database>> {
    let url = connection.resolve_url()?;
    info!("Target: {}", redact_database_url(&url));

    create_database(&url).await.map_err(|e| {
        error!("Failed to create database adapter: {}", e);
        e.into()
    })
}

/// Loads the input rows into `table` and persists them.
///
/// # Errors
/// Fails on unreadable input, schema mismatches and statement failures.
/// With `--transaction` a failed persist is rolled back.
pub async fn upsert(args: &UpsertArgs) -> Result<PersistSummary> {
    let database = connect(&args.connection).await?;
    let mut changes = TableChanges::load(Arc::clone(&database), &args.table)
        .await
        .with_context(|| format!("Failed to load schema of {}", args.table))?;
    configure(&mut changes, &args.batch)?;

    let rows = read_rows(&args.batch.input)?;
    let staged = stage_rows(&mut changes, &rows)?;
    info!(table = %args.table, rows = staged, "Persisting changes");

    if !args.transaction {
        return Ok(changes.persist().await?);
    }

    database.begin_transaction().await?;
    match changes.persist().await {
        Ok(summary) => {
            database.commit().await?;
            Ok(summary)
        }
        Err(e) => {
            if let Err(rollback) = database.rollback().await {
                warn!("Rollback failed: {}", rollback);
            }
            Err(e.into())
        }
    }
}

/// Renders the batches an upsert would run against the schema file.
///
/// # Errors
/// Fails on unreadable input or rows that do not fit the table.
pub fn plan(args: &PlanArgs) -> Result<String> {
    let definition = read_table_definition(&args.schema)?;
    let table = args.table.as_deref().unwrap_or(&definition.name);

    let mut changes = TableChanges::offline(args.dialect, table, definition.columns);
    configure(&mut changes, &args.batch)?;

    let rows = read_rows(&args.batch.input)?;
    stage_rows(&mut changes, &rows)?;

    let plan = changes.plan()?;
    info!(
        table,
        dialect = %args.dialect,
        existence_checks = plan.existence_checks.len(),
        writes = plan.writes.len(),
        "Planned persist"
    );
    Ok(plan.to_script())
}

/// Opens a connection and runs a trivial query.
///
/// # Errors
/// Fails when the adapter cannot be created or the server does not answer.
pub async fn test(args: &TestArgs) -> Result<DatabaseProviderType> {
    info!("Testing database connection...");
    let database = connect(&args.connection).await?;

    database.test_connection().await.map_err(|e| {
        error!("Connection test failed: {}", e);
        e
    })?;

    info!("✓ Connection test successful");
    Ok(database.provider_type())
}
