//! Library half of the `tablesync` binary.
//!
//! Argument definitions live here so they can be parsed in tests; the
//! command bodies are in [`commands`] and file handling in [`input`].

pub mod commands;
pub mod input;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tablesync_core::DatabaseProviderType;
use tablesync_core::adapters::PersistOptions;
use tablesync_core::adapters::config::DEFAULT_MAX_STATEMENT_LENGTH;

/// CLI argument structure
#[derive(Debug, Parser)]
#[command(name = "tablesync")]
#[command(about = "Batched upserts of JSON rows into SQL Server and MySQL tables")]
#[command(version)]
#[command(long_about = "
tablesync - batched table upserts

Loads a JSON array of objects, matches each object to a table row by its
primary key and writes the whole set with a handful of batched statements.
Rows whose key already exists are updated, all others are inserted.

SUPPORTED DATABASES:
- SQL Server (mssql:// or sqlserver://)
- MySQL (mysql://)

EXAMPLES:
  tablesync upsert --table dbo.Customers --input customers.json
  tablesync plan --schema customers.schema.json --dialect mysql --input customers.json
  DATABASE_URL=mysql://app@localhost/shop tablesync test --password-prompt
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upsert rows from a JSON file into a table
    Upsert(UpsertArgs),
    /// Print the SQL an upsert would run, without a database
    Plan(PlanArgs),
    /// Test database connection
    Test(TestArgs),
}

/// Verbosity flags shared by every command
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(
        short,
        long,
        global = true,
        help = "Suppress all output except errors"
    )]
    pub quiet: bool,
}

/// Where and how to connect
#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Database connection URL
    #[arg(
        long,
        env = "DATABASE_URL",
        hide_env_values = true,
        help = "Database connection string (credentials will be sanitized in logs)"
    )]
    pub database_url: String,

    /// Ask for the password on the terminal
    #[arg(
        long,
        help = "Prompt for the database password instead of reading it from the URL"
    )]
    pub password_prompt: bool,
}

/// Row input and batching options shared by `upsert` and `plan`
#[derive(Debug, Args)]
pub struct BatchArgs {
    /// JSON file holding an array of row objects
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Columns to match rows on instead of the primary key
    #[arg(long, value_delimiter = ',', value_name = "COLUMNS")]
    pub keys: Vec<String>,

    /// Stage large inserts through SQL instead of bulk copy
    #[arg(long)]
    pub no_bulk_copy: bool,

    /// Use staged statements even where the engine has a native upsert
    #[arg(long)]
    pub no_native_upsert: bool,

    /// Longest statement to generate, in characters
    #[arg(long, value_name = "CHARS", default_value_t = DEFAULT_MAX_STATEMENT_LENGTH)]
    pub max_statement_length: usize,
}

impl BatchArgs {
    /// Persist options selected by the flags.
    pub fn persist_options(&self) -> PersistOptions {
        PersistOptions::default()
            .with_bulk_copy(!self.no_bulk_copy)
            .with_native_upsert(!self.no_native_upsert)
            .with_max_statement_length(self.max_statement_length)
    }
}

/// Arguments of `upsert`
#[derive(Debug, Args)]
pub struct UpsertArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Target table, optionally schema-qualified
    #[arg(short, long)]
    pub table: String,

    #[command(flatten)]
    pub batch: BatchArgs,

    /// Run every batch inside one transaction
    #[arg(long)]
    pub transaction: bool,
}

/// Arguments of `plan`
#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Table definition file (`{"name": ..., "columns": [...]}`)
    #[arg(short, long, value_name = "FILE")]
    pub schema: PathBuf,

    /// Overrides the table name from the schema file
    #[arg(short, long)]
    pub table: Option<String>,

    /// SQL dialect to generate
    #[arg(short, long, default_value = "sqlserver", value_parser = parse_dialect)]
    pub dialect: DatabaseProviderType,

    #[command(flatten)]
    pub batch: BatchArgs,

    /// Write the script to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Arguments of `test`
#[derive(Debug, Args)]
pub struct TestArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

fn parse_dialect(value: &str) -> Result<DatabaseProviderType, String> {
    value.parse().map_err(|e: tablesync_core::TableSyncError| e.to_string())
}
