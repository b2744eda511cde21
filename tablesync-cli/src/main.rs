//! Batched table upserts from the command line.
//!
//! Reads a JSON array of row objects and writes it to a SQL Server or MySQL
//! table with as few statements as the length cap allows.
//!
//! # Security Guarantees
//! - No credentials stored or logged
//! - Connection URLs are redacted in logs and errors

use anyhow::{Context, Result};
use clap::Parser;
use tablesync_cli::{Cli, Command, commands};
use tablesync_core::logging::init_logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    match &cli.command {
        Command::Upsert(args) => {
            let summary = commands::upsert(args).await?;
            if !cli.global.quiet {
                println!(
                    "{}: {} inserted, {} updated ({} batches, {} bulk copies)",
                    args.table, summary.inserts, summary.updates, summary.batches, summary.bulk_copies
                );
            }
        }
        Command::Plan(args) => {
            let script = commands::plan(args)?;
            match &args.output {
                Some(path) => {
                    tokio::fs::write(path, &script)
                        .await
                        .with_context(|| format!("Failed to write to {}", path.display()))?;
                    info!("✓ Script saved to {}", path.display());
                }
                None => print!("{script}"),
            }
        }
        Command::Test(args) => {
            let provider = commands::test(args).await?;
            if !cli.global.quiet {
                println!("Connection to {provider} database successful");
            }
        }
    }

    Ok(())
}
