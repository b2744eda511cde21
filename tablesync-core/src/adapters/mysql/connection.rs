//! MySQL pool setup and connection string handling.
//!
//! The pool connects lazily, so creating an adapter never touches the
//! server. Adapter-only query parameters are stripped before the URL reaches
//! sqlx.

use super::{ConnectionConfig, MySqlAdapter};
use crate::Result;
use crate::error::{TableSyncError, redact_database_url};
use sqlx::MySqlPool;
use url::Url;

/// Query parameters understood by [`ConnectionConfig::from_url`] and hidden
/// from the driver.
const ADAPTER_PARAMETERS: [&str; 4] = [
    "command_timeout",
    "connect_timeout",
    "max_connections",
    "application_name",
];

impl MySqlAdapter {
    /// Creates an adapter from a `mysql://` or `mariadb://` URL.
    ///
    /// # Errors
    /// Fails on a malformed URL or invalid timeouts and limits.
    pub async fn new(connection_string: &str) -> Result<Self> {
        let config = parse_mysql_connection_config(connection_string)?;
        Self::with_config(connection_string, config).await
    }

    /// Creates an adapter with an explicit configuration; only the
    /// credentials, host and driver parameters are taken from the URL.
    #[allow(clippy::unused_async)]
    pub async fn with_config(connection_string: &str, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let pool = create_mysql_connection_pool(connection_string, &config)?;

        tracing::debug!(config = %config, "Created MySQL connection pool");
        Ok(Self::from_pool(pool, config))
    }
}

/// Parses a MySQL URL into a validated [`ConnectionConfig`], defaulting the
/// port to 3306.
pub fn parse_mysql_connection_config(connection_string: &str) -> Result<ConnectionConfig> {
    validate_mysql_connection_string(connection_string)?;

    let mut config = ConnectionConfig::from_url(connection_string)?;
    if config.port.is_none() {
        config = config.with_port(3306);
    }

    if let Some(database) = &config.database
        && database.len() > 64
    {
        return Err(TableSyncError::configuration(
            "Database name too long: maximum 64 characters",
        ));
    }

    config.validate()?;
    Ok(config)
}

/// Checks the scheme and host of a MySQL URL.
pub fn validate_mysql_connection_string(connection_string: &str) -> Result<()> {
    let url = Url::parse(connection_string).map_err(|e| {
        TableSyncError::configuration(format!("Invalid MySQL connection string format: {e}"))
    })?;

    if !matches!(url.scheme(), "mysql" | "mariadb") {
        return Err(TableSyncError::configuration(
            "Connection string must use mysql:// scheme",
        ));
    }

    if url.host_str().is_none() {
        return Err(TableSyncError::configuration(
            "Connection string must specify a host",
        ));
    }

    Ok(())
}

/// Connection URL without the adapter's own query parameters.
pub(crate) fn driver_url(connection_string: &str) -> Result<String> {
    let mut url = Url::parse(connection_string).map_err(|e| {
        TableSyncError::configuration(format!("Invalid MySQL connection string format: {e}"))
    })?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !ADAPTER_PARAMETERS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    if url.scheme() == "mariadb" {
        let _ = url.set_scheme("mysql");
    }

    Ok(url.to_string())
}

/// Pool capped at 100 connections whose sessions carry the command timeout.
fn create_mysql_connection_pool(
    connection_string: &str,
    config: &ConnectionConfig,
) -> Result<MySqlPool> {
    use sqlx::Executor;

    let driver_url = driver_url(connection_string)?;
    let command_timeout_ms = config.command_timeout.as_millis();

    sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(config.max_connections.min(100))
        .acquire_timeout(config.connect_timeout)
        .test_before_acquire(true)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                // Bounds read statements server-side as well
                conn.execute(format!("SET SESSION max_execution_time = {command_timeout_ms}").as_str())
                    .await?;
                Ok(())
            })
        })
        .connect_lazy(&driver_url)
        .map_err(|e| TableSyncError::Connection {
            context: format!(
                "Failed to create MySQL connection pool to {}",
                redact_database_url(connection_string)
            ),
            source: Box::new(e),
        })
}
