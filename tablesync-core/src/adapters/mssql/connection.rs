//! SQL Server connection setup.
//!
//! tiberius has no pool; each statement outside a transaction opens its own
//! connection. Credentials live only in the tiberius [`Config`] and are never
//! copied into [`ConnectionConfig`].

use super::{ConnectionConfig, SqlServerAdapter, SqlServerClient};
use crate::Result;
use crate::error::{TableSyncError, redact_database_url};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;
use url::Url;

impl SqlServerAdapter {
    /// Create a new SQL Server adapter
    ///
    /// # Arguments
    ///
    /// * `connection_string` - SQL Server connection URL (credentials will not be logged)
    ///
    /// # Security
    ///
    /// - Connection string is never logged or stored after parsing
    /// - All errors are sanitized to prevent credential leakage
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is malformed
    #[allow(clippy::unused_async)]
    pub async fn new(connection_string: &str) -> Result<Self> {
        let config = parse_sqlserver_connection_config(connection_string)?;
        let client_config = build_client_config(connection_string, &config)?;

        tracing::debug!(config = %config, "Configured SQL Server adapter");
        Ok(Self::from_parts(config, client_config))
    }

    /// Opens a new connection, bounded by the connect timeout.
    pub(crate) async fn connect(&self) -> Result<SqlServerClient> {
        let connecting = async {
            let tcp = TcpStream::connect(self.client_config.get_addr())
                .await
                .map_err(TableSyncError::connection_failed)?;
            tcp.set_nodelay(true)
                .map_err(TableSyncError::connection_failed)?;

            Client::connect(self.client_config.clone(), tcp.compat_write())
                .await
                .map_err(TableSyncError::connection_failed)
        };

        match tokio::time::timeout(self.config.connect_timeout, connecting).await {
            Ok(client) => client,
            Err(_) => Err(TableSyncError::Connection {
                context: format!(
                    "Connecting to {} timed out after {}s",
                    self.config,
                    self.config.connect_timeout.as_secs()
                ),
                source: "connect timeout".into(),
            }),
        }
    }
}

/// Parses a SQL Server connection string into the adapter configuration.
///
/// Accepts `mssql://` and `sqlserver://` URLs; the port defaults to 1433.
pub fn parse_sqlserver_connection_config(connection_string: &str) -> Result<ConnectionConfig> {
    validate_sqlserver_connection_string(connection_string)?;

    let mut config = ConnectionConfig::from_url(connection_string)?;
    if config.port.is_none() {
        config = config.with_port(1433);
    }

    if let Some(database) = &config.database
        && database.len() > 128
    {
        return Err(TableSyncError::configuration(
            "Database name too long: maximum 128 characters",
        ));
    }

    config.validate()?;
    Ok(config)
}

/// Validates SQL Server connection string format
///
/// # Errors
/// Returns error if connection string is invalid
pub fn validate_sqlserver_connection_string(connection_string: &str) -> Result<()> {
    let url = Url::parse(connection_string).map_err(|e| {
        TableSyncError::configuration(format!("Invalid SQL Server connection string format: {e}"))
    })?;

    if !matches!(url.scheme(), "mssql" | "sqlserver") {
        return Err(TableSyncError::configuration(
            "Connection string must use mssql:// or sqlserver:// scheme",
        ));
    }

    if url.host_str().is_none() {
        return Err(TableSyncError::configuration(
            "Connection string must specify a host",
        ));
    }

    Ok(())
}

/// Builds the tiberius configuration, including credentials and TLS options.
///
/// Recognized query parameters: `trust_server_certificate` and `encrypt`
/// (`off`, `on`, `required`, `not_supported`).
pub(crate) fn build_client_config(
    connection_string: &str,
    config: &ConnectionConfig,
) -> Result<Config> {
    let url = Url::parse(connection_string).map_err(|_| {
        TableSyncError::configuration(format!(
            "Invalid SQL Server connection string: {}",
            redact_database_url(connection_string)
        ))
    })?;

    let mut client_config = Config::new();
    client_config.host(&config.host);
    client_config.port(config.port.unwrap_or(1433));
    client_config.application_name(&config.application_name);
    if let Some(database) = &config.database {
        client_config.database(database);
    }

    let username = percent_decode(url.username());
    let password = percent_decode(url.password().unwrap_or(""));
    client_config.authentication(AuthMethod::sql_server(username, password));

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "trust_server_certificate" | "trust_cert" if is_truthy(&value) => {
                client_config.trust_cert();
            }
            "encrypt" => {
                client_config.encryption(parse_encryption(&value)?);
            }
            _ => {}
        }
    }

    Ok(client_config)
}

fn parse_encryption(value: &str) -> Result<EncryptionLevel> {
    match value.to_lowercase().as_str() {
        "off" | "false" => Ok(EncryptionLevel::Off),
        "on" | "true" => Ok(EncryptionLevel::On),
        "required" | "strict" => Ok(EncryptionLevel::Required),
        "not_supported" => Ok(EncryptionLevel::NotSupported),
        other => Err(TableSyncError::configuration(format!(
            "Unknown encrypt option: {other}"
        ))),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "yes" | "1")
}

/// Decodes URL userinfo; `+` is literal there.
fn percent_decode(value: &str) -> String {
    let encoded = format!("v={}", value.replace('+', "%2B"));
    url::form_urlencoded::parse(encoded.as_bytes())
        .next()
        .map_or_else(|| value.to_string(), |(_, decoded)| decoded.into_owned())
}
