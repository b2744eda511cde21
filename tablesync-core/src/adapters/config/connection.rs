//! Database connection configuration.
//!
//! This module provides the `ConnectionConfig` struct for configuring
//! database connections with safe defaults.

use crate::error::{TableSyncError, redact_database_url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for database connections.
///
/// # Security
/// This struct intentionally does NOT store passwords or credentials.
/// Credentials must be handled separately and never logged or serialized.
///
/// # Example
/// ```rust
/// use tablesync_core::adapters::ConnectionConfig;
///
/// let config = ConnectionConfig::new("localhost".to_string())
///     .with_port(1433)
///     .with_database("sales".to_string())
///     .with_username("loader".to_string());
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.command_timeout.as_secs(), 30);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host address
    pub host: String,
    /// Optional port number
    pub port: Option<u16>,
    /// Optional database name
    pub database: Option<String>,
    /// Optional username (password handled separately)
    pub username: Option<String>,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Per-statement timeout
    pub command_timeout: Duration,
    /// Maximum number of connections in pool
    pub max_connections: u32,
    /// Application name reported to the server
    pub application_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            database: None,
            username: None,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
            max_connections: 10,
            application_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ConnectionConfig({}{}{})",
            self.host,
            self.port.map_or_else(String::new, |p| format!(":{p}")),
            self.database
                .as_ref()
                .map_or_else(String::new, |db| format!("/{db}"))
        )
        // Intentionally omit username and never include credentials
    }
}

impl ConnectionConfig {
    /// Validates connection configuration parameters.
    ///
    /// # Errors
    /// Returns error if configuration values are invalid or unsafe
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.is_empty() {
            return Err(TableSyncError::configuration("host cannot be empty"));
        }

        if self.port == Some(0) {
            return Err(TableSyncError::configuration("port must be greater than 0"));
        }

        if self.max_connections == 0 {
            return Err(TableSyncError::configuration(
                "max_connections must be greater than 0",
            ));
        }

        if self.max_connections > 100 {
            return Err(TableSyncError::configuration(
                "max_connections must not exceed 100",
            ));
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(TableSyncError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        if self.command_timeout.as_secs() == 0 {
            return Err(TableSyncError::configuration(
                "command_timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Creates a new connection config with safe defaults.
    pub fn new(host: String) -> Self {
        Self {
            host,
            ..Default::default()
        }
    }

    /// Reads host, port, database, user and the `command_timeout`,
    /// `connect_timeout`, `max_connections` and `application_name` query
    /// parameters from a connection URL. The password is ignored.
    ///
    /// # Errors
    /// Returns a configuration error (with the URL redacted) if it cannot be parsed.
    pub fn from_url(connection_string: &str) -> crate::Result<Self> {
        let url = url::Url::parse(connection_string).map_err(|e| {
            TableSyncError::configuration(format!(
                "Invalid connection URL {}: {e}",
                redact_database_url(connection_string)
            ))
        })?;

        let mut config = Self::new(url.host_str().unwrap_or("localhost").to_string());
        config.port = url.port();

        let database = url.path().trim_start_matches('/');
        if !database.is_empty() {
            config.database = Some(database.to_string());
        }
        if !url.username().is_empty() {
            config.username = Some(url.username().to_string());
        }

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "command_timeout" => {
                    config.command_timeout = Duration::from_secs(parse_number(&key, &value)?);
                }
                "connect_timeout" => {
                    config.connect_timeout = Duration::from_secs(parse_number(&key, &value)?);
                }
                "max_connections" => {
                    config.max_connections = parse_number(&key, &value)?;
                }
                "application_name" => config.application_name = value.into_owned(),
                _ => {}
            }
        }

        Ok(config)
    }

    /// Builder method to set port.
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder method to set database.
    pub fn with_database(mut self, database: String) -> Self {
        self.database = Some(database);
        self
    }

    /// Builder method to set username.
    pub fn with_username(mut self, username: String) -> Self {
        self.username = Some(username);
        self
    }

    /// Builder method to set the per-statement timeout.
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Builder method to set the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// User name for error messages; empty when none was configured.
    pub fn user_display(&self) -> &str {
        self.username.as_deref().unwrap_or_default()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| TableSyncError::configuration(format!("{key} must be a number, got '{value}'")))
}
