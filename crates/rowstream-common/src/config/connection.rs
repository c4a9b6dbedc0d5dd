//! Connection configuration.
//!
//! [`ConnectionConfig`] renders to and parses from the `Key=Value;` connection
//! string format SQL Server drivers accept.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RowStreamError, RowStreamResult};

/// Connection configuration.
///
/// # Example
///
/// ```rust
/// use rowstream_common::config::ConnectionConfig;
///
/// let config = ConnectionConfig::new()
///     .server("db01")
///     .database("Documents")
///     .application_name("uploader");
///
/// let parsed = ConnectionConfig::parse(&config.connection_string()).unwrap();
/// assert_eq!(parsed.database.as_deref(), Some("Documents"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host, optionally with `\instance` or `,port`.
    pub server: String,
    /// Database name.
    pub database: Option<String>,
    /// Use the process identity instead of a login.
    pub integrated_security: bool,
    /// Login name.
    pub user_id: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Application name for identification.
    pub application_name: Option<String>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Whether to encrypt the connection.
    pub encrypt: bool,
    /// Whether to skip server certificate validation.
    pub trust_server_certificate: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            database: None,
            integrated_security: true,
            user_id: None,
            password: None,
            application_name: Some("rowstream".to_string()),
            connect_timeout: Duration::from_secs(15),
            encrypt: false,
            trust_server_certificate: false,
        }
    }
}

impl ConnectionConfig {
    /// Creates a new connection configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Sets the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Authenticates with a SQL login instead of integrated security.
    pub fn login(mut self, user_id: impl Into<String>, password: impl Into<String>) -> Self {
        self.integrated_security = false;
        self.user_id = Some(user_id.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables encryption.
    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RowStreamResult<()> {
        if self.server.trim().is_empty() {
            return Err(RowStreamError::invalid_config("server must not be empty"));
        }
        if !self.integrated_security && self.user_id.is_none() {
            return Err(RowStreamError::invalid_config(
                "a user id is required without integrated security",
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(RowStreamError::invalid_config(
                "connect timeout must be positive",
            ));
        }
        Ok(())
    }

    /// Returns the connection string.
    pub fn connection_string(&self) -> String {
        let mut parts = vec![format!("Server={}", self.server)];
        if let Some(database) = &self.database {
            parts.push(format!("Database={}", database));
        }
        if self.integrated_security {
            parts.push("Integrated Security=true".to_string());
        } else {
            if let Some(user) = &self.user_id {
                parts.push(format!("User Id={}", user));
            }
            if let Some(password) = &self.password {
                parts.push(format!("Password={}", password));
            }
        }
        if let Some(name) = &self.application_name {
            parts.push(format!("Application Name={}", name));
        }
        parts.push(format!("Connect Timeout={}", self.connect_timeout.as_secs()));
        if self.encrypt {
            parts.push("Encrypt=true".to_string());
        }
        if self.trust_server_certificate {
            parts.push("TrustServerCertificate=true".to_string());
        }
        parts.join(";")
    }

    /// Parses a `Key=Value;...` connection string.
    ///
    /// Keys are case-insensitive and common synonyms (`Data Source`,
    /// `Initial Catalog`, `UID`, `PWD`) are accepted. Unknown keys are an
    /// error.
    pub fn parse(connection_string: &str) -> RowStreamResult<Self> {
        let mut config = Self {
            integrated_security: false,
            application_name: None,
            ..Self::default()
        };
        let mut saw_server = false;

        for pair in connection_string.split(';').map(str::trim) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                RowStreamError::invalid_config(format!("expected key=value, got '{}'", pair))
            })?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "server" | "data source" | "address" => {
                    config.server = value.to_string();
                    saw_server = true;
                }
                "database" | "initial catalog" => config.database = Some(value.to_string()),
                "integrated security" | "trusted_connection" => {
                    config.integrated_security = parse_bool(key, value)?;
                }
                "user id" | "uid" | "user" => config.user_id = Some(value.to_string()),
                "password" | "pwd" => config.password = Some(value.to_string()),
                "application name" | "app" => config.application_name = Some(value.to_string()),
                "connect timeout" | "connection timeout" | "timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        RowStreamError::invalid_config(format!("invalid timeout '{}'", value))
                    })?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                "encrypt" => config.encrypt = parse_bool(key, value)?,
                "trustservercertificate" | "trust server certificate" => {
                    config.trust_server_certificate = parse_bool(key, value)?;
                }
                other => {
                    return Err(RowStreamError::invalid_config(format!(
                        "unknown connection string key '{}'",
                        other
                    )))
                }
            }
        }

        if !saw_server {
            return Err(RowStreamError::invalid_config(
                "connection string has no server",
            ));
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> RowStreamResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "sspi" => Ok(true),
        "false" | "no" => Ok(false),
        _ => Err(RowStreamError::invalid_config(format!(
            "invalid boolean '{}' for {}",
            value,
            key.trim()
        ))),
    }
}
