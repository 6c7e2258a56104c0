//! Connection configuration
//!
//! `ConnectionConfig` describes how a worker obtains a database connection. It
//! holds no live connection: it is either a shared `DataSource` handle or the
//! `driver + url (+ credentials)` needed to open a connection through a
//! registered driver on the worker. Acquisition is an explicit call each worker makes once at setup.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_dbio::prelude::*;
//!
//! let config = ConnectionConfig::new("org.postgresql.Driver", "postgres://db:5432/app")
//!     .with_username("app")
//!     .with_password("secret");
//! config.validate()?;
//!
//! let conn = config.acquire().await?;
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::connection::{ConnectOptions, Connection};
use crate::datasource::{DataSource, DriverDataSource};
use crate::driver;
use crate::error::{Error, Result};
use crate::metadata::DisplayData;

/// A string that never shows up in logs, debug output or serialized config.
///
/// # Example
///
/// ```
/// use rivven_dbio::config::SensitiveString;
///
/// let secret = SensitiveString::new("my-password");
/// assert_eq!(format!("{:?}", secret), "[REDACTED]");
/// assert_eq!(secret.expose_secret(), "my-password");
/// ```
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string from any string-like value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value.
    ///
    /// Use sparingly - only when the actual value is needed (e.g., for authentication).
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Serialize as redacted to prevent accidental exposure in config dumps/logs
impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// Strip the password from a connection URL before it is logged or displayed.
pub(crate) fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        // Not a URL we can parse (e.g. a DSN); only drop an embedded password.
        Err(_) if url.contains("password") => "***".to_string(),
        Err(_) => url.to_string(),
    }
}

/// Serializable driver-based connection settings, e.g. loaded from a YAML file.
///
/// ```yaml
/// driver_class_name: org.postgresql.Driver
/// url: postgres://db:5432/app
/// username: app
/// password: secret
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSettings {
    /// Registered driver name
    pub driver_class_name: String,
    /// Connection URL
    pub url: String,
    /// User to authenticate as
    #[serde(default)]
    pub username: Option<String>,
    /// Password for `username`
    #[serde(default)]
    pub password: Option<SensitiveString>,
}

/// Immutable description of how to obtain a database connection.
///
/// Cloning is cheap; a clone is what each worker receives.
#[derive(Clone)]
pub struct ConnectionConfig {
    driver_class_name: Option<String>,
    url: Option<String>,
    username: Option<String>,
    password: Option<SensitiveString>,
    data_source: Option<Arc<dyn DataSource>>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("driver_class_name", &self.driver_class_name)
            .field("url", &self.url.as_deref().map(redact_url))
            .field("username", &self.username)
            .field("password", &self.password)
            .field("data_source", &self.data_source.as_ref().map(|ds| ds.name()))
            .finish()
    }
}

impl ConnectionConfig {
    fn empty() -> Self {
        Self {
            driver_class_name: None,
            url: None,
            username: None,
            password: None,
            data_source: None,
        }
    }

    /// Configuration delegating to a pre-built data source
    pub fn from_data_source(data_source: Arc<dyn DataSource>) -> Self {
        Self {
            data_source: Some(data_source),
            ..Self::empty()
        }
    }

    /// Configuration using a registered driver and a URL
    pub fn new(driver_class_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            driver_class_name: Some(driver_class_name.into()),
            url: Some(url.into()),
            ..Self::empty()
        }
    }

    /// Configuration from deserialized settings
    pub fn from_settings(settings: ConnectionSettings) -> Self {
        Self {
            driver_class_name: Some(settings.driver_class_name),
            url: Some(settings.url),
            username: settings.username,
            password: settings.password,
            ..Self::empty()
        }
    }

    /// Set the user to authenticate as
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password for the configured user
    pub fn with_password(mut self, password: impl Into<SensitiveString>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Configured driver name
    pub fn driver_class_name(&self) -> Option<&str> {
        self.driver_class_name.as_deref()
    }

    /// Configured URL
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Configured user
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Configured data source handle
    pub fn data_source(&self) -> Option<&Arc<dyn DataSource>> {
        self.data_source.as_ref()
    }

    /// Check that one of the two forms is fully populated
    pub fn validate(&self) -> Result<()> {
        if self.data_source.is_some() {
            return Ok(());
        }
        match (&self.driver_class_name, &self.url) {
            (Some(driver), Some(url)) if !driver.is_empty() && !url.is_empty() => Ok(()),
            (None, _) => Err(Error::config(
                "either a data source or a driver class name is required",
            )),
            (Some(driver), _) if driver.is_empty() => {
                Err(Error::config("driver class name must not be empty"))
            }
            _ => Err(Error::config("url is required when using a driver class name")),
        }
    }

    /// Obtain a new connection.
    ///
    /// The handle form delegates to the data source (with credentials when a
    /// username is configured). The driver form resolves the registered driver
    /// and opens a physical connection with it. Every failure, including an
    /// unknown driver, is reported as a connection error.
    pub async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let result = match &self.data_source {
            Some(data_source) => {
                debug!(data_source = data_source.name(), "Acquiring connection");
                match &self.username {
                    Some(username) => {
                        data_source
                            .connection_with_credentials(username, self.password.as_ref())
                            .await
                    }
                    None => data_source.connection().await,
                }
            }
            None => match self.build_data_source() {
                Ok(data_source) => {
                    debug!(
                        driver = data_source.name(),
                        url = %self.url.as_deref().map(redact_url).unwrap_or_default(),
                        "Acquiring connection"
                    );
                    data_source.connection().await
                }
                Err(e) => Err(e),
            },
        };

        result.map_err(|e| match e {
            Error::Connection { .. } => e,
            other => Error::connection_with_source("failed to acquire connection", other),
        })
    }

    fn build_data_source(&self) -> Result<DriverDataSource> {
        self.validate()
            .map_err(|e| Error::connection_with_source("invalid connection configuration", e))?;
        let (Some(driver_class_name), Some(url)) = (&self.driver_class_name, &self.url) else {
            return Err(Error::connection("no data source or driver configured"));
        };

        let factory = driver::lookup(driver_class_name)?;
        let mut options = ConnectOptions::new(url.clone());
        if let Some(username) = &self.username {
            options = options.with_credentials(username.clone(), self.password.clone());
        }
        Ok(DriverDataSource::new(factory, options))
    }

    /// Diagnostic view: the data source name for the handle form, otherwise
    /// driver, redacted URL and username. Never includes the password.
    pub fn populate_display_data(&self, display: &mut DisplayData) {
        if let Some(data_source) = &self.data_source {
            display.add("data_source", data_source.name());
        } else {
            display.add_if_some("driver_class_name", self.driver_class_name.as_deref());
            display.add_if_some("url", self.url.as_deref().map(redact_url));
            display.add_if_some("username", self.username.as_deref());
        }
    }
}
