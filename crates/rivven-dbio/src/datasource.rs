//! Data sources
//!
//! A `DataSource` hands out connections. Two flavours exist:
//! - user supplied handles (any type implementing the trait, shared via `Arc`),
//!   which may pool however they like
//! - `DriverDataSource`, built from a registered driver and connect options;
//!   every call opens a new physical connection and `close()` closes it
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_dbio::datasource::DriverDataSource;
//!
//! let ds = DriverDataSource::new(factory, ConnectOptions::new(url));
//! let conn = ds.connection().await?;
//! conn.execute("SELECT 1", &[]).await?;
//! conn.close().await?;
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::{redact_url, SensitiveString};
use crate::connection::{ConnectOptions, Connection, ConnectionFactory};
use crate::error::Result;

/// Source of database connections
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Obtain a connection with the source's own credentials
    async fn connection(&self) -> Result<Box<dyn Connection>>;

    /// Obtain a connection authenticated as `username`
    async fn connection_with_credentials(
        &self,
        username: &str,
        password: Option<&SensitiveString>,
    ) -> Result<Box<dyn Connection>>;

    /// Name used in diagnostics and display data
    fn name(&self) -> &str;
}

/// Data source opening connections through a driver factory
#[derive(Clone)]
pub struct DriverDataSource {
    factory: Arc<dyn ConnectionFactory>,
    options: ConnectOptions,
}

impl std::fmt::Debug for DriverDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverDataSource")
            .field("driver", &self.factory.name())
            .field("options", &self.options)
            .finish()
    }
}

impl DriverDataSource {
    /// Create a data source; no connection is opened until the first call
    pub fn new(factory: Arc<dyn ConnectionFactory>, options: ConnectOptions) -> Self {
        Self { factory, options }
    }

    /// Options passed to the driver
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    async fn open(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>> {
        debug!(
            driver = self.factory.name(),
            url = %redact_url(&options.url),
            username = options.username.as_deref().unwrap_or(""),
            "Opening connection"
        );
        self.factory.connect(options).await
    }
}

#[async_trait]
impl DataSource for DriverDataSource {
    async fn connection(&self) -> Result<Box<dyn Connection>> {
        self.open(&self.options).await
    }

    async fn connection_with_credentials(
        &self,
        username: &str,
        password: Option<&SensitiveString>,
    ) -> Result<Box<dyn Connection>> {
        let options = self
            .options
            .clone()
            .with_credentials(username, password.cloned());
        self.open(&options).await
    }

    fn name(&self) -> &str {
        self.factory.name()
    }
}
