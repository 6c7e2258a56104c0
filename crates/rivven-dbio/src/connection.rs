//! Connection traits for rivven-dbio
//!
//! Core abstractions the connectors drive:
//! - Connection: query execution, transaction control, statement preparation
//! - PreparedStatement: a statement template executed once or as a batch
//! - RowStream: forward-only cursor over a result set
//! - Parameters: positional parameter slots bound by a parameter setter
//! - ConnectionFactory: the driver entry point

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;

use crate::config::{redact_url, SensitiveString};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// A connection to a database
///
/// A connection is owned by exactly one worker for its whole lifetime, so
/// implementations need no coordination beyond what the driver requires.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query and return a forward-only cursor over its rows
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>>;

    /// Execute a query and collect all rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stream = self.query_stream(sql, params).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a statement that modifies data, returns affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Prepare a statement for repeated execution
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Enable or disable automatic commit after every statement
    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

    /// Whether automatic commit is enabled
    fn is_auto_commit(&self) -> bool;

    /// Commit the open transaction (no-op when nothing is pending)
    async fn commit(&self) -> Result<()>;

    /// Roll back the open transaction (no-op when nothing is pending)
    async fn rollback(&self) -> Result<()>;

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// A prepared statement bound to the connection that prepared it
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// Get the SQL string
    fn sql(&self) -> &str;

    /// Execute the statement once with the given parameters
    async fn execute(&self, params: &[Value]) -> Result<u64>;

    /// Execute the statement once per parameter set, returns affected counts
    async fn execute_batch(&self, batch: &[Vec<Value>]) -> Result<Vec<u64>> {
        let mut results = Vec::with_capacity(batch.len());
        for params in batch {
            results.push(self.execute(params).await?);
        }
        Ok(results)
    }

    /// Release the statement
    async fn close(&self) -> Result<()>;
}

/// Streaming row iterator
pub trait RowStream: Send {
    /// Get the next row
    fn next(&mut self) -> BoxFuture<'_, Result<Option<Row>>>;
}

/// Row stream backed by an already materialized result set
pub struct VecRowStream {
    rows: std::vec::IntoIter<Row>,
}

impl VecRowStream {
    /// Create a stream over the given rows
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowStream for VecRowStream {
    fn next(&mut self) -> BoxFuture<'_, Result<Option<Row>>> {
        Box::pin(async move { Ok(self.rows.next()) })
    }
}

/// Positional parameter slots for one statement invocation.
///
/// Indexes are 1-based, matching `?`/`$n` placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    slots: Vec<Option<Value>>,
}

impl Parameters {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` to the placeholder at `index` (1-based)
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        if index == 0 {
            return Err(Error::query("parameter indexes start at 1"));
        }
        if self.slots.len() < index {
            self.slots.resize(index, None);
        }
        self.slots[index - 1] = Some(value.into());
        Ok(())
    }

    /// Unbind all parameters
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Highest bound index
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no parameter is bound
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bound values in placeholder order; fails if an index below the highest
    /// bound one was skipped
    pub fn to_values(&self) -> Result<Vec<Value>> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.clone()
                    .ok_or_else(|| Error::query(format!("parameter {} is not bound", i + 1)))
            })
            .collect()
    }
}

/// Options passed to a driver when opening a physical connection
#[derive(Clone)]
pub struct ConnectOptions {
    /// Connection URL (e.g., postgres://host:5432/db)
    pub url: String,
    /// User to authenticate as
    pub username: Option<String>,
    /// Password for `username`
    pub password: Option<SensitiveString>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Application name (shown in pg_stat_activity, etc)
    pub application_name: Option<String>,
    /// Additional driver properties
    pub properties: HashMap<String, String>,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("url", &redact_url(&self.url))
            .field("username", &self.username)
            .field("password", &self.password)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("application_name", &self.application_name)
            .field("properties", &self.properties)
            .finish()
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            connect_timeout_ms: 10_000,
            application_name: Some("rivven-dbio".into()),
            properties: HashMap::new(),
        }
    }
}

impl ConnectOptions {
    /// Create options with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<SensitiveString>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Add a driver property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Driver entry point for opening physical connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>>;

    /// Driver name used in diagnostics
    fn name(&self) -> &str;
}
