//! Batched, committed database writes
//!
//! A [`WriteConnector`] describes the statement, the parameter setter and the
//! connection. [`WriteConnector::setup`] gives each worker a [`WriteWorker`]
//! owning one connection (auto-commit off) and one prepared statement for its
//! whole lifetime:
//!
//! ```text
//! setup ─► start_bundle ─► process* ─► finish_bundle ─► ... ─► teardown
//! ```
//!
//! Bound elements accumulate until `batch_size` of them are pending or the
//! bundle ends; a flush executes them as one batch and commits. A failed
//! flush or parameter binding fails the bundle. The host is expected to retry
//! whole bundles, so statements should be upserts.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_dbio::prelude::*;
//!
//! let write = WriteConnector::new()
//!     .with_connection_config(config)
//!     .with_statement("insert into Person (id, name) values (?, ?) on conflict do nothing")
//!     .with_parameter_setter(|p: &(i64, String), params: &mut Parameters| {
//!         params.set(1, p.0)?;
//!         params.set(2, p.1.as_str())
//!     });
//!
//! let mut worker = write.setup().await?;
//! worker.start_bundle().await?;
//! for person in &people {
//!     worker.process(person).await?;
//! }
//! worker.finish_bundle().await?;
//! worker.teardown().await?;
//! ```

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, Parameters, PreparedStatement};
use crate::error::{Error, Result};
use crate::metadata::{duration_ms, DisplayData};
use crate::types::Value;

/// Number of bound elements that triggers a flush
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Binds one element onto the statement's parameters
pub trait ParameterSetter<T>: Send + Sync {
    /// Bind `element`; `params` has been cleared beforehand
    fn set_parameters(&self, element: &T, params: &mut Parameters) -> Result<()>;

    /// Name used in display data
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

impl<T, F> ParameterSetter<T> for F
where
    F: Fn(&T, &mut Parameters) -> Result<()> + Send + Sync,
{
    fn set_parameters(&self, element: &T, params: &mut Parameters) -> Result<()> {
        self(element, params)
    }
}

/// Lifecycle state of a write worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Set up, nothing pending
    Ready,
    /// Elements are pending
    Accumulating,
    /// A batch is being executed and committed
    Flushing,
    /// Torn down
    Closed,
}

/// Write statistics of one worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Elements bound
    pub elements: u64,
    /// Elements in committed batches
    pub elements_committed: u64,
    /// Batches executed
    pub batches: u64,
    /// Successful commits
    pub commits: u64,
    /// Transactions rolled back after a failed bundle
    pub rollbacks: u64,
    /// Total time spent executing and committing batches (milliseconds)
    pub total_flush_time_ms: u64,
}

/// Description of a batched write
pub struct WriteConnector<T> {
    connection_config: Option<ConnectionConfig>,
    statement: Option<String>,
    parameter_setter: Option<Arc<dyn ParameterSetter<T>>>,
    batch_size: usize,
}

impl<T> Clone for WriteConnector<T> {
    fn clone(&self) -> Self {
        Self {
            connection_config: self.connection_config.clone(),
            statement: self.statement.clone(),
            parameter_setter: self.parameter_setter.clone(),
            batch_size: self.batch_size,
        }
    }
}

impl<T> std::fmt::Debug for WriteConnector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteConnector")
            .field("connection_config", &self.connection_config)
            .field("statement", &self.statement)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl<T> Default for WriteConnector<T> {
    fn default() -> Self {
        Self {
            connection_config: None,
            statement: None,
            parameter_setter: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl<T: 'static> WriteConnector<T> {
    /// Create an empty write description
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how connections are obtained
    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection_config = Some(config);
        self
    }

    /// Set the statement template (positional placeholders)
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    /// Set the parameter setter
    pub fn with_parameter_setter(mut self, setter: impl ParameterSetter<T> + 'static) -> Self {
        self.parameter_setter = Some(Arc::new(setter));
        self
    }

    /// Set the number of pending elements that triggers a flush
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Flush threshold
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Check that every required field is set. Never touches the database.
    pub fn validate(&self) -> Result<()> {
        match &self.statement {
            None => return Err(Error::config("write: statement is required")),
            Some(statement) if statement.trim().is_empty() => {
                return Err(Error::config("write: statement must not be empty"))
            }
            Some(_) => {}
        }
        if self.parameter_setter.is_none() {
            return Err(Error::config("write: parameter setter is required"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("write: batch size must be at least 1"));
        }
        match &self.connection_config {
            None => Err(Error::config("write: connection configuration is required")),
            Some(config) => config.validate(),
        }
    }

    /// Diagnostic description; never includes the password
    pub fn display_data(&self) -> DisplayData {
        let mut display = DisplayData::new();
        display
            .add_if_some("statement", self.statement.as_deref())
            .add_if_some(
                "parameter_setter",
                self.parameter_setter.as_ref().map(|s| s.name()),
            )
            .add("batch_size", self.batch_size);
        if let Some(config) = &self.connection_config {
            config.populate_display_data(&mut display);
        }
        display
    }

    /// Worker setup: acquire a connection, turn auto-commit off and prepare
    /// the statement.
    ///
    /// If anything fails after the connection was acquired, the connection is
    /// closed before the error is returned.
    pub async fn setup(&self) -> Result<WriteWorker<T>> {
        self.validate()?;
        let (Some(config), Some(sql), Some(setter)) = (
            &self.connection_config,
            &self.statement,
            &self.parameter_setter,
        ) else {
            return Err(Error::config("write: incomplete configuration"));
        };

        let conn = config.acquire().await?;
        let prepared = async {
            conn.set_auto_commit(false).await?;
            conn.prepare(sql).await
        }
        .await;

        let statement = match prepared {
            Ok(statement) => statement,
            Err(e) => {
                if let Err(close_err) = conn.close().await {
                    warn!(error = %close_err, "Failed to close connection after setup failure");
                }
                return Err(Error::connection_with_source("write worker setup failed", e));
            }
        };

        info!(statement = %sql, batch_size = self.batch_size, "Write worker ready");
        Ok(WriteWorker {
            conn: Some(conn),
            statement: Some(statement),
            setter: Arc::clone(setter),
            batch_size: self.batch_size,
            params: Parameters::new(),
            pending: Vec::with_capacity(self.batch_size.min(DEFAULT_BATCH_SIZE)),
            bundle_elements: 0,
            needs_rollback: false,
            state: WorkerState::Ready,
            stats: WriteStats::default(),
        })
    }
}

impl<T: Sync + 'static> WriteConnector<T> {
    /// Write `bundles` with one worker, one bundle after the other.
    ///
    /// Stops at the first failing bundle; the worker is torn down either way.
    pub async fn write_bundles(&self, bundles: &[Vec<T>]) -> Result<WriteStats> {
        let mut worker = self.setup().await?;

        let mut written = Ok(());
        for bundle in bundles {
            written = worker.write_bundle(bundle).await;
            if written.is_err() {
                break;
            }
        }

        let closed = worker.teardown().await;
        written?;
        closed?;
        Ok(worker.stats().clone())
    }
}

/// A worker's write state: connection, prepared statement and pending batch
pub struct WriteWorker<T> {
    conn: Option<Box<dyn Connection>>,
    statement: Option<Box<dyn PreparedStatement>>,
    setter: Arc<dyn ParameterSetter<T>>,
    batch_size: usize,
    params: Parameters,
    pending: Vec<Vec<Value>>,
    bundle_elements: u64,
    needs_rollback: bool,
    state: WorkerState,
    stats: WriteStats,
}

impl<T> WriteWorker<T> {
    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Number of bound elements not yet committed
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Statistics so far
    pub fn stats(&self) -> &WriteStats {
        &self.stats
    }

    /// Begin a bundle.
    ///
    /// Elements left over from a failed bundle are discarded and their
    /// transaction is rolled back, so a retried bundle starts clean.
    pub async fn start_bundle(&mut self) -> Result<()> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| Error::connection("write worker is closed"))?;

        if self.needs_rollback || !self.pending.is_empty() {
            warn!(
                discarded = self.pending.len(),
                "Rolling back leftovers of a failed bundle"
            );
            self.pending.clear();
            conn.rollback().await?;
            self.needs_rollback = false;
            self.stats.rollbacks += 1;
        }

        self.bundle_elements = 0;
        self.state = WorkerState::Ready;
        Ok(())
    }

    /// Bind one element and add it to the pending batch, flushing when the
    /// batch is full.
    pub async fn process(&mut self, element: &T) -> Result<()> {
        if self.state == WorkerState::Closed {
            return Err(Error::connection("write worker is closed"));
        }
        let index = self.bundle_elements;

        self.params.clear();
        let bound = match self.setter.set_parameters(element, &mut self.params) {
            Ok(()) => self.params.to_values(),
            Err(e) => Err(e),
        };
        let values = bound.map_err(|e| Error::parameter_bind(index, e))?;

        self.pending.push(values);
        self.bundle_elements += 1;
        self.stats.elements += 1;
        self.state = WorkerState::Accumulating;
        trace!(element = index, pending = self.pending.len(), "Bound element");

        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Execute and commit the pending batch; no-op when nothing is pending
    pub async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let (Some(conn), Some(statement)) = (&self.conn, &self.statement) else {
            return Err(Error::connection("write worker is closed"));
        };

        self.state = WorkerState::Flushing;
        let count = self.pending.len();
        let start = Instant::now();

        let batch = &self.pending;
        let result = async {
            statement.execute_batch(batch).await?;
            conn.commit().await
        }
        .await;

        self.pending.clear();
        self.state = WorkerState::Ready;
        let elapsed = duration_ms(start.elapsed());
        self.stats.total_flush_time_ms += elapsed;

        match result {
            Ok(()) => {
                self.stats.batches += 1;
                self.stats.commits += 1;
                self.stats.elements_committed += count as u64;
                debug!(elements = count, elapsed_ms = elapsed, "Committed batch");
                Ok(())
            }
            Err(e) => {
                self.needs_rollback = true;
                warn!(elements = count, error = %e, "Batch failed");
                Err(Error::batch_execution(count, e))
            }
        }
    }

    /// End the bundle: flush whatever is pending
    pub async fn finish_bundle(&mut self) -> Result<()> {
        self.flush().await
    }

    /// Run one complete bundle
    pub async fn write_bundle(&mut self, elements: &[T]) -> Result<()> {
        self.start_bundle().await?;
        for element in elements {
            self.process(element).await?;
        }
        self.finish_bundle().await
    }

    /// Close the statement, then the connection.
    ///
    /// Both steps always run; the first failure is returned. Pending elements
    /// are dropped uncommitted. Calling this again is a no-op.
    pub async fn teardown(&mut self) -> Result<()> {
        if self.state == WorkerState::Closed {
            return Ok(());
        }
        self.state = WorkerState::Closed;

        if !self.pending.is_empty() {
            debug!(discarded = self.pending.len(), "Dropping uncommitted elements");
            self.pending.clear();
        }

        let mut first_error = None;
        if let Some(statement) = self.statement.take() {
            if let Err(e) = statement.close().await {
                warn!(error = %e, "Failed to close prepared statement");
                first_error = Some(e);
            }
        }
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close write connection");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        info!(
            elements = self.stats.elements,
            commits = self.stats.commits,
            "Write worker closed"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<T> Drop for WriteWorker<T> {
    fn drop(&mut self) {
        if self.state != WorkerState::Closed {
            warn!("Write worker dropped without teardown");
        }
    }
}
