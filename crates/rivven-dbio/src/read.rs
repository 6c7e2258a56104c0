//! Bounded database reads
//!
//! A [`ReadConnector`] holds the immutable description of a read: the query,
//! the row mapper, the codec used to move records across the fusion barrier
//! and the [`ConnectionConfig`]. Each worker calls [`ReadConnector::setup`]
//! once, which acquires its connection, seeds the worker's fusion barrier and
//! returns a [`ReadWorker`]. The worker runs the query on every `process` call,
//! routes the mapped rows through the barrier, and must be torn down on every
//! exit path; [`ReadConnector::read_into`] does all of this for a single
//! invocation.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_dbio::prelude::*;
//!
//! let people: Vec<(i64, String)> = ReadConnector::new()
//!     .with_connection_config(config)
//!     .with_query("select id, name from Person")
//!     .with_row_mapper(|row: &Row| Ok((row.get_i64(0)?, row.get_string(1)?)))
//!     .with_codec(JsonCodec::new())
//!     .read(&LocalGroupByKey)
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::codec::Codec;
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::metadata::{duration_ms, DisplayData};
use crate::reshuffle::{Emitter, FusionBarrier, GroupByKey};
use crate::types::Row;

/// Maps one result row to a record
pub trait RowMapper<T>: Send + Sync {
    /// Map the current row
    fn map_row(&self, row: &Row) -> Result<T>;

    /// Name used in display data
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

impl<T, F> RowMapper<T> for F
where
    F: Fn(&Row) -> Result<T> + Send + Sync,
{
    fn map_row(&self, row: &Row) -> Result<T> {
        self(row)
    }
}

/// Read statistics of one worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Queries executed
    pub queries: u64,
    /// Rows mapped and emitted
    pub rows_read: u64,
    /// Total time spent in queries (milliseconds)
    pub total_query_time_ms: u64,
}

/// Description of a bounded read
pub struct ReadConnector<T> {
    connection_config: Option<ConnectionConfig>,
    query: Option<String>,
    row_mapper: Option<Arc<dyn RowMapper<T>>>,
    codec: Option<Arc<dyn Codec<T>>>,
    fusion_barrier: bool,
}

impl<T> Clone for ReadConnector<T> {
    fn clone(&self) -> Self {
        Self {
            connection_config: self.connection_config.clone(),
            query: self.query.clone(),
            row_mapper: self.row_mapper.clone(),
            codec: self.codec.clone(),
            fusion_barrier: self.fusion_barrier,
        }
    }
}

impl<T> std::fmt::Debug for ReadConnector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadConnector")
            .field("connection_config", &self.connection_config)
            .field("query", &self.query)
            .field("fusion_barrier", &self.fusion_barrier)
            .finish_non_exhaustive()
    }
}

impl<T> Default for ReadConnector<T> {
    fn default() -> Self {
        Self {
            connection_config: None,
            query: None,
            row_mapper: None,
            codec: None,
            fusion_barrier: true,
        }
    }
}

impl<T: Send + 'static> ReadConnector<T> {
    /// Create an empty read description
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how connections are obtained
    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection_config = Some(config);
        self
    }

    /// Set the query executed on every invocation
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the row mapper
    pub fn with_row_mapper(mut self, mapper: impl RowMapper<T> + 'static) -> Self {
        self.row_mapper = Some(Arc::new(mapper));
        self
    }

    /// Set the codec for produced records
    pub fn with_codec(mut self, codec: impl Codec<T> + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Emit mapped rows directly, for engines that never fuse stages
    pub fn without_fusion_barrier(mut self) -> Self {
        self.fusion_barrier = false;
        self
    }

    /// Configured query
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Check that every required field is set. Never touches the database.
    pub fn validate(&self) -> Result<()> {
        match &self.query {
            None => return Err(Error::config("read: query is required")),
            Some(query) if query.trim().is_empty() => {
                return Err(Error::config("read: query must not be empty"))
            }
            Some(_) => {}
        }
        if self.row_mapper.is_none() {
            return Err(Error::config("read: row mapper is required"));
        }
        if self.codec.is_none() {
            return Err(Error::config("read: codec is required"));
        }
        match &self.connection_config {
            None => Err(Error::config("read: connection configuration is required")),
            Some(config) => config.validate(),
        }
    }

    /// Diagnostic description; never includes the password
    pub fn display_data(&self) -> DisplayData {
        let mut display = DisplayData::new();
        display
            .add_if_some("query", self.query.as_deref())
            .add_if_some("row_mapper", self.row_mapper.as_ref().map(|m| m.name()))
            .add_if_some("codec", self.codec.as_ref().map(|c| c.name()))
            .add("fusion_barrier", self.fusion_barrier);
        if let Some(config) = &self.connection_config {
            config.populate_display_data(&mut display);
        }
        display
    }

    /// Worker setup: validate, acquire the worker's connection and create its
    /// fusion barrier
    pub async fn setup(&self) -> Result<ReadWorker<T>> {
        self.validate()?;
        let (Some(config), Some(query), Some(row_mapper)) =
            (&self.connection_config, &self.query, &self.row_mapper)
        else {
            return Err(Error::config("read: incomplete configuration"));
        };

        let conn = config.acquire().await?;
        let barrier = match (&self.codec, self.fusion_barrier) {
            (Some(codec), true) => Some(FusionBarrier::new(Arc::clone(codec))),
            _ => None,
        };
        info!(
            query = %query,
            fusion_barrier = barrier.is_some(),
            "Read worker ready"
        );

        Ok(ReadWorker {
            conn: Some(conn),
            query: query.clone(),
            row_mapper: Arc::clone(row_mapper),
            barrier,
            stats: ReadStats::default(),
        })
    }

    /// Run one invocation with a fresh worker and emit the records into `out`.
    ///
    /// The worker is torn down whether or not the scan succeeds; a scan error
    /// takes precedence over a close error.
    pub async fn read_into(
        &self,
        grouping: &dyn GroupByKey,
        out: &mut dyn Emitter<T>,
    ) -> Result<ReadStats> {
        let mut worker = self.setup().await?;
        let processed = worker.process(grouping, out).await;
        let closed = worker.teardown().await;

        processed?;
        closed?;
        Ok(worker.stats().clone())
    }

    /// Run one invocation and collect the records
    pub async fn read(&self, grouping: &dyn GroupByKey) -> Result<Vec<T>> {
        let mut records = Vec::new();
        self.read_into(grouping, &mut records).await?;
        Ok(records)
    }
}

/// A worker's read state: its connection, the mapping setup and the fusion
/// barrier every invocation goes through
pub struct ReadWorker<T> {
    conn: Option<Box<dyn Connection>>,
    query: String,
    row_mapper: Arc<dyn RowMapper<T>>,
    barrier: Option<FusionBarrier<T>>,
    stats: ReadStats,
}

impl<T: Send + 'static> ReadWorker<T> {
    /// Execute the query once and emit every mapped row into `out`, through
    /// the fusion barrier when the worker has one.
    ///
    /// A mapper failure stops the scan. Without a barrier rows already
    /// emitted stay emitted; with one, nothing from this call is emitted.
    /// Returns the number of records emitted.
    pub async fn process(
        &mut self,
        grouping: &dyn GroupByKey,
        out: &mut dyn Emitter<T>,
    ) -> Result<u64> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| Error::connection("read worker is closed"))?;

        let start = Instant::now();
        let mut rows = conn.query_stream(&self.query, &[]).await?;
        self.stats.queries += 1;

        let row_mapper = &self.row_mapper;
        let target: &mut dyn Emitter<T> = match self.barrier.as_mut() {
            Some(barrier) => barrier,
            None => &mut *out,
        };

        let mut index = 0u64;
        let scan = async {
            while let Some(row) = rows.next().await? {
                let record = row_mapper
                    .map_row(&row)
                    .map_err(|e| Error::row_mapping(index, e))?;
                target.emit(record)?;
                trace!(row = index, "Emitted row");
                index += 1;
            }
            Ok::<_, Error>(())
        }
        .await;

        let elapsed = duration_ms(start.elapsed());
        self.stats.rows_read += index;
        self.stats.total_query_time_ms += elapsed;
        debug!(rows = index, elapsed_ms = elapsed, "Query finished");

        match (scan, self.barrier.as_mut()) {
            (Ok(()), Some(barrier)) => barrier.flush(grouping, out).await,
            (Ok(()), None) => Ok(index),
            (Err(e), barrier) => {
                if let Some(barrier) = barrier {
                    barrier.clear();
                }
                Err(e)
            }
        }
    }

    /// Statistics so far
    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }

    /// Whether teardown has run
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Release the connection. Safe to call more than once.
    pub async fn teardown(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let result = conn.close().await;
        match &result {
            Ok(()) => info!(
                queries = self.stats.queries,
                rows = self.stats.rows_read,
                "Read worker closed"
            ),
            Err(e) => warn!(error = %e, "Failed to close read connection"),
        }
        result
    }
}

impl<T> Drop for ReadWorker<T> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!("Read worker dropped without teardown");
        }
    }
}
