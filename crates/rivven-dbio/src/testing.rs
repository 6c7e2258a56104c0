//! In-memory database driver for tests
//!
//! `MemoryDatabase` answers seeded queries, keeps statements written with
//! auto-commit off in a per-connection transaction until `commit`, counts
//! every driver call and can be told to fail at a given point. It is both a
//! [`DataSource`] and a [`ConnectionFactory`], so it plugs into either form of
//! `ConnectionConfig`.
//!
//! Placeholders are `?`; executing with a different number of parameters than
//! the statement has placeholders is a query error.
//!
//! ```rust
//! use rivven_dbio::testing::MemoryDatabase;
//! use rivven_dbio::types::Value;
//!
//! let db = MemoryDatabase::new();
//! db.seed_query(
//!     "select id, name from Person",
//!     vec!["id", "name"],
//!     vec![vec![Value::Int64(1), Value::from("Alice")]],
//! );
//! assert_eq!(db.stats().open_connections, 0);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SensitiveString;
use crate::connection::{
    ConnectOptions, Connection, ConnectionFactory, PreparedStatement, RowStream, VecRowStream,
};
use crate::datasource::DataSource;
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Driver call that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// Opening a connection
    Connect,
    /// Preparing a statement
    Prepare,
    /// Running a query
    Query,
    /// Executing a statement or a batch
    Execute,
    /// Committing
    Commit,
    /// Closing a prepared statement
    StatementClose,
    /// Closing a connection
    ConnectionClose,
}

/// Call counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Connections ever opened
    pub connections_opened: u64,
    /// Connections currently open
    pub open_connections: u64,
    /// Queries run
    pub queries: u64,
    /// Statements prepared
    pub statements_prepared: u64,
    /// Prepared statements closed
    pub statements_closed: u64,
    /// Batch executions
    pub batch_executions: u64,
    /// Individual statement executions (including those inside batches)
    pub statements_executed: u64,
    /// Commits that committed something or nothing
    pub commits: u64,
    /// Rollbacks
    pub rollbacks: u64,
    /// User of the most recent connection opened with credentials
    pub last_username: Option<String>,
}

#[derive(Default)]
struct State {
    results: HashMap<String, (Vec<String>, Vec<Vec<Value>>)>,
    committed: HashMap<String, Vec<Vec<Value>>>,
    failures: HashSet<FailurePoint>,
    stats: MemoryStats,
}

/// Shared in-memory database; clones refer to the same data
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn placeholders(sql: &str) -> usize {
    sql.matches('?').count()
}

impl MemoryDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// This database as a data source handle
    pub fn data_source(&self) -> Arc<dyn DataSource> {
        Arc::new(self.clone())
    }

    /// This database as a driver factory
    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(self.clone())
    }

    /// Register this database in the process-wide driver registry
    pub fn register_driver(&self, name: impl Into<String>) {
        crate::driver::register(name, self.factory());
    }

    /// Make `sql` return `rows` (whitespace-insensitive match)
    pub fn seed_query(&self, sql: &str, columns: Vec<&str>, rows: Vec<Vec<Value>>) {
        let columns = columns.into_iter().map(String::from).collect();
        self.state
            .lock()
            .results
            .insert(normalize(sql), (columns, rows));
    }

    /// Make every subsequent call at `point` fail
    pub fn fail_on(&self, point: FailurePoint) {
        self.state.lock().failures.insert(point);
    }

    /// Stop failing at `point`
    pub fn clear_failure(&self, point: FailurePoint) {
        self.state.lock().failures.remove(&point);
    }

    /// Committed parameter sets written with `sql`
    pub fn committed_rows(&self, sql: &str) -> Vec<Vec<Value>> {
        self.state
            .lock()
            .committed
            .get(&normalize(sql))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of committed parameter sets across all statements
    pub fn committed_count(&self) -> usize {
        self.state.lock().committed.values().map(Vec::len).sum()
    }

    /// Snapshot of the call counters
    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats.clone()
    }

    fn check(&self, point: FailurePoint) -> Result<()> {
        if self.state.lock().failures.contains(&point) {
            let message = format!("injected failure at {:?}", point);
            return Err(match point {
                FailurePoint::Connect => Error::connection(message),
                _ => Error::query(message),
            });
        }
        Ok(())
    }

    fn open(&self, username: Option<&str>) -> Result<Box<dyn Connection>> {
        self.check(FailurePoint::Connect)?;
        let mut state = self.state.lock();
        state.stats.connections_opened += 1;
        state.stats.open_connections += 1;
        if let Some(username) = username {
            state.stats.last_username = Some(username.to_string());
        }
        Ok(Box::new(MemoryConnection {
            db: self.clone(),
            session: Arc::new(Session::default()),
        }))
    }

    fn write(&self, session: &Session, sql: &str, params: &[Value]) -> Result<u64> {
        let expected = placeholders(sql);
        if expected != params.len() {
            return Err(Error::query_with_sql(
                format!("expected {} parameters, got {}", expected, params.len()),
                sql,
            ));
        }
        self.state.lock().stats.statements_executed += 1;

        let entry = (normalize(sql), params.to_vec());
        if session.auto_commit.load(Ordering::Acquire) {
            let mut state = self.state.lock();
            state.committed.entry(entry.0).or_default().push(entry.1);
        } else {
            session.staged.lock().push(entry);
        }
        Ok(1)
    }
}

#[async_trait]
impl DataSource for MemoryDatabase {
    async fn connection(&self) -> Result<Box<dyn Connection>> {
        self.open(None)
    }

    async fn connection_with_credentials(
        &self,
        username: &str,
        _password: Option<&SensitiveString>,
    ) -> Result<Box<dyn Connection>> {
        self.open(Some(username))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl ConnectionFactory for MemoryDatabase {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>> {
        self.open(options.username.as_deref())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct Session {
    auto_commit: AtomicBool,
    closed: AtomicBool,
    staged: Mutex<Vec<(String, Vec<Value>)>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            auto_commit: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            staged: Mutex::new(Vec::new()),
        }
    }
}

impl Session {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

struct MemoryConnection {
    db: MemoryDatabase,
    session: Arc<Session>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        self.session.ensure_open()?;
        self.db.check(FailurePoint::Query)?;
        if placeholders(sql) != params.len() {
            return Err(Error::query_with_sql("parameter count mismatch", sql));
        }

        let mut state = self.db.state.lock();
        state.stats.queries += 1;
        let (columns, rows) = state
            .results
            .get(&normalize(sql))
            .cloned()
            .ok_or_else(|| Error::query_with_sql("no result seeded for query", sql))?;

        let rows = rows
            .into_iter()
            .map(|values| Row::new(columns.clone(), values))
            .collect();
        Ok(Box::new(VecRowStream::new(rows)))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.session.ensure_open()?;
        self.db.check(FailurePoint::Execute)?;
        self.db.write(&self.session, sql, params)
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.session.ensure_open()?;
        self.db.check(FailurePoint::Prepare)?;
        self.db.state.lock().stats.statements_prepared += 1;
        Ok(Box::new(MemoryStatement {
            db: self.db.clone(),
            session: Arc::clone(&self.session),
            sql: sql.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.session.ensure_open()?;
        if auto_commit && !self.session.auto_commit.load(Ordering::Acquire) {
            self.commit().await?;
        }
        self.session.auto_commit.store(auto_commit, Ordering::Release);
        Ok(())
    }

    fn is_auto_commit(&self) -> bool {
        self.session.auto_commit.load(Ordering::Acquire)
    }

    async fn commit(&self) -> Result<()> {
        self.session.ensure_open()?;
        self.db.check(FailurePoint::Commit)?;
        let staged = std::mem::take(&mut *self.session.staged.lock());
        let mut state = self.db.state.lock();
        state.stats.commits += 1;
        for (sql, params) in staged {
            state.committed.entry(sql).or_default().push(params);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.session.ensure_open()?;
        self.session.staged.lock().clear();
        self.db.state.lock().stats.rollbacks += 1;
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        !self.session.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if self.session.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.session.staged.lock().clear();
        self.db.state.lock().stats.open_connections -= 1;
        self.db.check(FailurePoint::ConnectionClose)
    }
}

struct MemoryStatement {
    db: MemoryDatabase,
    session: Arc<Session>,
    sql: String,
    closed: AtomicBool,
}

impl MemoryStatement {
    fn ensure_open(&self) -> Result<()> {
        self.session.ensure_open()?;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::query_with_sql("statement is closed", &self.sql));
        }
        Ok(())
    }
}

#[async_trait]
impl PreparedStatement for MemoryStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn execute(&self, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        self.db.check(FailurePoint::Execute)?;
        self.db.write(&self.session, &self.sql, params)
    }

    async fn execute_batch(&self, batch: &[Vec<Value>]) -> Result<Vec<u64>> {
        self.ensure_open()?;
        self.db.state.lock().stats.batch_executions += 1;
        self.db.check(FailurePoint::Execute)?;
        batch
            .iter()
            .map(|params| self.db.write(&self.session, &self.sql, params))
            .collect()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.db.state.lock().stats.statements_closed += 1;
        self.db.check(FailurePoint::StatementClose)
    }
}
