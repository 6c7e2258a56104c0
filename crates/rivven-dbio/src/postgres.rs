//! PostgreSQL driver
//!
//! Connections are tokio-postgres clients. Auto-commit is emulated the way a
//! JDBC driver does it: with auto-commit off, the first statement opens a
//! transaction (`BEGIN`) that stays open until `commit`/`rollback`.
//!
//! Registered under [`DRIVER_NAMES`] in the driver registry.

use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use futures::StreamExt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tracing::{debug, warn};

use crate::connection::{ConnectOptions, Connection, ConnectionFactory, PreparedStatement, RowStream};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Names the PostgreSQL driver is registered under
pub const DRIVER_NAMES: [&str; 3] = ["org.postgresql.Driver", "postgres", "postgresql"];

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Convert a Value to a tokio-postgres compatible parameter
fn value_to_sql(value: &Value) -> SqlParam {
    match value {
        Value::Null => Box::new(Option::<i32>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
    }
}

fn param_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn query_error(sql: &str, e: tokio_postgres::Error) -> Error {
    Error::Query {
        message: e.to_string(),
        sql: Some(sql.to_string()),
        source: Some(Box::new(e)),
    }
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

fn get<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Convert a PostgreSQL value to a Value; NULL and unreadable values map to `Value::Null`
fn pg_value_to_value(
    row: &tokio_postgres::Row,
    idx: usize,
    pg_type: &tokio_postgres::types::Type,
) -> Value {
    use tokio_postgres::types::Type;

    let value = match *pg_type {
        Type::BOOL => get(row, idx).map(Value::Bool),
        Type::INT2 => get(row, idx).map(Value::Int16),
        Type::INT4 => get(row, idx).map(Value::Int32),
        Type::INT8 => get(row, idx).map(Value::Int64),
        Type::FLOAT4 => get(row, idx).map(Value::Float32),
        Type::FLOAT8 => get(row, idx).map(Value::Float64),
        Type::NUMERIC => get(row, idx).map(Value::Decimal),
        Type::BYTEA => get(row, idx).map(Value::Bytes),
        Type::DATE => get(row, idx).map(Value::Date),
        Type::TIME => get(row, idx).map(Value::Time),
        Type::TIMESTAMP => get(row, idx).map(Value::DateTime),
        Type::TIMESTAMPTZ => get(row, idx).map(Value::DateTimeTz),
        Type::UUID => get(row, idx).map(Value::Uuid),
        Type::JSON | Type::JSONB => get(row, idx).map(Value::Json),
        // text-like and unknown types
        _ => get(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

/// Client plus transaction flags, shared by a connection and its statements
struct PgSession {
    client: tokio_postgres::Client,
    auto_commit: AtomicBool,
    in_transaction: AtomicBool,
    closed: AtomicBool,
}

impl PgSession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }

    /// Open a transaction before the first statement when auto-commit is off
    async fn begin_if_needed(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.auto_commit.load(Ordering::Acquire)
            && !self.in_transaction.swap(true, Ordering::AcqRel)
        {
            if let Err(e) = self.client.batch_execute("BEGIN").await {
                self.in_transaction.store(false, Ordering::Release);
                return Err(query_error("BEGIN", e));
            }
        }
        Ok(())
    }

    async fn end_transaction(&self, sql: &str) -> Result<()> {
        self.ensure_open()?;
        if self.in_transaction.swap(false, Ordering::AcqRel) {
            self.client
                .batch_execute(sql)
                .await
                .map_err(|e| query_error(sql, e))?;
        }
        Ok(())
    }
}

/// PostgreSQL connection
pub struct PgConnection {
    session: Arc<PgSession>,
}

impl PgConnection {
    /// Wrap a connected tokio-postgres client (auto-commit on)
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            session: Arc::new(PgSession {
                client,
                auto_commit: AtomicBool::new(true),
                in_transaction: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.session.client
    }

    /// Whether a transaction is currently open
    pub fn in_transaction(&self) -> bool {
        self.session.in_transaction.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        self.session.begin_if_needed().await?;

        let boxed: Vec<SqlParam> = params.iter().map(value_to_sql).collect();
        let stream = self
            .session
            .client
            .query_raw(sql, param_refs(&boxed))
            .await
            .map_err(|e| query_error(sql, e))?;

        Ok(Box::new(PgRowStream {
            inner: Box::pin(stream),
            sql: sql.to_string(),
        }))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.session.begin_if_needed().await?;

        let boxed: Vec<SqlParam> = params.iter().map(value_to_sql).collect();
        self.session
            .client
            .execute(sql, &param_refs(&boxed))
            .await
            .map_err(|e| query_error(sql, e))
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.session.ensure_open()?;

        let statement = self
            .session
            .client
            .prepare(sql)
            .await
            .map_err(|e| query_error(sql, e))?;

        Ok(Box::new(PgPreparedStatement {
            session: Arc::clone(&self.session),
            statement,
            sql: sql.to_string(),
        }))
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.session.ensure_open()?;
        // Switching auto-commit on commits the open transaction.
        if auto_commit {
            self.session.end_transaction("COMMIT").await?;
        }
        self.session.auto_commit.store(auto_commit, Ordering::Release);
        Ok(())
    }

    fn is_auto_commit(&self) -> bool {
        self.session.auto_commit.load(Ordering::Acquire)
    }

    async fn commit(&self) -> Result<()> {
        self.session.end_transaction("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.session.end_transaction("ROLLBACK").await
    }

    async fn is_valid(&self) -> bool {
        if self.session.closed.load(Ordering::Acquire) || self.session.client.is_closed() {
            return false;
        }
        self.session.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        if self.session.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.session.in_transaction.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.session.client.batch_execute("ROLLBACK").await {
                debug!(error = %e, "Rollback on close failed");
            }
        }
        Ok(())
    }
}

/// Forward-only cursor over a tokio-postgres row stream
struct PgRowStream {
    inner: Pin<Box<tokio_postgres::RowStream>>,
    sql: String,
}

impl RowStream for PgRowStream {
    fn next(&mut self) -> BoxFuture<'_, Result<Option<Row>>> {
        Box::pin(async move {
            match self.inner.next().await {
                Some(Ok(row)) => Ok(Some(pg_row_to_row(&row))),
                Some(Err(e)) => Err(query_error(&self.sql, e)),
                None => Ok(None),
            }
        })
    }
}

/// PostgreSQL prepared statement
pub struct PgPreparedStatement {
    session: Arc<PgSession>,
    statement: tokio_postgres::Statement,
    sql: String,
}

#[async_trait]
impl PreparedStatement for PgPreparedStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn execute(&self, params: &[Value]) -> Result<u64> {
        self.session.begin_if_needed().await?;

        let boxed: Vec<SqlParam> = params.iter().map(value_to_sql).collect();
        self.session
            .client
            .execute(&self.statement, &param_refs(&boxed))
            .await
            .map_err(|e| query_error(&self.sql, e))
    }

    /// Pipelines the whole batch over the connection
    async fn execute_batch(&self, batch: &[Vec<Value>]) -> Result<Vec<u64>> {
        self.session.begin_if_needed().await?;

        let boxed: Vec<Vec<SqlParam>> = batch
            .iter()
            .map(|params| params.iter().map(value_to_sql).collect())
            .collect();
        let client = &self.session.client;
        let statement = &self.statement;

        try_join_all(
            boxed
                .iter()
                .map(|params| async move { client.execute(statement, &param_refs(params)).await }),
        )
        .await
        .map_err(|e| query_error(&self.sql, e))
    }

    async fn close(&self) -> Result<()> {
        // Server-side statements are deallocated when the last handle drops.
        Ok(())
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Connection>> {
        let mut config: tokio_postgres::Config = options
            .url
            .parse()
            .map_err(|e| Error::connection_with_source("invalid PostgreSQL url", e))?;

        if let Some(username) = &options.username {
            config.user(username);
        }
        if let Some(password) = &options.password {
            config.password(password.expose_secret());
        }
        if let Some(name) = &options.application_name {
            config.application_name(name);
        }
        config.connect_timeout(Duration::from_millis(options.connect_timeout_ms));

        let (client, connection) = config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
