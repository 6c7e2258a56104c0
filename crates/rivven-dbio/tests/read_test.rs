//! Tests for rivven-dbio read connector

use async_trait::async_trait;
use bytes::Bytes;
use rivven_dbio::prelude::*;
use rivven_dbio::testing::{FailurePoint, MemoryDatabase};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

const QUERY: &str = "select id, name from Person";

fn person(row: &Row) -> Result<(i64, String)> {
    Ok((row.get_i64(0)?, row.get_string(1)?))
}

fn seeded() -> MemoryDatabase {
    let db = MemoryDatabase::new();
    db.seed_query(
        QUERY,
        vec!["id", "name"],
        vec![
            vec![Value::Int64(1), Value::from("Alice")],
            vec![Value::Int64(2), Value::from("Bob")],
        ],
    );
    db
}

fn people(db: &MemoryDatabase) -> ReadConnector<(i64, String)> {
    ReadConnector::new()
        .with_connection_config(ConnectionConfig::from_data_source(db.data_source()))
        .with_query(QUERY)
        .with_row_mapper(person)
        .with_codec(JsonCodec::<(i64, String)>::new())
}

/// Grouping that counts how many records went through it
#[derive(Default)]
struct CountingGroupByKey {
    records: AtomicUsize,
}

#[async_trait]
impl GroupByKey for CountingGroupByKey {
    async fn group_by_key(&self, records: Vec<(u32, Bytes)>) -> Result<Vec<(u32, Vec<Bytes>)>> {
        self.records.fetch_add(records.len(), Ordering::SeqCst);
        LocalGroupByKey.group_by_key(records).await
    }
}

// ==================== Reading ====================

#[tokio::test]
async fn test_read_maps_every_row() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let db = seeded();
    let records = people(&db).read(&LocalGroupByKey).await.unwrap();

    let records: HashSet<(i64, String)> = records.into_iter().collect();
    let expected: HashSet<(i64, String)> =
        [(1, "Alice".to_string()), (2, "Bob".to_string())].into();
    assert_eq!(records, expected);

    let stats = db.stats();
    assert_eq!(stats.queries, 1);
    assert_eq!(stats.connections_opened, 1);
    assert_eq!(stats.open_connections, 0);
}

#[tokio::test]
async fn test_records_pass_through_grouping() {
    let db = seeded();
    let grouping = CountingGroupByKey::default();

    let mut out: Vec<(i64, String)> = Vec::new();
    let stats = people(&db).read_into(&grouping, &mut out).await.unwrap();

    assert_eq!(grouping.records.load(Ordering::SeqCst), 2);
    assert_eq!(stats.rows_read, 2);
    assert_eq!(stats.queries, 1);
    assert_eq!(out.len(), 2);
}

#[tokio::test]
async fn test_without_fusion_barrier_keeps_cursor_order() {
    let db = seeded();
    let grouping = CountingGroupByKey::default();

    let mut out: Vec<(i64, String)> = Vec::new();
    people(&db)
        .without_fusion_barrier()
        .read_into(&grouping, &mut out)
        .await
        .unwrap();

    assert_eq!(
        out,
        vec![(1, "Alice".to_string()), (2, "Bob".to_string())]
    );
    assert_eq!(grouping.records.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_result() {
    let db = MemoryDatabase::new();
    db.seed_query(QUERY, vec!["id", "name"], vec![]);

    let records = people(&db).read(&LocalGroupByKey).await.unwrap();
    assert!(records.is_empty());
    assert_eq!(db.stats().open_connections, 0);
}

#[tokio::test]
async fn test_read_into_channel() {
    let db = seeded();
    let (mut tx, mut rx) = mpsc::unbounded_channel::<(i64, String)>();

    people(&db).read_into(&LocalGroupByKey, &mut tx).await.unwrap();
    drop(tx);

    let mut received = Vec::new();
    while let Some(record) = rx.recv().await {
        received.push(record);
    }
    received.sort();
    assert_eq!(
        received,
        vec![(1, "Alice".to_string()), (2, "Bob".to_string())]
    );
}

#[tokio::test]
async fn test_each_invocation_runs_the_query_again() {
    let db = seeded();
    let read = people(&db);

    read.read(&LocalGroupByKey).await.unwrap();
    read.read(&LocalGroupByKey).await.unwrap();

    let stats = db.stats();
    assert_eq!(stats.queries, 2);
    assert_eq!(stats.connections_opened, 2);
    assert_eq!(stats.open_connections, 0);
}

#[tokio::test]
async fn test_worker_routes_every_invocation_through_grouping() {
    let db = seeded();
    let grouping = CountingGroupByKey::default();

    let mut worker = people(&db).setup().await.unwrap();
    let mut out: Vec<(i64, String)> = Vec::new();
    assert_eq!(worker.process(&grouping, &mut out).await.unwrap(), 2);
    assert_eq!(worker.process(&grouping, &mut out).await.unwrap(), 2);

    assert_eq!(grouping.records.load(Ordering::SeqCst), 4);
    assert_eq!(out.len(), 4);
    assert_eq!(worker.stats().queries, 2);

    let stats = db.stats();
    assert_eq!(stats.connections_opened, 1);
    assert_eq!(stats.queries, 2);

    worker.teardown().await.unwrap();
    assert_eq!(db.stats().open_connections, 0);
}

#[tokio::test]
async fn test_worker_without_barrier_skips_grouping() {
    let db = seeded();
    let grouping = CountingGroupByKey::default();

    let mut worker = people(&db).without_fusion_barrier().setup().await.unwrap();
    let mut out: Vec<(i64, String)> = Vec::new();
    worker.process(&grouping, &mut out).await.unwrap();
    worker.teardown().await.unwrap();

    assert_eq!(grouping.records.load(Ordering::SeqCst), 0);
    assert_eq!(
        out,
        vec![(1, "Alice".to_string()), (2, "Bob".to_string())]
    );
}

// ==================== Failures ====================

#[tokio::test]
async fn test_missing_fields_fail_before_connecting() {
    let db = seeded();
    let config = ConnectionConfig::from_data_source(db.data_source());

    let cases: Vec<(ReadConnector<(i64, String)>, &str)> = vec![
        (
            ReadConnector::new()
                .with_connection_config(config.clone())
                .with_row_mapper(person)
                .with_codec(JsonCodec::<(i64, String)>::new()),
            "query",
        ),
        (
            ReadConnector::new()
                .with_connection_config(config.clone())
                .with_query(QUERY)
                .with_codec(JsonCodec::<(i64, String)>::new()),
            "row mapper",
        ),
        (
            ReadConnector::new()
                .with_connection_config(config.clone())
                .with_query(QUERY)
                .with_row_mapper(person),
            "codec",
        ),
        (
            ReadConnector::new()
                .with_query(QUERY)
                .with_row_mapper(person)
                .with_codec(JsonCodec::<(i64, String)>::new()),
            "connection configuration",
        ),
    ];

    for (read, field) in cases {
        let err = read.read(&LocalGroupByKey).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }), "{}", field);
        assert!(err.to_string().contains(field), "{}", err);
    }
    assert_eq!(db.stats().connections_opened, 0);
}

#[tokio::test]
async fn test_connect_failure_is_retriable() {
    let db = seeded();
    db.fail_on(FailurePoint::Connect);

    let err = people(&db).read(&LocalGroupByKey).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_query_failure_still_releases_connection() {
    let db = seeded();
    db.fail_on(FailurePoint::Query);

    let err = people(&db).read(&LocalGroupByKey).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Query);

    let stats = db.stats();
    assert_eq!(stats.connections_opened, 1);
    assert_eq!(stats.open_connections, 0);
}

#[tokio::test]
async fn test_mapper_failure_reports_row() {
    let db = MemoryDatabase::new();
    db.seed_query(
        QUERY,
        vec!["id", "name"],
        vec![
            vec![Value::Int64(1), Value::from("Alice")],
            vec![Value::Int64(2), Value::Null],
        ],
    );

    let err = people(&db).read(&LocalGroupByKey).await.unwrap_err();
    assert!(matches!(err, Error::RowMapping { row: 1, .. }));
    assert_eq!(db.stats().open_connections, 0);
}

#[tokio::test]
async fn test_close_failure_is_reported_after_scan() {
    let db = seeded();
    db.fail_on(FailurePoint::ConnectionClose);

    assert!(people(&db).read(&LocalGroupByKey).await.is_err());
    assert_eq!(db.stats().open_connections, 0);
}

// ==================== Configuration ====================

#[tokio::test]
async fn test_driver_form() {
    let db = seeded();
    db.register_driver("test.read.MemoryDriver");

    let config = ConnectionConfig::new("test.read.MemoryDriver", "memory://people")
        .with_username("reader")
        .with_password("s3cret");
    let read = people(&db).with_connection_config(config);

    let display = read.display_data().to_string();
    assert!(!display.contains("s3cret"));
    assert!(display.contains("reader"));

    let records = read.read(&LocalGroupByKey).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(db.stats().last_username.as_deref(), Some("reader"));
    assert_eq!(db.stats().open_connections, 0);
}

#[tokio::test]
async fn test_unknown_driver_is_connection_error() {
    let read = people(&seeded()).with_connection_config(ConnectionConfig::new(
        "com.example.NoSuchDriver",
        "nosuch://localhost",
    ));

    let err = read.read(&LocalGroupByKey).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
    assert!(err.is_retriable());
}

#[test]
fn test_display_data() {
    let db = seeded();
    let display = people(&db).display_data();

    assert_eq!(display.get("query"), Some(QUERY));
    assert_eq!(display.get("codec"), Some("JsonCodec"));
    assert_eq!(display.get("fusion_barrier"), Some("true"));
    assert_eq!(display.get("data_source"), Some("memory"));
    assert!(display.get("row_mapper").is_some());
}
