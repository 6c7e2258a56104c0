//! Tests for rivven-dbio connection configuration and data sources

use rivven_dbio::driver;
use rivven_dbio::prelude::*;
use rivven_dbio::testing::{FailurePoint, MemoryDatabase};

// ==================== Settings ====================

#[test]
fn test_settings_from_json() {
    let settings: ConnectionSettings = serde_json::from_str(
        r#"{
            "driver_class_name": "org.postgresql.Driver",
            "url": "postgres://db:5432/app",
            "username": "app",
            "password": "secret"
        }"#,
    )
    .unwrap();

    let config = ConnectionConfig::from_settings(settings.clone());
    assert_eq!(config.driver_class_name(), Some("org.postgresql.Driver"));
    assert_eq!(config.url(), Some("postgres://db:5432/app"));
    assert_eq!(config.username(), Some("app"));
    assert!(config.validate().is_ok());

    let json = serde_json::to_string(&settings).unwrap();
    assert!(!json.contains("secret"));
    assert!(json.contains("***REDACTED***"));
}

#[test]
fn test_settings_reject_unknown_fields() {
    let result: std::result::Result<ConnectionSettings, _> = serde_json::from_str(
        r#"{"driver_class_name": "d", "url": "u", "max_connections": 4}"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_config_debug_hides_password() {
    let config = ConnectionConfig::new("org.postgresql.Driver", "postgres://app:pw@db/app")
        .with_username("app")
        .with_password("hunter2");

    let debug = format!("{:?}", config);
    assert!(!debug.contains("hunter2"));
    assert!(!debug.contains(":pw@"));
}

// ==================== Display data ====================

#[test]
fn test_display_data_redacts_url_password() {
    let config = ConnectionConfig::new("org.postgresql.Driver", "postgres://app:pw@db:5432/app")
        .with_username("app")
        .with_password("hunter2");

    let mut display = DisplayData::new();
    config.populate_display_data(&mut display);

    assert_eq!(display.get("driver_class_name"), Some("org.postgresql.Driver"));
    assert_eq!(display.get("username"), Some("app"));
    assert!(display.get("password").is_none());

    let url = display.get("url").unwrap();
    assert!(!url.contains("pw"));
    assert!(url.contains("db:5432/app"));
    assert!(!display.to_string().contains("hunter2"));
}

#[test]
fn test_display_data_for_handle() {
    let db = MemoryDatabase::new();
    let mut display = DisplayData::new();
    ConnectionConfig::from_data_source(db.data_source()).populate_display_data(&mut display);

    assert_eq!(display.len(), 1);
    assert_eq!(display.get("data_source"), Some("memory"));
}

// ==================== Acquisition ====================

#[tokio::test]
async fn test_handle_with_credentials() {
    let db = MemoryDatabase::new();
    let config = ConnectionConfig::from_data_source(db.data_source())
        .with_username("alice")
        .with_password("pw");

    let conn = config.acquire().await.unwrap();
    assert!(conn.is_valid().await);
    conn.close().await.unwrap();

    assert_eq!(db.stats().last_username.as_deref(), Some("alice"));
    assert_eq!(db.stats().open_connections, 0);
}

#[tokio::test]
async fn test_driver_registry() {
    let db = MemoryDatabase::new();
    db.register_driver("test.config.MemoryDriver");
    assert!(driver::registered().contains(&"test.config.MemoryDriver".to_string()));

    let config = ConnectionConfig::new("test.config.MemoryDriver", "memory://app");
    let conn = config.acquire().await.unwrap();
    conn.close().await.unwrap();
    assert_eq!(db.stats().connections_opened, 1);

    assert!(driver::deregister("test.config.MemoryDriver"));
    let err = config.acquire().await.err().unwrap();
    assert!(matches!(err, Error::Connection { .. }));
    assert!(err.is_retriable());
    assert_eq!(db.stats().connections_opened, 1);
}

#[tokio::test]
async fn test_driver_acquire_failure_is_connection_error() {
    let db = MemoryDatabase::new();
    db.register_driver("test.config.FailingDriver");
    db.fail_on(FailurePoint::Connect);

    let err = ConnectionConfig::new("test.config.FailingDriver", "memory://app")
        .acquire()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Connection { .. }));
    assert!(err.is_retriable());
}

// ==================== Driver data source ====================

fn driver_source(db: &MemoryDatabase) -> DriverDataSource {
    DriverDataSource::new(
        db.factory(),
        ConnectOptions::new("memory://app").with_connect_timeout(500),
    )
}

#[tokio::test]
async fn test_driver_source_opens_physical_connections() {
    let db = MemoryDatabase::new();
    let ds = driver_source(&db);

    for _ in 0..3 {
        let conn = ds.connection().await.unwrap();
        conn.close().await.unwrap();
    }

    let stats = db.stats();
    assert_eq!(stats.connections_opened, 3);
    assert_eq!(stats.open_connections, 0);
    assert_eq!(ds.options().connect_timeout_ms, 500);
}

#[tokio::test]
async fn test_driver_source_with_credentials() {
    let db = MemoryDatabase::new();
    let ds = driver_source(&db);

    let conn = ds
        .connection_with_credentials("other", Some(&SensitiveString::new("pw")))
        .await
        .unwrap();
    conn.close().await.unwrap();

    assert_eq!(db.stats().last_username.as_deref(), Some("other"));
    assert!(ds.options().username.is_none());
}

#[tokio::test]
async fn test_driver_form_closes_connection_on_release() {
    let db = MemoryDatabase::new();
    db.register_driver("test.config.ReleaseDriver");
    let config = ConnectionConfig::new("test.config.ReleaseDriver", "memory://app");

    let conn = config.acquire().await.unwrap();
    conn.set_auto_commit(false).await.unwrap();
    conn.execute("insert into t (id) values (?)", &[Value::Int64(1)])
        .await
        .unwrap();
    conn.close().await.unwrap();

    assert_eq!(db.committed_count(), 0);
    assert_eq!(db.stats().open_connections, 0);

    let conn = config.acquire().await.unwrap();
    assert!(conn.is_auto_commit());
    conn.close().await.unwrap();
    assert_eq!(db.stats().connections_opened, 2);
    assert!(driver::deregister("test.config.ReleaseDriver"));
}
