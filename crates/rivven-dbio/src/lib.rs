//! # rivven-dbio
//!
//! Relational database connectors for Rivven batch pipelines.
//!
//! The crate reads rows from a SQL source into typed records and writes typed
//! records back as batched, committed statements. Workers own their
//! connection and prepared statement for their whole lifetime; setup and
//! teardown are explicit calls so release happens on every exit path.
//!
//! ## Features
//!
//! - **Read connector**: one query per invocation, rows mapped by a user
//!   [`RowMapper`](read::RowMapper), followed by a fusion barrier that keeps
//!   downstream stages parallelizable
//! - **Write connector**: per-element parameter binding, flush and commit every
//!   `batch_size` elements (1000 by default) and at bundle end
//! - **Connection configuration**: a shared data source handle or a registered
//!   driver plus URL, resolved on the worker
//! - **Codecs**: nested/outer aware binary codecs and the element/restriction
//!   [`PairCodec`](pair::PairCodec)
//! - **Testing**: an in-memory driver with call counters and failure injection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_dbio::prelude::*;
//!
//! let config = ConnectionConfig::new("org.postgresql.Driver", "postgres://localhost/db")
//!     .with_username("app")
//!     .with_password("secret");
//!
//! // Read
//! let people: Vec<(i64, String)> = ReadConnector::new()
//!     .with_connection_config(config.clone())
//!     .with_query("select id, name from Person")
//!     .with_row_mapper(|row: &Row| Ok((row.get_i64(0)?, row.get_string(1)?)))
//!     .with_codec(JsonCodec::new())
//!     .read(&LocalGroupByKey)
//!     .await?;
//!
//! // Write
//! let stats = WriteConnector::new()
//!     .with_connection_config(config)
//!     .with_statement("insert into Person (id, name) values ($1, $2) on conflict do nothing")
//!     .with_parameter_setter(|p: &(i64, String), params: &mut Parameters| {
//!         params.set(1, p.0)?;
//!         params.set(2, p.1.as_str())
//!     })
//!     .write_bundles(&[people])
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL driver via tokio-postgres

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod connection;
pub mod datasource;
pub mod driver;
pub mod error;
pub mod metadata;
pub mod pair;
pub mod read;
pub mod reshuffle;
pub mod testing;
pub mod types;
pub mod write;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorCategory, Result};

    pub use crate::types::{Row, Value};

    pub use crate::connection::{
        ConnectOptions, Connection, ConnectionFactory, Parameters, PreparedStatement, RowStream,
    };

    pub use crate::config::{ConnectionConfig, ConnectionSettings, SensitiveString};
    pub use crate::datasource::{DataSource, DriverDataSource};
    pub use crate::metadata::DisplayData;

    pub use crate::codec::{
        BytesCodec, Codec, Context, I64Codec, JsonCodec, StringCodec, VarU64Codec,
    };
    pub use crate::pair::{PairCodec, RestrictionPair};

    pub use crate::read::{ReadConnector, ReadStats, ReadWorker, RowMapper};
    pub use crate::reshuffle::{Emitter, FusionBarrier, GroupByKey, LocalGroupByKey};
    pub use crate::write::{
        ParameterSetter, WorkerState, WriteConnector, WriteStats, WriteWorker, DEFAULT_BATCH_SIZE,
    };
}

pub use error::{Error, Result};
pub use types::Value;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = ConnectionConfig::new("org.postgresql.Driver", "postgres://localhost/test");
        let _options = ConnectOptions::new("memory://test");
        let _read = ReadConnector::<String>::new().with_codec(StringCodec);
        assert_eq!(DEFAULT_BATCH_SIZE, 1000);
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_value_types() {
        let v = Value::from(42_i32);
        assert!(!v.is_null());
        assert_eq!(v.as_i64(), Some(42));

        let v = Value::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
    }
}
