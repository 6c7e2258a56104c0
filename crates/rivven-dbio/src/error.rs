//! Error types for rivven-dbio
//!
//! Errors are classified by the lifecycle step that produced them so the host
//! engine can decide what to retry:
//! - Configuration errors fail pipeline construction
//! - Connection errors fail worker setup (retriable)
//! - Row mapping, parameter binding and batch execution errors fail the
//!   current invocation or bundle
//! - Encode/decode errors fail the codec call

use std::fmt;
use thiserror::Error;

/// Result type for rivven-dbio operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or invalid configuration
    Configuration,
    /// Connection acquisition (retriable)
    Connection,
    /// Query execution
    Query,
    /// Row mapper failure during a read
    RowMapping,
    /// Parameter setter failure during a write
    ParameterBind,
    /// Batch execution or commit failure
    BatchExecution,
    /// Value conversion
    TypeConversion,
    /// Encoding or decoding of values
    Codec,
    /// Handing records to the downstream consumer
    Emit,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection)
    }
}

/// Main error type for rivven-dbio
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Required configuration missing or invalid
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Data source or connection acquisition failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Row mapper failed; the scan was aborted at this row
    #[error("row mapping failed at row {row}: {message}")]
    RowMapping {
        row: u64,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Parameter setter failed for an element of the current bundle
    #[error("parameter binding failed for element {element}: {message}")]
    ParameterBind {
        element: u64,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Batch execution or commit failed
    #[error("batch execution failed ({pending} pending statements): {message}")]
    BatchExecution {
        pending: usize,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Value conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Encoding a value failed
    #[error("encode error: {message}")]
    Encode { message: String },

    /// Decoding a value failed (malformed or truncated input)
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Downstream consumer stopped accepting records
    #[error("emit error: {message}")]
    Emit { message: String },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::RowMapping { .. } => ErrorCategory::RowMapping,
            Self::ParameterBind { .. } => ErrorCategory::ParameterBind,
            Self::BatchExecution { .. } => ErrorCategory::BatchExecution,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Encode { .. } | Self::Decode { .. } => ErrorCategory::Codec,
            Self::Emit { .. } => ErrorCategory::Emit,
            Self::Unsupported { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Wrap a row mapper failure for the given (zero-based) row
    pub fn row_mapping(row: u64, source: Error) -> Self {
        Self::RowMapping {
            row,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a parameter setter failure for the given (zero-based) bundle element
    pub fn parameter_bind(element: u64, source: Error) -> Self {
        Self::ParameterBind {
            element,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a driver failure during batch execution or commit
    pub fn batch_execution(pending: usize, source: Error) -> Self {
        Self::BatchExecution {
            pending,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create an encode error
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an emit error
    pub fn emit(message: impl Into<String>) -> Self {
        Self::Emit {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::RowMapping => write!(f, "row_mapping"),
            Self::ParameterBind => write!(f, "parameter_bind"),
            Self::BatchExecution => write!(f, "batch_execution"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Codec => write!(f, "codec"),
            Self::Emit => write!(f, "emit"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retriable() {
        assert!(ErrorCategory::Connection.is_retriable());

        assert!(!ErrorCategory::Configuration.is_retriable());
        assert!(!ErrorCategory::RowMapping.is_retriable());
        assert!(!ErrorCategory::BatchExecution.is_retriable());
        assert!(!ErrorCategory::Emit.is_retriable());
    }

    #[test]
    fn test_wrapped_errors_keep_source() {
        use std::error::Error as _;

        let err = Error::row_mapping(3, Error::type_conversion("expected BIGINT"));
        assert_eq!(err.category(), ErrorCategory::RowMapping);
        assert!(err.to_string().contains("row 3"));
        assert!(err.source().is_some());

        let err = Error::batch_execution(10, Error::query("duplicate key"));
        assert_eq!(err.category(), ErrorCategory::BatchExecution);
        assert!(err.to_string().contains("10 pending"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));

        let err = Error::query_with_sql("syntax error", "SELECT * FORM users");
        assert!(err.to_string().contains("syntax error"));
    }
}
