//! Error types for keystack-rdbc
//!
//! Every driver failure is classified so callers can tell transient
//! failures (lost connection, busy database) from permanent ones
//! (constraint violations, malformed statements).

use std::fmt;
use thiserror::Error;

/// Result type for keystack-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

type Source = Box<dyn std::error::Error + Send + Sync>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection lost, closed or never opened (retriable)
    Connection,
    /// Statement rejected or failed
    Query,
    /// Constraint violation (not retriable)
    Constraint,
    /// Cell could not be read as the requested type
    TypeConversion,
    /// Busy or locked database, statement timeout (retriable)
    Timeout,
    /// Bad URL, unsafe identifier or clause
    Configuration,
    /// Result shape did not match the table definition
    Schema,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }

    /// Lowercase label for logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Constraint => "constraint",
            Self::TypeConversion => "type_conversion",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::Schema => "schema",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for keystack-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed or was already closed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Source>,
    },

    /// Statement execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Source>,
    },

    /// A unique, not-null or check constraint rejected the statement
    #[error("constraint violation: {message}")]
    Constraint { message: String, sql: Option<String> },

    /// A cell held a value of the wrong type
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// The engine stayed busy past the statement timeout
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Invalid connection URL, identifier or clause
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Result rows did not match the expected columns
    #[error("schema error: {message}")]
    Schema { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Schema { .. } => ErrorCategory::Schema,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Statement that failed, when known
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } | Self::Constraint { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error caused by a driver error
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

    /// Create a query error for `sql`
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a query error for `sql` caused by a driver error
    pub fn query_with_source(
        message: impl Into<String>,
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Create a constraint violation raised by `sql`
    pub fn constraint(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }
}
