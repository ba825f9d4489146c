//! # keystack-rdbc
//!
//! Relational connectivity for keystack counter maps.
//!
//! This crate provides the small slice of relational access the keystack
//! backends rely on: parameterized `select`, unique-keyed `upsert` and a
//! conditional `update` that reports affected rows, plus the DDL needed to
//! create and drop a backing table.
//!
//! ## Features
//!
//! - **Value Model**: strings, integers, floating point, decimals, byte blobs and NULL
//! - **SQL Dialect Abstraction**: Vendor-agnostic SQL generation using sea-query
//! - **Placeholder Normalisation**: clauses are written with `?` for every engine
//! - **Identifier Validation**: table, column and index names are checked before use
//! - **Embedded SQLite**: a bundled driver for tests and single-node deployments
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keystack_rdbc::prelude::*;
//! use std::sync::Arc;
//!
//! let conn = Arc::new(SqliteConnection::open_in_memory()?);
//! let connector = RelationalConnector::for_connection(conn);
//!
//! connector
//!     .upsert(&UpsertStatement::new("KL_hits").unique("counter_key", "home").insert("counter_value", 1_i64))
//!     .await?;
//! let updated = connector
//!     .conditional_update("KL_hits", "counter_value = ?", "counter_key = ? AND counter_value = ?",
//!         &[Value::Int64(2), Value::from("home"), Value::Int64(1)])
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - embedded SQLite support via rusqlite (default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod connector;
pub mod dialect;
pub mod error;
pub mod security;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value model
    pub use crate::types::{ColumnMetadata, ColumnType, Row, TableMetadata, Value};

    // Connections
    pub use crate::connection::{Connection, ConnectionConfig, DatabaseType};

    // Statements
    pub use crate::connector::{RelationalConnector, UpsertStatement};
    pub use crate::dialect::{dialect_for, dialect_for_type, SqlDialect};

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::{SqliteConnection, SqliteConnectionFactory};
}

pub use connection::{Connection, ConnectionConfig, DatabaseType};
pub use connector::{RelationalConnector, UpsertStatement};
pub use error::{Error, ErrorCategory, Result};
pub use types::{ColumnMetadata, ColumnType, Row, TableMetadata, Value};
