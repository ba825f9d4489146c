//! SQLite backend implementation for keystack-rdbc
//!
//! Provides an embedded engine behind the [`Connection`] trait:
//! - File-backed or in-memory databases via rusqlite (bundled libsqlite3)
//! - Busy timeout taken from `ConnectionConfig::statement_timeout`
//! - Driver errors mapped onto the crate error taxonomy
//!
//! rusqlite is synchronous, so every statement runs on tokio's blocking pool
//! while holding the connection mutex. A locked database waits out its busy
//! timeout there instead of on an async worker.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, ErrorCode};
use rust_decimal::prelude::ToPrimitive;

use crate::connection::{Connection, ConnectionConfig, DatabaseType};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;

        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Sql::Integer(i64::from(*b))),
            Value::Int64(n) => ToSqlOutput::Owned(Sql::Integer(*n)),
            Value::Float64(n) => ToSqlOutput::Owned(Sql::Real(*n)),
            Value::Decimal(d) => {
                // Integral decimals stay INTEGER so equality filters match.
                match d.fract().is_zero().then(|| d.to_i64()).flatten() {
                    Some(n) => ToSqlOutput::Owned(Sql::Integer(n)),
                    None => ToSqlOutput::Owned(Sql::Real(d.to_f64().unwrap_or(f64::NAN))),
                }
            }
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int64(n),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn map_err(err: rusqlite::Error, sql: &str) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => Error::constraint(err.to_string(), sql),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            Error::timeout(err.to_string())
        }
        _ => Error::query_with_source(err.to_string(), sql, err),
    }
}

type SharedHandle = Arc<Mutex<Option<rusqlite::Connection>>>;

fn with_handle<T>(
    handle: &Mutex<Option<rusqlite::Connection>>,
    sql: &str,
    f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
) -> Result<T> {
    let guard = handle.lock();
    let conn = guard
        .as_ref()
        .ok_or_else(|| Error::connection("connection is closed"))?;
    f(conn).map_err(|e| map_err(e, sql))
}

fn join_err(err: tokio::task::JoinError) -> Error {
    Error::connection_with_source("sqlite worker task failed", err)
}

/// SQLite connection
pub struct SqliteConnection {
    inner: SharedHandle,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("SqliteConnection");
        match self.inner.try_lock() {
            Some(guard) => dbg.field("open", &guard.is_some()),
            None => dbg.field("busy", &true),
        };
        dbg.finish()
    }
}

impl SqliteConnection {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = rusqlite::Connection::open(path.as_ref()).map_err(|e| {
            Error::connection_with_source(
                format!("failed to open {}", path.as_ref().display()),
                e,
            )
        })?;
        Ok(Self::from_rusqlite(conn))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| Error::connection_with_source("failed to open in-memory database", e))?;
        Ok(Self::from_rusqlite(conn))
    }

    /// Wrap an already opened rusqlite connection
    pub fn from_rusqlite(conn: rusqlite::Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Set how long a statement waits on a locked database
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        with_handle(&self.inner, "PRAGMA busy_timeout", |conn| conn.busy_timeout(timeout))
    }

    async fn run_blocking<T, F>(&self, sql: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let handle = Arc::clone(&self.inner);
        let sql = sql.to_owned();
        tokio::task::spawn_blocking(move || with_handle(&handle, &sql, f))
            .await
            .map_err(join_err)?
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let statement = sql.to_owned();
        let params = params.to_vec();
        self.run_blocking(sql, move |conn| {
            let mut stmt = conn.prepare(&statement)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns.len());
                for idx in 0..columns.len() {
                    values.push(value_from_ref(row.get_ref(idx)?));
                }
                out.push(Row::new(columns.clone(), values));
            }
            Ok(out)
        })
        .await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let statement = sql.to_owned();
        let params = params.to_vec();
        let affected = self
            .run_blocking(sql, move |conn| {
                conn.execute(&statement, params_from_iter(params.iter()))
            })
            .await?;
        Ok(affected as u64)
    }

    async fn is_valid(&self) -> bool {
        self.run_blocking("SELECT 1", |conn| conn.query_row("SELECT 1", [], |_| Ok(())))
            .await
            .is_ok()
    }

    async fn close(&self) -> Result<()> {
        let handle = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || match handle.lock().take() {
            Some(conn) => conn
                .close()
                .map_err(|(_, e)| Error::connection_with_source("failed to close connection", e)),
            None => Ok(()),
        })
        .await
        .map_err(join_err)?
    }
}

/// Where a `sqlite:` URL points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    /// Private in-memory database
    Memory,
    /// Database file
    File(String),
}

impl SqliteLocation {
    /// Parse `sqlite::memory:`, `sqlite://:memory:`, `sqlite://path` or `sqlite:path`
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("sqlite:")
            .ok_or_else(|| Error::config(format!("not a sqlite url: {}", url)))?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);

        match rest {
            "" => Err(Error::config("sqlite url has no database path")),
            ":memory:" => Ok(Self::Memory),
            path => Ok(Self::File(path.to_string())),
        }
    }
}

/// Opens SQLite connections from `sqlite:` URLs
#[derive(Debug, Clone, Default)]
pub struct SqliteConnectionFactory;

impl SqliteConnectionFactory {
    /// Open the database named by `config.url` and apply its busy timeout
    pub fn open(&self, config: &ConnectionConfig) -> Result<SqliteConnection> {
        let conn = match SqliteLocation::parse(&config.url)? {
            SqliteLocation::Memory => SqliteConnection::open_in_memory()?,
            SqliteLocation::File(path) => SqliteConnection::open(path)?,
        };
        if let Some(timeout) = config.statement_timeout {
            conn.set_busy_timeout(timeout)?;
        }
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_location() {
        assert_eq!(SqliteLocation::parse("sqlite::memory:").unwrap(), SqliteLocation::Memory);
        assert_eq!(SqliteLocation::parse("sqlite://:memory:").unwrap(), SqliteLocation::Memory);
        assert_eq!(
            SqliteLocation::parse("sqlite://data/counters.db").unwrap(),
            SqliteLocation::File("data/counters.db".into())
        );
        assert_eq!(
            SqliteLocation::parse("sqlite:counters.db").unwrap(),
            SqliteLocation::File("counters.db".into())
        );
        assert!(SqliteLocation::parse("sqlite://").is_err());
        assert!(SqliteLocation::parse("postgres://localhost").is_err());
    }

    #[tokio::test]
    async fn test_query_roundtrip() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (k TEXT PRIMARY KEY, v DECIMAL(36,12))", &[])
            .await
            .unwrap();

        let affected = conn
            .execute("INSERT INTO t (k, v) VALUES (?, ?)", &[Value::from("a"), Value::Int64(7)])
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn
            .query("SELECT k, v FROM t WHERE v = ?", &[Value::Decimal(Decimal::from(7))])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("k"), Some(&Value::from("a")));
        assert_eq!(rows[0].i64_by_name("v"), Some(7));
    }

    #[tokio::test]
    async fn test_fractional_decimal_binds_as_real() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let d = Decimal::from_str("1.5").unwrap();
        let row = conn
            .query_one("SELECT ? AS v", &[Value::Decimal(d)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_by_name("v"), Some(&Value::Float64(1.5)));
    }

    #[tokio::test]
    async fn test_constraint_violation_is_mapped() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (k TEXT PRIMARY KEY)", &[]).await.unwrap();
        conn.execute("INSERT INTO t (k) VALUES (?)", &[Value::from("a")])
            .await
            .unwrap();

        let err = conn
            .execute("INSERT INTO t (k) VALUES (?)", &[Value::from("a")])
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Constraint);
        assert_eq!(err.sql(), Some("INSERT INTO t (k) VALUES (?)"));
    }

    #[tokio::test]
    async fn test_bad_sql_carries_statement() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let err = conn.query("SELECT * FORM t", &[]).await.unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Query);
        assert_eq!(err.sql(), Some("SELECT * FORM t"));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        assert!(conn.is_valid().await);
        conn.close().await.unwrap();
        assert!(!conn.is_valid().await);

        let err = conn.execute("SELECT 1", &[]).await.unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Connection);
    }

    #[tokio::test]
    async fn test_factory_opens_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counters.db");
        let config = ConnectionConfig::new(format!("sqlite://{}", path.display()));

        let conn = SqliteConnectionFactory.open(&config).unwrap();
        conn.execute("CREATE TABLE t (k TEXT)", &[]).await.unwrap();
        assert!(path.exists());
        assert_eq!(conn.database_type(), DatabaseType::SQLite);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_busy_database_does_not_stall_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.db");

        let holder = SqliteConnection::open(&path).unwrap();
        holder.execute("CREATE TABLE t (k TEXT)", &[]).await.unwrap();
        holder.execute("BEGIN EXCLUSIVE", &[]).await.unwrap();

        let waiter = SqliteConnection::open(&path).unwrap();
        waiter.set_busy_timeout(Duration::from_millis(300)).unwrap();

        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(10));
                loop {
                    interval.tick().await;
                    ticks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let err = waiter.query("SELECT k FROM t", &[]).await.unwrap_err();
        ticker.abort();

        assert_eq!(err.category(), crate::ErrorCategory::Timeout);
        let ticks = ticks.load(Ordering::Relaxed);
        assert!(ticks >= 5, "runtime stalled while waiting on the lock ({} ticks)", ticks);

        holder.execute("COMMIT", &[]).await.unwrap();
        assert!(waiter.query("SELECT k FROM t", &[]).await.unwrap().is_empty());
    }
}
