//! Relational connector facade
//!
//! Pairs a [`Connection`] with its [`SqlDialect`] and exposes the handful of
//! table-level operations the counter backend needs. Clauses are written
//! with `?` placeholders; identifiers are validated before they are spliced
//! into statement text.

use std::sync::Arc;

use tracing::debug;

use crate::connection::Connection;
use crate::dialect::{dialect_for_type, SqlDialect};
use crate::error::{Error, Result};
use crate::security::{validate_clause, validate_sql_identifier, validate_sql_identifiers};
use crate::types::{Row, TableMetadata, Value};

/// Insert-or-update keyed on one or more unique columns
///
/// - `unique`: columns identifying the row
/// - `insert`: written on insert and overwritten on conflict
/// - `default`: written on insert only, kept on conflict
///
/// A statement without insert columns inserts the row only if it is absent.
#[derive(Debug, Clone)]
pub struct UpsertStatement {
    table: String,
    unique: Vec<(String, Value)>,
    insert: Vec<(String, Value)>,
    default: Vec<(String, Value)>,
}

impl UpsertStatement {
    /// Start an upsert against `table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            unique: Vec::new(),
            insert: Vec::new(),
            default: Vec::new(),
        }
    }

    /// Add a unique (conflict target) column
    pub fn unique(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.unique.push((column.into(), value.into()));
        self
    }

    /// Add a column overwritten on conflict
    pub fn insert(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert.push((column.into(), value.into()));
        self
    }

    /// Add a column written only when the row is created
    pub fn default(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default.push((column.into(), value.into()));
        self
    }

    /// Target table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether an existing row is left untouched
    pub fn is_insert_if_absent(&self) -> bool {
        self.insert.is_empty()
    }

    fn columns(group: &[(String, Value)]) -> Vec<&str> {
        group.iter().map(|(c, _)| c.as_str()).collect()
    }

    fn params(&self) -> Vec<Value> {
        self.unique
            .iter()
            .chain(&self.insert)
            .chain(&self.default)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn validate(&self) -> Result<()> {
        validate_sql_identifier(&self.table)?;
        if self.unique.is_empty() {
            return Err(Error::config(format!(
                "upsert into '{}' needs at least one unique column",
                self.table
            )));
        }
        validate_sql_identifiers(
            self.unique
                .iter()
                .chain(&self.insert)
                .chain(&self.default)
                .map(|(c, _)| c.as_str()),
        )
    }
}

/// Table-level statements over one connection
pub struct RelationalConnector {
    conn: Arc<dyn Connection>,
    dialect: Box<dyn SqlDialect>,
}

impl std::fmt::Debug for RelationalConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalConnector")
            .field("dialect", &self.dialect.name())
            .finish_non_exhaustive()
    }
}

impl RelationalConnector {
    /// Create a connector with an explicit dialect
    pub fn new(conn: Arc<dyn Connection>, dialect: Box<dyn SqlDialect>) -> Self {
        Self { conn, dialect }
    }

    /// Create a connector using the dialect matching the connection's engine
    pub fn for_connection(conn: Arc<dyn Connection>) -> Self {
        let dialect = dialect_for_type(conn.database_type());
        Self { conn, dialect }
    }

    /// SQL dialect in use
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Underlying connection
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// `SELECT columns FROM table [WHERE clause]`; empty `columns` selects `*`
    pub async fn select(
        &self,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        args: &[Value],
    ) -> Result<Vec<Row>> {
        validate_sql_identifier(table)?;
        validate_sql_identifiers(columns.iter().copied())?;
        if let Some(w) = where_clause {
            validate_clause(w)?;
        }

        let sql = self
            .dialect
            .build_select(None, table, columns, where_clause, None, None, None);
        debug!(table = %table, sql = %sql, "select");
        self.conn.query(&sql, args).await
    }

    /// Insert-or-update a row, returns affected row count
    pub async fn upsert(&self, stmt: &UpsertStatement) -> Result<u64> {
        stmt.validate()?;

        let table = TableMetadata::new(stmt.table());
        let sql = self.dialect.upsert_sql(
            &table,
            &UpsertStatement::columns(&stmt.unique),
            &UpsertStatement::columns(&stmt.insert),
            &UpsertStatement::columns(&stmt.default),
        );
        debug!(table = %stmt.table(), sql = %sql, "upsert");
        self.conn.execute(&sql, &stmt.params()).await
    }

    /// `UPDATE table SET set_clause WHERE where_clause`, returns affected rows
    ///
    /// `args` bind the set clause placeholders first, then the where clause.
    pub async fn conditional_update(
        &self,
        table: &str,
        set_clause: &str,
        where_clause: &str,
        args: &[Value],
    ) -> Result<u64> {
        validate_sql_identifier(table)?;
        validate_clause(set_clause)?;
        validate_clause(where_clause)?;

        let sql = self
            .dialect
            .update_sql(&TableMetadata::new(table), set_clause, where_clause);
        debug!(table = %table, sql = %sql, "conditional update");
        self.conn.execute(&sql, args).await
    }

    /// `DELETE FROM table [WHERE clause]`, returns affected rows
    pub async fn delete(&self, table: &str, where_clause: Option<&str>, args: &[Value]) -> Result<u64> {
        validate_sql_identifier(table)?;
        if let Some(w) = where_clause {
            validate_clause(w)?;
        }

        let sql = self.dialect.delete_sql(&TableMetadata::new(table), where_clause);
        debug!(table = %table, sql = %sql, "delete");
        self.conn.execute(&sql, args).await
    }

    /// `CREATE TABLE IF NOT EXISTS`
    pub async fn create_table(&self, table: &TableMetadata) -> Result<()> {
        validate_sql_identifier(&table.name)?;
        validate_sql_identifiers(table.columns.iter().map(|c| c.name.as_str()))?;
        if table.columns.is_empty() {
            return Err(Error::schema(format!("table '{}' has no columns", table.name)));
        }

        let sql = self.dialect.create_table_sql(table);
        debug!(table = %table.name, sql = %sql, "create table");
        self.conn.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Create the index `{table}_{suffix}` on one column
    ///
    /// Re-creating an existing index succeeds, including on engines without
    /// `CREATE INDEX IF NOT EXISTS`.
    pub async fn create_index(&self, table: &str, column: &str, unique: bool, suffix: &str) -> Result<()> {
        validate_sql_identifiers([table, column])?;
        let index_name = format!("{}_{}", table, suffix);
        validate_sql_identifier(&index_name)?;

        let sql = self
            .dialect
            .create_index_sql(table, &index_name, &[column], unique);
        debug!(table = %table, index = %index_name, sql = %sql, "create index");
        match self.conn.execute(&sql, &[]).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_index(&err) => {
                debug!(table = %table, index = %index_name, "index already exists");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// `DROP TABLE IF EXISTS`
    pub async fn drop_table(&self, table: &str) -> Result<()> {
        validate_sql_identifier(table)?;

        let sql = self.dialect.drop_table_sql(None, table);
        debug!(table = %table, sql = %sql, "drop table");
        self.conn.execute(&sql, &[]).await?;
        Ok(())
    }
}

fn is_duplicate_index(err: &Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("duplicate key name") || message.contains("already exists")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_statement_param_order() {
        let stmt = UpsertStatement::new("KL_hits")
            .default("created_at", 1_i64)
            .unique("counter_key", "a")
            .insert("counter_value", 5_i64);

        assert_eq!(
            stmt.params(),
            vec![Value::from("a"), Value::Int64(5), Value::Int64(1)]
        );
        assert!(!stmt.is_insert_if_absent());
    }

    #[test]
    fn test_upsert_statement_requires_unique_column() {
        let stmt = UpsertStatement::new("KL_hits").insert("counter_value", 1_i64);
        assert!(stmt.validate().is_err());
    }

    #[test]
    fn test_upsert_statement_rejects_bad_identifiers() {
        let stmt = UpsertStatement::new("KL hits").unique("counter_key", "a");
        assert!(stmt.validate().is_err());

        let stmt = UpsertStatement::new("KL_hits").unique("counter_key;", "a");
        assert!(stmt.validate().is_err());
    }

    #[test]
    fn test_duplicate_index_detection() {
        assert!(is_duplicate_index(&Error::query(
            "Duplicate key name 'KL_hits_unq'"
        )));
        assert!(is_duplicate_index(&Error::query(
            "index KL_hits_unq already exists"
        )));
        assert!(!is_duplicate_index(&Error::query("no such table: KL_hits")));
    }
}
