//! SQL dialect abstraction for keystack-rdbc
//!
//! Provides vendor-agnostic SQL generation using sea-query for the DML the
//! connector needs (select, upsert, delete) and hand-written DDL.
//!
//! - SqlDialect: trait for database-specific SQL generation
//! - Placeholder rewriting: statements are authored with `?` and rewritten
//!   to the native form (`$1`, `?`)
//! - Upsert strategies (ON CONFLICT, ON DUPLICATE KEY)

use crate::connection::DatabaseType;
use crate::types::{ColumnType, TableMetadata};
use sea_query::{
    Alias, Asterisk, Expr, IntoIden, MysqlQueryBuilder, OnConflict, Order, PostgresQueryBuilder,
    Query, QueryBuilder, SqliteQueryBuilder, TableRef,
};

// ---------------------------------------------------------------------------
// Helpers shared by the sea-query backed dialects
// ---------------------------------------------------------------------------

fn sea_table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(s) => TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(table).into_iden()),
        None => TableRef::Table(Alias::new(table).into_iden()),
    }
}

/// How an upsert resolves a conflict on its key columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictStyle {
    /// `ON CONFLICT (keys) DO UPDATE` / `DO NOTHING`
    OnConflict,
    /// `ON DUPLICATE KEY UPDATE`
    DuplicateKey,
}

fn sea_upsert<B: QueryBuilder>(
    builder: B,
    style: ConflictStyle,
    table: &TableMetadata,
    key_columns: &[&str],
    update_columns: &[&str],
    insert_only_columns: &[&str],
) -> String {
    let tbl = sea_table_ref(table.schema.as_deref(), &table.name);

    let all_columns: Vec<&str> = key_columns
        .iter()
        .chain(update_columns)
        .chain(insert_only_columns)
        .copied()
        .collect();
    let col_idens: Vec<_> = all_columns
        .iter()
        .map(|c| Alias::new(*c).into_iden())
        .collect();
    let values: Vec<_> = all_columns.iter().map(|_| Expr::cust("?")).collect();

    let mut on_conflict = match style {
        ConflictStyle::OnConflict => {
            OnConflict::columns(key_columns.iter().map(|c| Alias::new(*c).into_iden()))
        }
        ConflictStyle::DuplicateKey => OnConflict::new(),
    };

    if update_columns.is_empty() {
        match style {
            ConflictStyle::OnConflict => {
                on_conflict.do_nothing();
            }
            // Re-assigning the key to itself leaves an existing row untouched.
            ConflictStyle::DuplicateKey => {
                on_conflict.update_columns(key_columns.iter().map(|c| Alias::new(*c).into_iden()));
            }
        }
    } else {
        on_conflict.update_columns(update_columns.iter().map(|c| Alias::new(*c).into_iden()));
    }

    let mut stmt = Query::insert();
    stmt.into_table(tbl)
        .columns(col_idens)
        .values_panic(values)
        .on_conflict(on_conflict.to_owned());

    stmt.to_string(builder)
}

fn sea_delete<B: QueryBuilder>(builder: B, table: &TableMetadata, where_clause: Option<&str>) -> String {
    let tbl = sea_table_ref(table.schema.as_deref(), &table.name);

    let mut stmt = Query::delete();
    stmt.from_table(tbl);
    if let Some(w) = where_clause {
        stmt.and_where(Expr::cust(w));
    }

    stmt.to_string(builder)
}

#[allow(clippy::too_many_arguments)]
fn sea_select<B: QueryBuilder>(
    builder: B,
    schema: Option<&str>,
    table: &str,
    columns: &[&str],
    where_clause: Option<&str>,
    order_by: Option<&[(&str, bool)]>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> String {
    let tbl = sea_table_ref(schema, table);

    let mut stmt = Query::select();
    stmt.from(tbl);

    if columns.is_empty() {
        stmt.column(Asterisk);
    } else {
        for col in columns {
            stmt.column(Alias::new(*col));
        }
    }

    if let Some(w) = where_clause {
        stmt.and_where(Expr::cust(w));
    }

    if let Some(orders) = order_by {
        for (col, asc) in orders {
            stmt.order_by(
                Alias::new(*col),
                if *asc { Order::Asc } else { Order::Desc },
            );
        }
    }

    if let Some(l) = limit {
        stmt.limit(l);
    }
    if let Some(o) = offset {
        stmt.offset(o);
    }

    stmt.to_string(builder)
}

/// Count `?` placeholders outside quoted literals and identifiers
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan_placeholders(sql, |_| count += 1);
    count
}

fn scan_placeholders(sql: &str, mut on_placeholder: impl FnMut(usize)) {
    let mut quote: Option<char> = None;
    for (idx, c) in sql.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => on_placeholder(idx),
                _ => {}
            },
        }
    }
}

/// SQL dialect for vendor-specific SQL generation
///
/// Every statement builder takes `?` placeholders in caller-supplied
/// clauses and returns SQL in the dialect's native placeholder form.
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Engine this dialect targets
    fn database_type(&self) -> DatabaseType;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a parameter (1-based, e.g. `$1` or `?`)
    fn placeholder(&self, index: usize) -> String;

    /// Rewrite `?` placeholders outside quotes to the native form
    fn rewrite_placeholders(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 8);
        let mut last = 0;
        let mut index = 0;
        scan_placeholders(sql, |pos| {
            index += 1;
            out.push_str(&sql[last..pos]);
            out.push_str(&self.placeholder(index));
            last = pos + 1;
        });
        out.push_str(&sql[last..]);
        out
    }

    /// Native type for a logical column type
    fn native_type(&self, column_type: ColumnType) -> String;

    /// Column definition for an auto-increment surrogate primary key
    fn auto_increment_primary_key(&self) -> &'static str;

    /// Whether `CREATE INDEX IF NOT EXISTS` is understood
    fn supports_create_index_if_not_exists(&self) -> bool;

    /// Generate `CREATE TABLE IF NOT EXISTS`
    fn create_table_sql(&self, table: &TableMetadata) -> String {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let name = self.quote_identifier(&c.name);
                if c.auto_increment_key {
                    format!("{} {}", name, self.auto_increment_primary_key())
                } else if c.nullable {
                    format!("{} {}", name, self.native_type(c.column_type))
                } else {
                    format!("{} {} NOT NULL", name, self.native_type(c.column_type))
                }
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified_table(table.schema.as_deref(), &table.name),
            columns.join(", ")
        )
    }

    /// Generate `CREATE [UNIQUE] INDEX`
    fn create_index_sql(&self, table: &str, index_name: &str, columns: &[&str], unique: bool) -> String {
        let cols: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            if self.supports_create_index_if_not_exists() {
                "IF NOT EXISTS "
            } else {
                ""
            },
            self.quote_identifier(index_name),
            self.quote_identifier(table),
            cols.join(", ")
        )
    }

    /// Generate `DROP TABLE IF EXISTS`
    fn drop_table_sql(&self, schema: Option<&str>, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.qualified_table(schema, table))
    }

    /// Quote a possibly schema-qualified table name
    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!("{}.{}", self.quote_identifier(s), self.quote_identifier(table)),
            None => self.quote_identifier(table),
        }
    }

    /// Generate an upsert statement
    ///
    /// Parameters bind in order: `key_columns`, `update_columns`,
    /// `insert_only_columns`. Update columns are overwritten on conflict;
    /// insert-only columns keep their stored value. With no update columns
    /// an existing row is left untouched.
    fn upsert_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        update_columns: &[&str],
        insert_only_columns: &[&str],
    ) -> String;

    /// Generate a delete statement with an optional `?`-placeholder filter
    fn delete_sql(&self, table: &TableMetadata, where_clause: Option<&str>) -> String;

    /// Generate `UPDATE .. SET .. WHERE ..`; parameters bind set clause first
    fn update_sql(&self, table: &TableMetadata, set_clause: &str, where_clause: &str) -> String {
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.qualified_table(table.schema.as_deref(), &table.name),
            set_clause,
            where_clause
        );
        self.rewrite_placeholders(&sql)
    }

    /// Build a SELECT statement
    #[allow(clippy::too_many_arguments)]
    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String;
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn native_type(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Double => "DOUBLE PRECISION".into(),
            ColumnType::Decimal { precision, scale } => format!("NUMERIC({},{})", precision, scale),
            ColumnType::Varchar(len) => format!("VARCHAR({})", len),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Blob => "BYTEA".into(),
        }
    }

    fn auto_increment_primary_key(&self) -> &'static str {
        "BIGSERIAL PRIMARY KEY"
    }

    fn supports_create_index_if_not_exists(&self) -> bool {
        true
    }

    fn upsert_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        update_columns: &[&str],
        insert_only_columns: &[&str],
    ) -> String {
        let sql = sea_upsert(
            PostgresQueryBuilder,
            ConflictStyle::OnConflict,
            table,
            key_columns,
            update_columns,
            insert_only_columns,
        );
        self.rewrite_placeholders(&sql)
    }

    fn delete_sql(&self, table: &TableMetadata, where_clause: Option<&str>) -> String {
        self.rewrite_placeholders(&sea_delete(PostgresQueryBuilder, table, where_clause))
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        let sql = sea_select(
            PostgresQueryBuilder,
            schema,
            table,
            columns,
            where_clause,
            order_by,
            limit,
            offset,
        );
        self.rewrite_placeholders(&sql)
    }
}

// ===========================================================================
// MySQL
// ===========================================================================

const MYSQL_BINARY_COLLATION: &str = "CHARACTER SET utf8mb4 COLLATE utf8mb4_bin";

/// MySQL dialect
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn native_type(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Boolean => "TINYINT(1)".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Double => "DOUBLE".into(),
            ColumnType::Decimal { precision, scale } => {
                format!("DECIMAL({},{})", precision.min(65), scale.min(30))
            }
            // Binary collation keeps string comparisons case-sensitive
            ColumnType::Varchar(len) if len <= 16_383 => {
                format!("VARCHAR({}) {}", len, MYSQL_BINARY_COLLATION)
            }
            ColumnType::Varchar(_) | ColumnType::Text => format!("TEXT {}", MYSQL_BINARY_COLLATION),
            ColumnType::Blob => "BLOB".into(),
        }
    }

    fn auto_increment_primary_key(&self) -> &'static str {
        "BIGINT PRIMARY KEY AUTO_INCREMENT"
    }

    fn supports_create_index_if_not_exists(&self) -> bool {
        false
    }

    fn upsert_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        update_columns: &[&str],
        insert_only_columns: &[&str],
    ) -> String {
        sea_upsert(
            MysqlQueryBuilder,
            ConflictStyle::DuplicateKey,
            table,
            key_columns,
            update_columns,
            insert_only_columns,
        )
    }

    fn delete_sql(&self, table: &TableMetadata, where_clause: Option<&str>) -> String {
        sea_delete(MysqlQueryBuilder, table, where_clause)
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        sea_select(
            MysqlQueryBuilder,
            schema,
            table,
            columns,
            where_clause,
            order_by,
            limit,
            offset,
        )
    }
}

// ===========================================================================
// MariaDB: delegates to MySQL, overrides where behaviour differs
// ===========================================================================

/// MariaDB dialect (MySQL syntax plus `CREATE INDEX IF NOT EXISTS`)
#[derive(Debug, Clone, Default)]
pub struct MariaDbDialect;

impl SqlDialect for MariaDbDialect {
    fn name(&self) -> &'static str {
        "MariaDB"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MariaDB
    }

    fn quote_identifier(&self, name: &str) -> String {
        MySqlDialect.quote_identifier(name)
    }

    fn placeholder(&self, index: usize) -> String {
        MySqlDialect.placeholder(index)
    }

    fn native_type(&self, column_type: ColumnType) -> String {
        MySqlDialect.native_type(column_type)
    }

    fn auto_increment_primary_key(&self) -> &'static str {
        MySqlDialect.auto_increment_primary_key()
    }

    fn supports_create_index_if_not_exists(&self) -> bool {
        true // MariaDB 10.1.4+
    }

    fn upsert_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        update_columns: &[&str],
        insert_only_columns: &[&str],
    ) -> String {
        MySqlDialect.upsert_sql(table, key_columns, update_columns, insert_only_columns)
    }

    fn delete_sql(&self, table: &TableMetadata, where_clause: Option<&str>) -> String {
        MySqlDialect.delete_sql(table, where_clause)
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        MySqlDialect.build_select(
            schema,
            table,
            columns,
            where_clause,
            order_by,
            limit,
            offset,
        )
    }
}

// ===========================================================================
// SQLite
// ===========================================================================

/// SQLite dialect (3.24+ for ON CONFLICT upserts)
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn native_type(&self, column_type: ColumnType) -> String {
        // Declared types only select a column affinity in SQLite.
        match column_type {
            ColumnType::Boolean => "INTEGER".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Double => "REAL".into(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
            ColumnType::Varchar(len) => format!("VARCHAR({})", len),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Blob => "BLOB".into(),
        }
    }

    fn auto_increment_primary_key(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }

    fn supports_create_index_if_not_exists(&self) -> bool {
        true
    }

    fn upsert_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        update_columns: &[&str],
        insert_only_columns: &[&str],
    ) -> String {
        sea_upsert(
            SqliteQueryBuilder,
            ConflictStyle::OnConflict,
            table,
            key_columns,
            update_columns,
            insert_only_columns,
        )
    }

    fn delete_sql(&self, table: &TableMetadata, where_clause: Option<&str>) -> String {
        sea_delete(SqliteQueryBuilder, table, where_clause)
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        sea_select(
            SqliteQueryBuilder,
            schema,
            table,
            columns,
            where_clause,
            order_by,
            limit,
            offset,
        )
    }
}

/// Get a dialect instance by database type name
pub fn dialect_for(name: &str) -> Box<dyn SqlDialect> {
    dialect_for_type(DatabaseType::from_scheme(name))
}

/// Get the dialect for a database type (PostgreSQL for unknown engines)
pub fn dialect_for_type(database_type: DatabaseType) -> Box<dyn SqlDialect> {
    match database_type {
        DatabaseType::PostgreSQL | DatabaseType::Unknown => Box::new(PostgresDialect),
        DatabaseType::MySQL => Box::new(MySqlDialect),
        DatabaseType::MariaDB => Box::new(MariaDbDialect),
        DatabaseType::SQLite => Box::new(SqliteDialect),
    }
}
