//! Counter store backed by one relational table
//!
//! Every store owns a table named `{prefix}{name}`:
//!
//! | column          | type            |
//! |-----------------|-----------------|
//! | `pk`            | auto-increment  |
//! | `updated_at`    | BIGINT          |
//! | `created_at`    | BIGINT          |
//! | `expiry_at`     | BIGINT, 0=never |
//! | `counter_key`   | VARCHAR(64), unique index, case-sensitive |
//! | `counter_value` | DECIMAL(36,12), indexed   |
//!
//! Compare-and-set is a single conditional `UPDATE`; the engine's row lock
//! is the atomicity boundary, so no in-process lock is held.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use keystack_rdbc::security::validate_sql_identifier;
use keystack_rdbc::{
    ColumnMetadata, ColumnType, RelationalConnector, Row, TableMetadata, UpsertStatement, Value,
};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::entry::{normalize_expiry, CounterEntry};
use crate::error::Result;
use crate::store::{BackendKind, CounterStore};

const COL_PK: &str = "pk";
const COL_UPDATED: &str = "updated_at";
const COL_CREATED: &str = "created_at";
const COL_EXPIRY: &str = "expiry_at";
const COL_KEY: &str = "counter_key";
const COL_VALUE: &str = "counter_value";

const COUNTER_VALUE_TYPE: ColumnType = ColumnType::Decimal {
    precision: 36,
    scale: 12,
};

/// Longest key the `counter_key` column holds
pub const MAX_KEY_LEN: u32 = 64;

/// Counter store persisted through a [`RelationalConnector`]
pub struct RelationalCounterStore {
    name: String,
    table: String,
    connector: Arc<RelationalConnector>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RelationalCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalCounterStore")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("connector", &self.connector)
            .finish()
    }
}

impl RelationalCounterStore {
    /// Create a store on table `{table_prefix}{name}` using the system clock
    ///
    /// Fails if the table name is not a plain SQL identifier.
    pub fn new(connector: Arc<RelationalConnector>, table_prefix: &str, name: &str) -> Result<Self> {
        Self::with_clock(connector, table_prefix, name, Arc::new(SystemClock))
    }

    /// Create a store on a custom clock
    pub fn with_clock(
        connector: Arc<RelationalConnector>,
        table_prefix: &str,
        name: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let table = format!("{}{}", table_prefix, name);
        validate_sql_identifier(&table)?;

        Ok(Self {
            name: name.to_string(),
            table,
            connector,
            clock,
        })
    }

    /// Backing table name
    pub fn table(&self) -> &str {
        &self.table
    }

    fn table_metadata(&self) -> TableMetadata {
        TableMetadata::new(self.table.as_str())
            .with_column(ColumnMetadata::auto_increment_key(COL_PK))
            .with_column(ColumnMetadata::new(COL_UPDATED, ColumnType::BigInt).not_null())
            .with_column(ColumnMetadata::new(COL_CREATED, ColumnType::BigInt).not_null())
            .with_column(ColumnMetadata::new(COL_EXPIRY, ColumnType::BigInt).not_null())
            .with_column(
                ColumnMetadata::new(COL_KEY, ColumnType::Varchar(MAX_KEY_LEN))
                    .not_null(),
            )
            .with_column(ColumnMetadata::new(COL_VALUE, COUNTER_VALUE_TYPE).not_null())
    }

    async fn fetch(&self, key: &str) -> Result<Option<CounterEntry>> {
        let rows = self
            .connector
            .select(&self.table, &[], Some("counter_key = ?"), &[Value::from(key)])
            .await?;
        rows.first().map(|row| entry_from_row(key, row)).transpose()
    }
}

fn entry_from_row(key: &str, row: &Row) -> Result<CounterEntry> {
    Ok(CounterEntry {
        key: key.to_string(),
        value: row.require_i64(COL_VALUE)?,
        expiry_at: normalize_expiry(row.require_i64(COL_EXPIRY)?),
        created_at: row.require_i64(COL_CREATED)?,
        updated_at: row.require_i64(COL_UPDATED)?,
    })
}

#[async_trait]
impl CounterStore for RelationalCounterStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    async fn get_entry(&self, key: &str) -> Result<Option<CounterEntry>> {
        if key.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now_millis();
        Ok(self.fetch(key).await?.filter(|e| !e.is_expired_at(now)))
    }

    async fn get_raw(&self, key: &str) -> Result<Option<i64>> {
        if key.is_empty() {
            return Ok(None);
        }
        Ok(self.fetch(key).await?.map(|e| e.value))
    }

    async fn set(&self, key: &str, value: Option<i64>, expiry_at: i64) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        if key.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_millis();
        let stmt = UpsertStatement::new(self.table.as_str())
            .unique(COL_KEY, key)
            .insert(COL_VALUE, value)
            .insert(COL_EXPIRY, normalize_expiry(expiry_at))
            .insert(COL_UPDATED, now)
            .default(COL_CREATED, now);
        self.connector.upsert(&stmt).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }
        self.connector
            .delete(&self.table, Some("counter_key = ?"), &[Value::from(key)])
            .await?;
        Ok(())
    }

    async fn weak_compare_and_set(&self, key: &str, expect: Option<i64>, update: i64) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }

        let now = self.clock.now_millis();
        let expect = expect.unwrap_or(0);
        if expect == 0 {
            let init = UpsertStatement::new(self.table.as_str())
                .unique(COL_KEY, key)
                .default(COL_VALUE, 0_i64)
                .default(COL_EXPIRY, 0_i64)
                .default(COL_UPDATED, now)
                .default(COL_CREATED, now);
            // The conditional update below still decides the outcome.
            if let Err(err) = self.connector.upsert(&init).await {
                warn!(store = %self.name, key = %key, error = %err, "counter initialise failed");
            }
        }

        let affected = self
            .connector
            .conditional_update(
                &self.table,
                "counter_value = ?, updated_at = ?",
                "counter_key = ? AND counter_value = ?",
                &[
                    Value::Int64(update),
                    Value::Int64(now),
                    Value::from(key),
                    Value::Int64(expect),
                ],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn key_set(&self, value: Option<i64>) -> Result<HashSet<String>> {
        let now = self.clock.now_millis();
        let rows = match value {
            None => {
                self.connector
                    .select(
                        &self.table,
                        &[COL_KEY],
                        Some("expiry_at <= ? OR expiry_at > ?"),
                        &[Value::Int64(0), Value::Int64(now)],
                    )
                    .await?
            }
            Some(v) => {
                self.connector
                    .select(
                        &self.table,
                        &[COL_KEY],
                        Some("counter_value = ? AND (expiry_at <= ? OR expiry_at > ?)"),
                        &[Value::Int64(v), Value::Int64(0), Value::Int64(now)],
                    )
                    .await?
            }
        };

        Ok(rows
            .iter()
            .filter_map(|row| row.str_by_name(COL_KEY).map(str::to_string))
            .collect())
    }

    async fn get_expiry_raw(&self, key: &str) -> Result<i64> {
        if key.is_empty() {
            return Ok(-1);
        }

        let rows = self
            .connector
            .select(&self.table, &[COL_EXPIRY], Some("counter_key = ?"), &[Value::from(key)])
            .await?;
        Ok(match rows.first() {
            Some(row) => normalize_expiry(row.require_i64(COL_EXPIRY)?),
            None => -1,
        })
    }

    async fn set_expiry_raw(&self, key: &str, expiry_at: i64) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_millis();
        self.connector
            .conditional_update(
                &self.table,
                "expiry_at = ?, updated_at = ?",
                "counter_key = ?",
                &[
                    Value::Int64(normalize_expiry(expiry_at)),
                    Value::Int64(now),
                    Value::from(key),
                ],
            )
            .await?;
        Ok(())
    }

    async fn system_setup(&self) -> Result<()> {
        self.connector.create_table(&self.table_metadata()).await?;
        self.connector.create_index(&self.table, COL_KEY, true, "unq").await?;
        self.connector.create_index(&self.table, COL_VALUE, false, "val").await?;
        debug!(store = %self.name, table = %self.table, "counter table ready");
        Ok(())
    }

    async fn system_destroy(&self) -> Result<()> {
        self.connector.drop_table(&self.table).await?;
        debug!(store = %self.name, table = %self.table, "counter table dropped");
        Ok(())
    }

    async fn maintenance(&self) -> Result<u64> {
        let now = self.clock.now_millis();
        let removed = self
            .connector
            .delete(
                &self.table,
                Some("expiry_at <= ? AND expiry_at > ?"),
                &[Value::Int64(now), Value::Int64(0)],
            )
            .await?;
        if removed > 0 {
            debug!(store = %self.name, table = %self.table, removed, "swept expired rows");
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.connector.delete(&self.table, None, &[]).await?;
        Ok(())
    }
}
