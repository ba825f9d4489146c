//! The counter store contract shared by every backend
//!
//! Backends implement the raw primitives (`get_entry`, `get_raw`, `set`,
//! `weak_compare_and_set`, expiry and lifecycle). Arithmetic is provided on
//! top of compare-and-set so every backend shares the same retry policy.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::clock::Clock;
use crate::entry::CounterEntry;
use crate::error::{Error, Result};

/// Compare-and-set attempts `get_and_add` makes before giving up
pub const GET_AND_ADD_MAX_ATTEMPTS: u32 = 100;

/// Storage medium behind a counter store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process map
    #[default]
    Memory,
    /// Table in a relational database
    Relational,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Relational => write!(f, "relational"),
        }
    }
}

/// String-keyed map of signed 64-bit counters with optional expiry
///
/// Expired entries (`0 < expiry_at < now`) read as absent but remain
/// physically present until [`maintenance`](CounterStore::maintenance)
/// sweeps them. Empty keys read as absent and make every mutation a no-op.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Logical structure name
    fn name(&self) -> &str;

    /// Backend implementing this store
    fn kind(&self) -> BackendKind;

    /// Clock used for expiry decisions
    fn clock(&self) -> &dyn Clock;

    /// Entry for `key` if present and not expired
    async fn get_entry(&self, key: &str) -> Result<Option<CounterEntry>>;

    /// Stored value ignoring expiry
    async fn get_raw(&self, key: &str) -> Result<Option<i64>>;

    /// Upsert `key`; `None` leaves the store untouched
    ///
    /// `created_at` is only written when the key is new, `updated_at` is
    /// always refreshed. `expiry_at <= 0` means no expiry.
    async fn set(&self, key: &str, value: Option<i64>, expiry_at: i64) -> Result<()>;

    /// Delete `key` if present
    async fn remove(&self, key: &str) -> Result<()>;

    /// Replace the raw stored value with `update` iff it equals `expect`
    ///
    /// An `expect` of `None` or `Some(0)` first initialises a missing key to
    /// `0` with no expiry, so counters can start from nothing.
    async fn weak_compare_and_set(&self, key: &str, expect: Option<i64>, update: i64)
        -> Result<bool>;

    /// Keys whose raw value equals `value` (all keys for `None`), skipping
    /// expired entries as of one clock reading
    async fn key_set(&self, value: Option<i64>) -> Result<HashSet<String>>;

    /// `-1` if absent, `0` if no expiry, else the expiry in epoch milliseconds
    async fn get_expiry_raw(&self, key: &str) -> Result<i64>;

    /// Change the expiry of an existing key; `expiry_at <= 0` clears it
    async fn set_expiry_raw(&self, key: &str, expiry_at: i64) -> Result<()>;

    /// Create backing storage if absent
    async fn system_setup(&self) -> Result<()>;

    /// Drop backing storage
    async fn system_destroy(&self) -> Result<()>;

    /// Physically remove expired entries, returns how many were removed
    async fn maintenance(&self) -> Result<u64>;

    /// Remove every entry, keeping the backing storage
    async fn clear(&self) -> Result<()>;

    /// Value for `key` if present and not expired
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get_entry(key).await?.map(|e| e.value))
    }

    /// Add `delta` to the raw value (`0` if absent), returns the previous value
    ///
    /// Retries the compare-and-set up to [`GET_AND_ADD_MAX_ATTEMPTS`] times
    /// with no backoff, then fails with [`Error::ConcurrencyExhausted`].
    async fn get_and_add(&self, key: &str, delta: i64) -> Result<i64> {
        if key.is_empty() {
            return Ok(0);
        }

        for attempt in 1..=GET_AND_ADD_MAX_ATTEMPTS {
            let previous = self.get_raw(key).await?.unwrap_or(0);
            if self
                .weak_compare_and_set(key, Some(previous), previous.wrapping_add(delta))
                .await?
            {
                return Ok(previous);
            }
            trace!(store = %self.name(), key = %key, attempt, "compare-and-set lost, retrying");
        }

        warn!(
            store = %self.name(),
            key = %key,
            attempts = GET_AND_ADD_MAX_ATTEMPTS,
            "get_and_add gave up under contention"
        );
        Err(Error::ConcurrencyExhausted {
            key: key.to_string(),
            attempts: GET_AND_ADD_MAX_ATTEMPTS,
        })
    }

    /// Store `value` with no expiry
    async fn put(&self, key: &str, value: i64) -> Result<()> {
        self.set(key, Some(value), 0).await
    }

    /// Store `value` expiring `lifespan_ms` from now (`<= 0` for never)
    async fn put_with_lifespan(&self, key: &str, value: i64, lifespan_ms: i64) -> Result<()> {
        let expiry_at = expiry_from_lifespan(self.clock(), lifespan_ms);
        self.set(key, Some(value), expiry_at).await
    }

    /// Whether `key` is present and not expired
    async fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_entry(key).await?.is_some())
    }

    /// Add `delta`, returns the new value
    async fn add_and_get(&self, key: &str, delta: i64) -> Result<i64> {
        Ok(self.get_and_add(key, delta).await?.wrapping_add(delta))
    }

    /// Add one, returns the new value
    async fn increment_and_get(&self, key: &str) -> Result<i64> {
        self.add_and_get(key, 1).await
    }

    /// Subtract one, returns the new value
    async fn decrement_and_get(&self, key: &str) -> Result<i64> {
        self.add_and_get(key, -1).await
    }

    /// Add one, returns the previous value
    async fn get_and_increment(&self, key: &str) -> Result<i64> {
        self.get_and_add(key, 1).await
    }

    /// Subtract one, returns the previous value
    async fn get_and_decrement(&self, key: &str) -> Result<i64> {
        self.get_and_add(key, -1).await
    }

    /// Milliseconds until `key` expires
    ///
    /// `-1` if absent or expired, `0` if it never expires. A key expiring
    /// exactly now reports `1`.
    async fn get_lifespan(&self, key: &str) -> Result<i64> {
        let expiry_at = self.get_expiry_raw(key).await?;
        if expiry_at <= 0 {
            return Ok(expiry_at);
        }

        let remaining = expiry_at - self.clock().now_millis();
        Ok(if remaining < 0 { -1 } else { remaining.max(1) })
    }

    /// Expire an existing key `lifespan_ms` from now (`<= 0` clears expiry)
    async fn set_lifespan(&self, key: &str, lifespan_ms: i64) -> Result<()> {
        let expiry_at = expiry_from_lifespan(self.clock(), lifespan_ms);
        self.set_expiry_raw(key, expiry_at).await
    }
}

fn expiry_from_lifespan(clock: &dyn Clock, lifespan_ms: i64) -> i64 {
    if lifespan_ms > 0 {
        clock.now_millis().saturating_add(lifespan_ms)
    } else {
        0
    }
}
