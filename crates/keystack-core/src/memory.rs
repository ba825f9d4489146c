//! In-process counter store
//!
//! One `RwLock<HashMap<String, CounterEntry>>` per store. Reads share the
//! lock, mutations take it exclusively; compare-and-set holds the write lock
//! for its whole read-compare-write, so it is linearizable per store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::entry::{normalize_expiry, CounterEntry};
use crate::error::Result;
use crate::store::{BackendKind, CounterStore};

/// Counter store backed by a locked hash map
#[derive(Debug)]
pub struct MemoryCounterStore {
    name: String,
    entries: RwLock<HashMap<String, CounterEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    /// Create an empty store on the system clock
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    /// Create an empty store on a custom clock
    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Physically stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    async fn get_entry(&self, key: &str) -> Result<Option<CounterEntry>> {
        if key.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now_millis();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .cloned())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<i64>> {
        if key.is_empty() {
            return Ok(None);
        }
        Ok(self.entries.read().get(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: Option<i64>, expiry_at: i64) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        if key.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_millis();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.expiry_at = normalize_expiry(expiry_at);
                entry.updated_at = now;
            }
            None => {
                entries.insert(key.to_string(), CounterEntry::new(key, value, expiry_at, now));
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if !key.is_empty() {
            self.entries.write().remove(key);
        }
        Ok(())
    }

    async fn weak_compare_and_set(&self, key: &str, expect: Option<i64>, update: i64) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }

        let expect = expect.unwrap_or(0);
        let now = self.clock.now_millis();
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if entry.value == expect => {
                entry.value = update;
                entry.updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None if expect == 0 => {
                entries.insert(key.to_string(), CounterEntry::new(key, update, 0, now));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn key_set(&self, value: Option<i64>) -> Result<HashSet<String>> {
        let now = self.clock.now_millis();
        let entries = self.entries.read();
        Ok(entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .filter(|e| value.map_or(true, |v| e.value == v))
            .map(|e| e.key.clone())
            .collect())
    }

    async fn get_expiry_raw(&self, key: &str) -> Result<i64> {
        if key.is_empty() {
            return Ok(-1);
        }
        Ok(self
            .entries
            .read()
            .get(key)
            .map_or(-1, |e| e.expiry_at))
    }

    async fn set_expiry_raw(&self, key: &str, expiry_at: i64) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }

        let now = self.clock.now_millis();
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.expiry_at = normalize_expiry(expiry_at);
            entry.updated_at = now;
        }
        Ok(())
    }

    async fn system_setup(&self) -> Result<()> {
        Ok(())
    }

    async fn system_destroy(&self) -> Result<()> {
        self.entries.write().clear();
        debug!(store = %self.name, "destroyed in-memory store");
        Ok(())
    }

    async fn maintenance(&self) -> Result<u64> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        let removed = (before - entries.len()) as u64;
        drop(entries);

        if removed > 0 {
            debug!(store = %self.name, removed, "swept expired entries");
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}
