//! Counter entry model

use serde::{Deserialize, Serialize};

/// One stored counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterEntry {
    /// Case-sensitive key
    pub key: String,
    /// Raw stored value
    pub value: i64,
    /// Expiry in epoch milliseconds, `0` for never
    pub expiry_at: i64,
    /// Insert time in epoch milliseconds
    pub created_at: i64,
    /// Last write time in epoch milliseconds
    pub updated_at: i64,
}

impl CounterEntry {
    /// New entry written at `now`
    pub fn new(key: impl Into<String>, value: i64, expiry_at: i64, now: i64) -> Self {
        Self {
            key: key.into(),
            value,
            expiry_at: normalize_expiry(expiry_at),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the entry carries an expiry at all
    #[inline]
    pub fn has_expiry(&self) -> bool {
        self.expiry_at > 0
    }

    /// Logically absent at `now`; still valid exactly at its expiry instant
    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry_at > 0 && self.expiry_at < now
    }
}

/// Map non-positive expiry values to "never"
#[inline]
pub(crate) fn normalize_expiry(expiry_at: i64) -> i64 {
    expiry_at.max(0)
}
