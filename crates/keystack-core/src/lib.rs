//! # keystack-core
//!
//! Backend-agnostic atomic counter maps.
//!
//! A [`CounterStore`] maps string keys to signed 64-bit counters with an
//! optional expiry. Two backends implement the same contract:
//!
//! - [`MemoryCounterStore`]: a locked in-process map
//! - [`RelationalCounterStore`]: one table behind a [`keystack_rdbc::RelationalConnector`]
//!
//! Both share compare-and-set semantics, bounded optimistic retries for
//! arithmetic and lazy expiry with an explicit maintenance sweep.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keystack_core::prelude::*;
//!
//! let registry = StackRegistry::from_config(StackConfig::relational("sqlite::memory:"))?;
//! let hits = registry.key_long_map("page_hits").await?;
//!
//! hits.increment_and_get("home").await?;
//! hits.put_with_lifespan("session", 1, 30_000).await?;
//! assert_eq!(hits.get("home").await?, Some(1));
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - lets [`StackRegistry::from_config`] open `sqlite:` URLs (default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod maintenance;
pub mod memory;
pub mod registry;
pub mod relational;
pub mod store;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::StackConfig;
    pub use crate::entry::CounterEntry;
    pub use crate::error::{Error, Result};
    pub use crate::maintenance::MaintenanceHandle;
    pub use crate::memory::MemoryCounterStore;
    pub use crate::registry::{StackRegistry, StructureKind};
    pub use crate::relational::RelationalCounterStore;
    pub use crate::store::{BackendKind, CounterStore, GET_AND_ADD_MAX_ATTEMPTS};
}

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StackConfig;
pub use entry::CounterEntry;
pub use error::{Error, Result};
pub use maintenance::MaintenanceHandle;
pub use memory::MemoryCounterStore;
pub use registry::{StackRegistry, StructureKind};
pub use relational::RelationalCounterStore;
pub use store::{BackendKind, CounterStore, GET_AND_ADD_MAX_ATTEMPTS};
