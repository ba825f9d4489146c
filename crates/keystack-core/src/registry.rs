//! Named structure registry
//!
//! A registry caches one structure per case-insensitive name and creates it
//! on the configured backend on first request. Asking for a cached name under
//! a different structure kind is a configuration error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keystack_rdbc::RelationalConnector;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::StackConfig;
use crate::error::{Error, Result};
use crate::maintenance::MaintenanceHandle;
use crate::memory::MemoryCounterStore;
use crate::relational::RelationalCounterStore;
use crate::store::{BackendKind, CounterStore};

/// Kinds of data structure a stack can host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureKind {
    /// String-keyed atomic counters
    KeyLongMap,
    /// String-keyed string values
    KeyValueMap,
    /// Structured objects
    DataObjectMap,
    /// File-like blobs
    FileWorkspaceMap,
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyLongMap => write!(f, "KeyLongMap"),
            Self::KeyValueMap => write!(f, "KeyValueMap"),
            Self::DataObjectMap => write!(f, "DataObjectMap"),
            Self::FileWorkspaceMap => write!(f, "FileWorkspaceMap"),
        }
    }
}

struct CachedStructure {
    kind: StructureKind,
    store: Arc<dyn CounterStore>,
}

/// Factory and cache of named counter stores
pub struct StackRegistry {
    config: StackConfig,
    connector: Option<Arc<RelationalConnector>>,
    clock: Arc<dyn Clock>,
    cache: Mutex<HashMap<String, CachedStructure>>,
}

impl fmt::Debug for StackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackRegistry")
            .field("config", &self.config)
            .field("connector", &self.connector)
            .field("cached", &self.cached_names())
            .finish()
    }
}

impl StackRegistry {
    /// Build a registry from configuration
    ///
    /// The relational backend opens its connection from `url`; only
    /// `sqlite:` URLs have a built-in driver, other engines go through
    /// [`with_connector`](Self::with_connector).
    pub fn from_config(config: StackConfig) -> Result<Self> {
        config.validate()?;
        let connector = match config.backend {
            BackendKind::Memory => None,
            BackendKind::Relational => Some(Arc::new(open_connector(&config)?)),
        };
        Ok(Self::assemble(config, connector))
    }

    /// Registry on the in-memory backend with default settings
    pub fn in_memory() -> Self {
        Self::assemble(StackConfig::memory(), None)
    }

    /// Relational registry over an existing connector
    pub fn with_connector(config: StackConfig, connector: Arc<RelationalConnector>) -> Result<Self> {
        config.validate()?;
        let config = config.with_backend(BackendKind::Relational);
        Ok(Self::assemble(config, Some(connector)))
    }

    fn assemble(config: StackConfig, connector: Option<Arc<RelationalConnector>>) -> Self {
        info!(
            backend = %config.backend,
            table_prefix = %config.table_prefix,
            "stack registry ready"
        );
        Self {
            config,
            connector,
            clock: Arc::new(SystemClock),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Use `clock` for every store created from now on
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Cache key for a structure name
    pub fn normalize_name(name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Configuration("structure name cannot be empty".into()));
        }
        Ok(name.to_uppercase())
    }

    /// Counter map named `name`, created on first use
    pub async fn key_long_map(&self, name: &str) -> Result<Arc<dyn CounterStore>> {
        self.get_store(name, StructureKind::KeyLongMap).await
    }

    /// Structure `name` of `kind`, created on first use
    ///
    /// A name already cached under another kind fails with
    /// [`Error::IncompatibleStructure`]; kinds other than
    /// [`StructureKind::KeyLongMap`] are otherwise [`Error::Unsupported`].
    pub async fn get_store(&self, name: &str, kind: StructureKind) -> Result<Arc<dyn CounterStore>> {
        let name = Self::normalize_name(name)?;
        if let Some(store) = self.lookup(&name, kind)? {
            return Ok(store);
        }
        if kind != StructureKind::KeyLongMap {
            return Err(Error::Unsupported(format!(
                "{} '{}' is not provided by this stack",
                kind, name
            )));
        }

        let store = self.build_store(&name)?;
        if self.config.auto_setup {
            store.system_setup().await?;
        }

        let mut cache = self.cache.lock();
        let cached = cache.entry(name.clone()).or_insert_with(|| CachedStructure {
            kind,
            store: Arc::clone(&store),
        });
        if cached.kind != kind {
            return Err(Error::IncompatibleStructure {
                name,
                cached: cached.kind,
                requested: kind,
            });
        }
        debug!(name = %name, kind = %kind, backend = %cached.store.kind(), "structure cached");
        Ok(Arc::clone(&cached.store))
    }

    fn lookup(&self, name: &str, kind: StructureKind) -> Result<Option<Arc<dyn CounterStore>>> {
        let cache = self.cache.lock();
        match cache.get(name) {
            Some(cached) if cached.kind == kind => Ok(Some(Arc::clone(&cached.store))),
            Some(cached) => Err(Error::IncompatibleStructure {
                name: name.to_string(),
                cached: cached.kind,
                requested: kind,
            }),
            None => Ok(None),
        }
    }

    fn build_store(&self, name: &str) -> Result<Arc<dyn CounterStore>> {
        match self.config.backend {
            BackendKind::Memory => Ok(Arc::new(MemoryCounterStore::with_clock(
                name,
                Arc::clone(&self.clock),
            ))),
            BackendKind::Relational => {
                let connector = self.connector.clone().ok_or_else(|| {
                    Error::Configuration("relational backend has no connector".into())
                })?;
                Ok(Arc::new(RelationalCounterStore::with_clock(
                    connector,
                    &self.config.table_prefix,
                    name,
                    Arc::clone(&self.clock),
                )?))
            }
        }
    }

    /// Drop `name` from the cache without touching its storage
    ///
    /// Returns whether an entry was removed. The next request creates a
    /// fresh structure instance.
    pub fn evict(&self, name: &str) -> bool {
        match Self::normalize_name(name) {
            Ok(name) => self.cache.lock().remove(&name).is_some(),
            Err(_) => false,
        }
    }

    /// Names currently cached, sorted
    pub fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn cached_stores(&self) -> Vec<Arc<dyn CounterStore>> {
        self.cache
            .lock()
            .values()
            .map(|c| Arc::clone(&c.store))
            .collect()
    }

    /// Run `system_setup` on every cached structure
    pub async fn system_setup_all(&self) -> Result<()> {
        for store in self.cached_stores() {
            store.system_setup().await?;
        }
        Ok(())
    }

    /// Run `system_destroy` on every cached structure
    pub async fn system_destroy_all(&self) -> Result<()> {
        for store in self.cached_stores() {
            store.system_destroy().await?;
        }
        Ok(())
    }

    /// Run `maintenance` on every cached structure, returns entries removed
    pub async fn maintenance_all(&self) -> Result<u64> {
        let mut removed = 0;
        for store in self.cached_stores() {
            removed += store.maintenance().await?;
        }
        Ok(removed)
    }

    /// Start the periodic maintenance sweep
    ///
    /// `Ok(None)` when `maintenance_interval_ms` is `0`.
    pub fn spawn_maintenance(self: &Arc<Self>) -> Result<Option<MaintenanceHandle>> {
        match self.config.maintenance_interval() {
            Some(interval) => MaintenanceHandle::spawn(Arc::clone(self), interval).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(feature = "sqlite")]
fn open_connector(config: &StackConfig) -> Result<RelationalConnector> {
    use keystack_rdbc::sqlite::SqliteConnectionFactory;
    use keystack_rdbc::{ConnectionConfig, DatabaseType};

    let url = config
        .url
        .as_deref()
        .ok_or_else(|| Error::Configuration("relational backend needs a url".into()))?;
    let conn_config = ConnectionConfig::new(url).with_application_name("keystack");

    match conn_config.database_type() {
        DatabaseType::SQLite => {
            let conn = SqliteConnectionFactory.open(&conn_config)?;
            debug!(config = ?conn_config, "opened sqlite connection");
            Ok(RelationalConnector::for_connection(Arc::new(conn)))
        }
        other => Err(Error::Configuration(format!(
            "no built-in driver for {}; build the registry with StackRegistry::with_connector",
            other
        ))),
    }
}

#[cfg(not(feature = "sqlite"))]
fn open_connector(config: &StackConfig) -> Result<RelationalConnector> {
    let _ = config;
    Err(Error::Configuration(
        "built without the sqlite driver; build the registry with StackRegistry::with_connector"
            .into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_names_are_case_insensitive() {
        let registry = StackRegistry::in_memory();
        let a = registry.key_long_map("hits").await.unwrap();
        let b = registry.key_long_map("HiTs").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "HITS");
        assert_eq!(registry.cached_names(), vec!["HITS".to_string()]);
    }

    #[tokio::test]
    async fn test_kind_conflict_is_reported_before_unsupported() {
        let registry = StackRegistry::in_memory();
        registry.key_long_map("users").await.unwrap();

        let err = registry
            .get_store("USERS", StructureKind::KeyValueMap)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::IncompatibleStructure {
                cached: StructureKind::KeyLongMap,
                requested: StructureKind::KeyValueMap,
                ..
            }
        ));

        let err = registry
            .get_store("files", StructureKind::FileWorkspaceMap)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert_eq!(registry.cached_names().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let registry = StackRegistry::in_memory();
        assert!(matches!(
            registry.key_long_map("  ").await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_evict_creates_fresh_instance() {
        let registry = StackRegistry::in_memory();
        let first = registry.key_long_map("hits").await.unwrap();
        first.put("a", 1).await.unwrap();

        assert!(registry.evict("Hits"));
        assert!(!registry.evict("Hits"));

        let second = registry.key_long_map("hits").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.get("a").await.unwrap(), None);
    }

    #[test]
    fn test_relational_needs_url() {
        let err = StackRegistry::from_config(StackConfig::new().with_backend(BackendKind::Relational))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_unsupported_scheme_needs_connector() {
        let err = StackRegistry::from_config(StackConfig::relational("postgres://localhost/db"))
            .unwrap_err();
        assert!(err.to_string().contains("with_connector"));
    }

    #[test]
    fn test_structure_kind_display() {
        assert_eq!(StructureKind::KeyLongMap.to_string(), "KeyLongMap");
        assert_eq!(StructureKind::DataObjectMap.to_string(), "DataObjectMap");
    }
}
