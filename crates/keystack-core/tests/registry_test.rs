//! Registry lifecycle tests

#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use keystack_core::prelude::*;
use keystack_rdbc::sqlite::SqliteConnection;
use keystack_rdbc::RelationalConnector;

const T0: i64 = 1_700_000_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn relational_registry_from_yaml() {
    init_tracing();
    let config = StackConfig::from_yaml_str(
        r#"
backend: relational
url: "sqlite::memory:"
table_prefix: "T_"
maintenance_interval_ms: 0
"#,
    )
    .unwrap();
    let registry = StackRegistry::from_config(config).unwrap();

    let hits = registry.key_long_map("hits").await.unwrap();
    assert_eq!(hits.kind(), BackendKind::Relational);
    assert_eq!(hits.increment_and_get("home").await.unwrap(), 1);
    assert_eq!(hits.increment_and_get("home").await.unwrap(), 2);

    let again = registry.key_long_map("HITS").await.unwrap();
    assert_eq!(again.get("home").await.unwrap(), Some(2));
}

#[tokio::test]
async fn file_database_survives_registry_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("stack.db").display());

    {
        let registry = StackRegistry::from_config(StackConfig::relational(&url)).unwrap();
        let views = registry.key_long_map("views").await.unwrap();
        views.add_and_get("article-1", 41).await.unwrap();
        views.increment_and_get("article-1").await.unwrap();
    }

    let registry = StackRegistry::from_config(StackConfig::relational(&url)).unwrap();
    let views = registry.key_long_map("Views").await.unwrap();
    assert_eq!(views.get("article-1").await.unwrap(), Some(42));
}

#[tokio::test]
async fn shared_connector_isolates_maps_by_table() {
    init_tracing();
    let conn = Arc::new(SqliteConnection::open_in_memory().unwrap());
    let connector = Arc::new(RelationalConnector::for_connection(conn));
    let registry = StackRegistry::with_connector(StackConfig::memory(), connector).unwrap();
    assert_eq!(registry.config().backend, BackendKind::Relational);

    let a = registry.key_long_map("alpha").await.unwrap();
    let b = registry.key_long_map("beta").await.unwrap();
    a.put("k", 1).await.unwrap();
    b.put("k", 2).await.unwrap();

    assert_eq!(a.get("k").await.unwrap(), Some(1));
    assert_eq!(b.get("k").await.unwrap(), Some(2));
    assert_eq!(registry.cached_names(), vec!["ALPHA".to_string(), "BETA".to_string()]);
}

#[tokio::test]
async fn maintenance_all_sweeps_every_map() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(T0));
    let registry = StackRegistry::in_memory().with_clock(clock.clone());

    let a = registry.key_long_map("a").await.unwrap();
    let b = registry.key_long_map("b").await.unwrap();
    a.set("x", Some(1), T0 + 5).await.unwrap();
    b.set("y", Some(1), T0 + 5).await.unwrap();
    b.put("z", 1).await.unwrap();

    clock.set(T0 + 6);
    assert_eq!(registry.maintenance_all().await.unwrap(), 2);
    assert_eq!(registry.maintenance_all().await.unwrap(), 0);
    assert_eq!(b.get("z").await.unwrap(), Some(1));
}

#[tokio::test]
async fn destroy_then_setup_starts_empty() {
    init_tracing();
    let registry = StackRegistry::from_config(StackConfig::relational("sqlite::memory:")).unwrap();
    let counters = registry.key_long_map("counters").await.unwrap();
    counters.put("a", 1).await.unwrap();

    registry.system_destroy_all().await.unwrap();
    registry.system_setup_all().await.unwrap();

    assert_eq!(counters.get("a").await.unwrap(), None);
    counters.put("a", 2).await.unwrap();
    assert_eq!(counters.get("a").await.unwrap(), Some(2));
}

#[tokio::test]
async fn background_maintenance_removes_expired_entries() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(T0));
    let config = StackConfig::memory().with_maintenance_interval_ms(10);
    let registry = Arc::new(
        StackRegistry::from_config(config)
            .unwrap()
            .with_clock(clock.clone()),
    );

    let sessions = registry.key_long_map("sessions").await.unwrap();
    sessions.set("s1", Some(1), T0 + 5).await.unwrap();
    sessions.put("s2", 1).await.unwrap();

    let handle = registry.spawn_maintenance().unwrap().unwrap();
    clock.set(T0 + 6);

    let mut swept = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if sessions.get_raw("s1").await.unwrap().is_none() {
            swept = true;
            break;
        }
    }
    assert!(swept, "expired entry was not swept");
    assert_eq!(sessions.get("s2").await.unwrap(), Some(1));

    handle.shutdown().await;
}

#[tokio::test]
async fn maintenance_disabled_by_zero_interval() {
    let registry = Arc::new(StackRegistry::from_config(
        StackConfig::memory().with_maintenance_interval_ms(0),
    )
    .unwrap());
    assert!(registry.spawn_maintenance().unwrap().is_none());
}

#[tokio::test]
async fn shutdown_stops_task() {
    let registry = Arc::new(StackRegistry::in_memory());
    let handle = MaintenanceHandle::spawn(Arc::clone(&registry), Duration::from_millis(5)).unwrap();
    assert!(!handle.is_finished());
    handle.shutdown().await;

    assert!(MaintenanceHandle::spawn(registry, Duration::ZERO).is_err());
}

#[test]
fn spawn_outside_runtime_fails() {
    let registry = Arc::new(StackRegistry::in_memory());
    let err = MaintenanceHandle::spawn(registry, Duration::from_millis(5)).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}
