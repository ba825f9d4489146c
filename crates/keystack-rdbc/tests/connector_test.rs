//! Integration tests for the relational connector against embedded SQLite

use std::sync::Arc;

use keystack_rdbc::prelude::*;

fn table(name: &str) -> TableMetadata {
    TableMetadata::new(name)
        .with_column(ColumnMetadata::auto_increment_key("pk"))
        .with_column(ColumnMetadata::new("created_at", ColumnType::BigInt).not_null())
        .with_column(ColumnMetadata::new("counter_key", ColumnType::Varchar(64)).not_null())
        .with_column(ColumnMetadata::new(
            "counter_value",
            ColumnType::Decimal { precision: 36, scale: 12 },
        ))
}

async fn setup(name: &str) -> RelationalConnector {
    let conn = Arc::new(SqliteConnection::open_in_memory().unwrap());
    let connector = RelationalConnector::for_connection(conn);
    connector.create_table(&table(name)).await.unwrap();
    connector.create_index(name, "counter_key", true, "unq").await.unwrap();
    connector.create_index(name, "counter_value", false, "val").await.unwrap();
    connector
}

async fn value_of(connector: &RelationalConnector, table: &str, key: &str) -> Option<i64> {
    let rows = connector
        .select(table, &["counter_value"], Some("counter_key = ?"), &[Value::from(key)])
        .await
        .unwrap();
    rows.first().and_then(|r| r.i64_by_name("counter_value"))
}

#[tokio::test]
async fn test_connector_picks_sqlite_dialect() {
    let connector = RelationalConnector::for_connection(Arc::new(SqliteConnection::open_in_memory().unwrap()));
    assert_eq!(connector.dialect().database_type(), DatabaseType::SQLite);
}

#[tokio::test]
async fn test_setup_is_idempotent() {
    let connector = setup("KL_hits").await;

    connector.create_table(&table("KL_hits")).await.unwrap();
    connector.create_index("KL_hits", "counter_key", true, "unq").await.unwrap();
    connector.create_index("KL_hits", "counter_value", false, "val").await.unwrap();
}

#[tokio::test]
async fn test_upsert_overwrites_insert_columns_and_keeps_defaults() {
    let connector = setup("KL_hits").await;

    let first = UpsertStatement::new("KL_hits")
        .unique("counter_key", "a")
        .insert("counter_value", 1_i64)
        .default("created_at", 100_i64);
    connector.upsert(&first).await.unwrap();

    let second = UpsertStatement::new("KL_hits")
        .unique("counter_key", "a")
        .insert("counter_value", 2_i64)
        .default("created_at", 200_i64);
    connector.upsert(&second).await.unwrap();

    let rows = connector
        .select("KL_hits", &[], Some("counter_key = ?"), &[Value::from("a")])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].i64_by_name("counter_value"), Some(2));
    assert_eq!(rows[0].i64_by_name("created_at"), Some(100));
}

#[tokio::test]
async fn test_insert_if_absent_leaves_existing_row() {
    let connector = setup("KL_hits").await;

    let insert = |v: i64| {
        UpsertStatement::new("KL_hits")
            .unique("counter_key", "a")
            .default("counter_value", v)
            .default("created_at", 0_i64)
    };

    assert_eq!(connector.upsert(&insert(5)).await.unwrap(), 1);
    assert_eq!(connector.upsert(&insert(9)).await.unwrap(), 0);
    assert_eq!(value_of(&connector, "KL_hits", "a").await, Some(5));
}

#[tokio::test]
async fn test_conditional_update_reports_affected_rows() {
    let connector = setup("KL_hits").await;
    connector
        .upsert(
            &UpsertStatement::new("KL_hits")
                .unique("counter_key", "a")
                .insert("counter_value", 1_i64)
                .default("created_at", 0_i64),
        )
        .await
        .unwrap();

    let cas = |expect: i64, update: i64| {
        [Value::Int64(update), Value::from("a"), Value::Int64(expect)]
    };

    let hit = connector
        .conditional_update("KL_hits", "counter_value = ?", "counter_key = ? AND counter_value = ?", &cas(1, 2))
        .await
        .unwrap();
    assert_eq!(hit, 1);

    let miss = connector
        .conditional_update("KL_hits", "counter_value = ?", "counter_key = ? AND counter_value = ?", &cas(1, 3))
        .await
        .unwrap();
    assert_eq!(miss, 0);
    assert_eq!(value_of(&connector, "KL_hits", "a").await, Some(2));
}

#[tokio::test]
async fn test_delete_and_drop() {
    let connector = setup("KL_hits").await;
    for key in ["a", "b", "c"] {
        connector
            .upsert(
                &UpsertStatement::new("KL_hits")
                    .unique("counter_key", key)
                    .insert("counter_value", 1_i64)
                    .default("created_at", 0_i64),
            )
            .await
            .unwrap();
    }

    let removed = connector
        .delete("KL_hits", Some("counter_key = ?"), &[Value::from("a")])
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let removed = connector.delete("KL_hits", None, &[]).await.unwrap();
    assert_eq!(removed, 2);

    connector.drop_table("KL_hits").await.unwrap();
    assert!(connector.select("KL_hits", &[], None, &[]).await.is_err());
    // Dropping twice is fine
    connector.drop_table("KL_hits").await.unwrap();
}

#[tokio::test]
async fn test_rejects_unsafe_input() {
    let connector = setup("KL_hits").await;

    let err = connector
        .select("KL_hits; DROP TABLE x", &[], None, &[])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);

    let err = connector
        .delete("KL_hits", Some("1=1; DROP TABLE KL_hits"), &[])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);

    let err = connector
        .conditional_update("KL_hits", "counter_value = 0 --", "1=1", &[])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[tokio::test]
async fn test_unique_index_is_enforced() {
    let connector = setup("KL_hits").await;
    let conn = connector.connection().clone();

    let sql = "INSERT INTO KL_hits (created_at, counter_key, counter_value) VALUES (?, ?, ?)";
    conn.execute(sql, &[Value::Int64(0), Value::from("a"), Value::Int64(1)])
        .await
        .unwrap();
    let err = conn
        .execute(sql, &[Value::Int64(0), Value::from("a"), Value::Int64(1)])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Constraint);
}
