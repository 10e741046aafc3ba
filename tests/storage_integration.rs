//! Integration tests for the record storage layer.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::too_many_lines
)]

mod common;

use common::{Setting, connected, setting_table, settings};
use recordstore::{
    ConnectionState, DataType, Database, DatabaseConfig, Error, Query, RecordField, Request,
    Table, UpsertOutcome,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_example_scenario() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let example = settings(&db).await;

    example.insert_record(&Setting::new("a", "v1")).await.unwrap();
    let first = example.get_first_record(None).await.unwrap().unwrap();
    assert_eq!(first.value, "v1");

    example.insert_record(&Setting::new("a", "v2")).await.unwrap();
    assert_eq!(example.get_amount_of_records(None).await.unwrap(), 1);

    let query = Query::new().with_match("identifier", "a");
    let found = example.get_first_record(Some(&query)).await.unwrap().unwrap();
    assert_eq!(found.value, "v2");
}

#[tokio::test]
async fn test_upsert_is_idempotent_and_last_write_wins() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let example = settings(&db).await;

    let first = example.insert_record(&Setting::new("k", "one"));
    let second = example.insert_record(&Setting::new("k", "two"));
    let third = example.insert_record(&Setting::new("k", "two"));
    assert_eq!(first.await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(second.await.unwrap(), UpsertOutcome::Updated);
    assert_eq!(third.await.unwrap(), UpsertOutcome::Updated);

    let all = example.get_record_list(None).await.unwrap();
    assert_eq!(all, vec![Setting::new("k", "two")]);
}

#[tokio::test]
async fn test_requests_run_in_submission_order() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let seen = Arc::clone(&seen);
            db.add_request(Request::new("append", move |_conn| {
                seen.lock().unwrap().push(i);
                Ok(i)
            }))
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), i);
    }
    assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_read_modify_write_from_many_tasks_is_serialized() {
    let db = connected(DatabaseConfig::in_memory()).await;
    db.execute(
        "create_counter",
        "CREATE TABLE counter (id INTEGER PRIMARY KEY, hits INTEGER NOT NULL)",
    )
    .await
    .unwrap();
    db.execute("seed_counter", "INSERT INTO counter (id, hits) VALUES (1, 0)")
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..25 {
                db.add_request(Request::new("increment", |conn| {
                    let hits: i64 = conn
                        .query_row("SELECT hits FROM counter WHERE id = 1", [], |row| {
                            row.get(0)
                        })
                        .map_err(|e| Error::InvalidInput(e.to_string()))?;
                    conn.execute("UPDATE counter SET hits = ?1 WHERE id = 1", [hits + 1])
                        .map_err(|e| Error::InvalidInput(e.to_string()))?;
                    Ok(())
                }))
                .await
                .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let hits = db
        .add_request(Request::new("read_counter", |conn| {
            conn.query_row("SELECT hits FROM counter WHERE id = 1", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| Error::InvalidInput(e.to_string()))
        }))
        .await
        .unwrap();
    assert_eq!(hits, 200);
}

#[tokio::test]
async fn test_reconnect_preserves_registry_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let db = connected(DatabaseConfig::new(path.to_string_lossy())).await;
    let example = settings(&db).await;
    example.insert_record(&Setting::new("a", "v1")).await.unwrap();
    let columns = example.get_column_names().await.unwrap();

    db.disconnect(true).await.unwrap();
    assert!(db.is_connected());

    let again = db.selection::<Setting>().unwrap();
    assert_eq!(again.get_column_names().await.unwrap(), columns);
    assert_eq!(
        again.get_first_record(None).await.unwrap(),
        Some(Setting::new("a", "v1"))
    );
}

#[tokio::test]
async fn test_reconnect_preserves_registry_in_memory() {
    let db = connected(DatabaseConfig::in_memory().with_table_prefix("app_")).await;
    let example = settings(&db).await;
    example.insert_record(&Setting::new("a", "v1")).await.unwrap();
    let columns = example.get_column_names().await.unwrap();
    assert!(columns.is_some());

    db.disconnect(true).await.unwrap();

    // A fresh in-memory database: rows are gone, the table is not.
    assert_eq!(example.get_column_names().await.unwrap(), columns);
    assert_eq!(example.get_amount_of_records(None).await.unwrap(), 0);
    assert_eq!(db.table::<Setting>().unwrap().name(), "app_example");
}

#[tokio::test]
async fn test_disconnect_holds_later_requests_until_connect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let db = connected(DatabaseConfig::new(path.to_string_lossy())).await;
    let example = settings(&db).await;
    let insert = example.insert_record(&Setting::new("a", "v1"));

    db.disconnect(false).await.unwrap();
    assert_eq!(db.state(), ConnectionState::Disconnected);
    // Submitted before the disconnect, so it already ran.
    assert_eq!(insert.await.unwrap(), UpsertOutcome::Inserted);

    let count = example.get_amount_of_records(None);
    tokio::task::yield_now().await;
    assert_eq!(db.pending_requests(), 1);

    db.connect().await.unwrap();
    assert_eq!(count.await.unwrap(), 1);
}

#[tokio::test]
async fn test_cancel_before_execution() {
    let db = Database::new(DatabaseConfig::in_memory());
    let example = db.create_table(setting_table());
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let handle = db.add_request(Request::new("flagged", move |_conn| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }));

    assert!(handle.cancel());
    assert!(handle.is_cancelled());
    assert!(!handle.cancel());

    db.connect().await.unwrap();
    let example = example.await.unwrap();
    assert_eq!(example.get_amount_of_records(None).await.unwrap(), 0);
    assert!(!ran.load(Ordering::SeqCst));

    let err = handle.await.unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
}

#[tokio::test]
async fn test_cancelled_handle_into_optional() {
    let db = Database::new(DatabaseConfig::in_memory());
    let handle = db.execute("noop", "CREATE TABLE never (x INTEGER)");
    handle.cancel();
    db.connect().await.unwrap();
    assert_eq!(handle.into_optional().await.unwrap(), None);

    let finished = db.execute("create", "CREATE TABLE t (x INTEGER)");
    let finished_state = finished.into_optional().await.unwrap();
    assert_eq!(finished_state, Some(0));
}

#[tokio::test]
async fn test_cancel_after_completion_has_no_effect() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let example = settings(&db).await;
    let handle = example.insert_record(&Setting::new("a", "v1"));
    // Ordering makes the count run after the insert.
    assert_eq!(example.get_amount_of_records(None).await.unwrap(), 1);
    assert!(!handle.cancel());
    assert_eq!(handle.await.unwrap(), UpsertOutcome::Inserted);
}

#[tokio::test]
async fn test_dropped_handle_abandons_request() {
    let db = Database::new(DatabaseConfig::in_memory());
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    drop(db.add_request(Request::new("flagged", move |_conn| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    })));

    db.connect().await.unwrap();
    db.execute("barrier", "CREATE TABLE IF NOT EXISTS barrier (x INTEGER)").await.unwrap();
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(db.pending_requests(), 0);
}

#[tokio::test]
async fn test_record_missing_declared_field_is_schema_mismatch() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let table = Table::<Setting>::new(
        "wide",
        vec![
            RecordField::primary("identifier", DataType::String),
            RecordField::new("value", DataType::String),
            RecordField::new("extra", DataType::Long),
        ],
    )
    .unwrap();
    let wide = db.create_table(table).await.unwrap();

    let err = wide.insert_record(&Setting::new("a", "v")).await.unwrap_err();
    match err {
        Error::SchemaMismatch { table, detail } => {
            assert_eq!(table, "wide");
            assert!(detail.contains("extra"), "{detail}");
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(wide.get_amount_of_records(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_table_without_primary_field_is_rejected() {
    let result = Table::<Setting>::new("loose", vec![RecordField::new("value", DataType::String)]);
    assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
}

#[tokio::test]
async fn test_remove_all_with_query_and_empty_query() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let example = settings(&db).await;
    for (id, value) in [("a", "keep"), ("b", "drop"), ("c", "drop")] {
        example.insert_record(&Setting::new(id, value)).await.unwrap();
    }

    let removed = example
        .remove_all_records(&Query::new().with_match("value", "drop"))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(
        example.get_record_list(None).await.unwrap(),
        vec![Setting::new("a", "keep")]
    );

    let removed = example.remove_all_records(&Query::new()).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(example.get_amount_of_records(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_add_column_is_visible_in_column_names() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let example = settings(&db).await;
    example
        .add_column(&RecordField::new("note", DataType::String).with_max_size(40))
        .await
        .unwrap();
    assert_eq!(
        example.get_column_names().await.unwrap().unwrap(),
        vec!["identifier", "value", "note"]
    );

    // Rows written through the registered schema still work.
    example.insert_record(&Setting::new("a", "v")).await.unwrap();
    assert_eq!(example.get_amount_of_records(None).await.unwrap(), 1);

    let err = example
        .add_column(&RecordField::new("note", DataType::String))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Statement { .. }));
}

#[tokio::test]
async fn test_connect_failure_then_retry() {
    let dir = tempfile::tempdir().unwrap();
    let missing_dir = dir.path().join("later");
    let path = missing_dir.join("store.db");
    let db = Database::new(DatabaseConfig::new(path.to_string_lossy()));
    let pending = db.execute("early_create", "CREATE TABLE early (x INTEGER)");

    assert!(matches!(db.connect().await, Err(Error::Connection { .. })));
    assert_eq!(db.state(), ConnectionState::Disconnected);

    std::fs::create_dir_all(&missing_dir).unwrap();
    db.connect().await.unwrap();
    assert_eq!(db.state(), ConnectionState::Connected);
    assert_eq!(pending.await.unwrap(), 0);
}

#[tokio::test]
async fn test_rejected_insert_reports_operation_and_statement() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let example = settings(&db).await;
    // Key column only: the key lookup succeeds and the insert is rejected.
    db.execute("drop_table", "DROP TABLE example").await.unwrap();
    db.execute(
        "recreate_table",
        "CREATE TABLE example (identifier TEXT PRIMARY KEY)",
    )
    .await
    .unwrap();

    let err = example
        .insert_record(&Setting::new("a", "v"))
        .await
        .unwrap_err();
    match err {
        Error::Statement {
            operation,
            statement,
            cause,
        } => {
            assert_eq!(operation, "insert_record");
            assert!(statement.contains("INSERT"), "{statement}");
            assert!(cause.contains("value"), "{cause}");
        },
        other => panic!("expected a statement error, got {other:?}"),
    }

    // The failed upsert rolled back and the queue keeps serving.
    assert_eq!(example.get_amount_of_records(None).await.unwrap(), 0);
    assert_eq!(db.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_rejected_select_reports_operation_and_statement() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let example = settings(&db).await;
    db.execute("drop_table", "DROP TABLE example").await.unwrap();

    let err = example.get_record_list(None).await.unwrap_err();
    assert!(matches!(
        &err,
        Error::Statement { operation, statement, .. }
            if operation == "get_record_list" && statement.contains("SELECT")
    ));

    // Reconnecting in memory recreates the registered table.
    db.disconnect(true).await.unwrap();
    example.insert_record(&Setting::new("b", "back")).await.unwrap();
    assert_eq!(example.get_amount_of_records(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_panicking_request_leaves_queue_running() {
    let db = connected(DatabaseConfig::in_memory()).await;
    let example = settings(&db).await;

    let boom = db.add_request(Request::new("boom", |_conn| -> recordstore::Result<()> {
        panic!("request body failed")
    }));
    let after = example.insert_record(&Setting::new("a", "v"));

    assert!(matches!(
        boom.await,
        Err(Error::OperationFailed { operation, cause })
            if operation == "boom" && cause.contains("request body failed")
    ));
    assert_eq!(after.await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(db.state(), ConnectionState::Connected);
    assert_eq!(example.get_amount_of_records(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_unsafe_table_prefix_is_rejected_at_create() {
    let db = connected(DatabaseConfig::in_memory().with_table_prefix("app{where}")).await;
    let result = db.create_table(setting_table()).await;
    assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
    assert!(db.table::<Setting>().is_none());
}
