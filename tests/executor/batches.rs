//! Batch atomicity and index attribution against SQLite.

use crate::common::*;
use sluice::{BatchOptions, DatabaseErrorKind, PlanNode, Request, Value};
use tempfile::TempDir;

fn open_account(id: i64, owner: &str) -> Request {
    Request::new(PlanNode::raw_execute(
        "INSERT INTO accounts (id, owner, balance) VALUES (?, ?, 0)",
        vec![sluice::Arg::literal(id), sluice::Arg::literal(owner)],
    ))
}

#[tokio::test]
async fn atomic_batch_leaves_no_trace_of_earlier_statements() {
    let executor = memory_executor();
    create_accounts(&executor).await;
    exec(&executor, "INSERT INTO accounts VALUES (10, 'existing', 0)", vec![]).await;

    let batch = vec![
        open_account(1, "ada"),
        open_account(10, "duplicate"),
        open_account(2, "grace"),
    ];
    let results = executor.execute_many(batch, BatchOptions::atomic()).await;

    assert_eq!(results.len(), 3);
    for result in &results {
        let err = result.as_ref().unwrap_err();
        assert_eq!(err.batch_index(), Some(1));
        assert_eq!(err.database_kind(), Some(DatabaseErrorKind::UniqueConstraintViolation));
    }
    let rows = query(&executor, "SELECT id FROM accounts ORDER BY id", vec![]).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(field(&rows[0], "id"), &Value::Int(10));
}

#[tokio::test]
async fn atomic_batch_commits_together() {
    let executor = memory_executor();
    create_accounts(&executor).await;

    let values = executor
        .execute_transaction(vec![open_account(1, "ada"), open_account(2, "grace")], None)
        .await
        .unwrap();
    assert_eq!(values, vec![Value::Int(1), Value::Int(1)]);
    assert_eq!(query(&executor, "SELECT id FROM accounts", vec![]).await.len(), 2);
}

#[tokio::test]
async fn independent_batch_isolates_the_failing_item() {
    let dir = TempDir::new().unwrap();
    let executor = file_executor(&dir.path().join("batch.db"));
    create_accounts(&executor).await;
    exec(&executor, "INSERT INTO accounts VALUES (99, 'existing', 0)", vec![]).await;

    let batch = vec![
        open_account(1, "a"),
        open_account(2, "b"),
        open_account(99, "clash"),
        open_account(3, "c"),
        open_account(4, "d"),
    ];
    let results = executor.execute_many(batch, BatchOptions::independent()).await;

    for (index, result) in results.iter().enumerate() {
        match index {
            2 => assert_eq!(result.as_ref().unwrap_err().batch_index(), Some(2)),
            _ => assert_eq!(result.as_ref().unwrap(), &Value::Int(1)),
        }
    }
    let rows = query(&executor, "SELECT id FROM accounts ORDER BY id", vec![]).await;
    let ids: Vec<_> = rows.iter().map(|r| field(r, "id").clone()).collect();
    assert_eq!(ids, [1, 2, 3, 4, 99].map(Value::Int).to_vec());
}

#[tokio::test]
async fn grouped_reads_are_aligned_with_requests() {
    let executor = memory_executor();
    create_accounts(&executor).await;
    exec(&executor, "INSERT INTO accounts VALUES (1, 'ada', 5), (2, 'grace', 7)", vec![]).await;

    let reads = vec![
        Request::new(PlanNode::raw_query("SELECT owner FROM accounts WHERE id = 2", vec![])),
        Request::new(PlanNode::raw_query("SELECT owner FROM accounts ORDER BY id", vec![])),
        Request::new(PlanNode::raw_query("SELECT owner FROM accounts WHERE id = 3", vec![])),
    ];
    let results = executor.execute_many(reads, BatchOptions::default()).await;

    let first = results[0].as_ref().unwrap().as_list().unwrap().to_vec();
    assert_eq!(field(&first[0], "owner"), &Value::from("grace"));
    assert_eq!(results[1].as_ref().unwrap().as_list().unwrap().len(), 2);
    assert!(results[2].as_ref().unwrap().as_list().unwrap().is_empty());
}

#[tokio::test]
async fn cte_write_is_never_grouped_with_reads() {
    let dir = TempDir::new().unwrap();
    let executor = file_executor(&dir.path().join("cte.db"));
    create_accounts(&executor).await;
    exec(&executor, "INSERT INTO accounts VALUES (1, 'ada', 0), (2, 'grace', 0)", vec![]).await;

    let batch = vec![
        Request::new(PlanNode::raw_query("SELECT id FROM accounts", vec![])),
        Request::new(PlanNode::raw_query(
            "WITH doomed AS (SELECT 1 AS id) DELETE FROM accounts WHERE id IN (SELECT id FROM doomed)",
            vec![],
        )),
        Request::new(PlanNode::raw_query("SELECT * FROM missing_table", vec![])),
    ];
    let results = executor.execute_many(batch, BatchOptions::independent()).await;

    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert_eq!(results[2].as_ref().unwrap_err().batch_index(), Some(2));
    let rows = query(&executor, "SELECT id FROM accounts", vec![]).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(field(&rows[0], "id"), &Value::Int(2));
}
