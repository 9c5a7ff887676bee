//! Determinism and evaluation-order guarantees observed through the executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sluice_core::{Column, ColumnType};
use sluice_driver::{NativeValue, RawResultSet, ScriptedAdapter};

use super::scripted_executor;
use crate::{Arg, Error, Executor, PlanNode, PoolConfig, Request, Rule, TransactionOptions, Value};

fn users() -> RawResultSet {
    RawResultSet::new(
        vec![Column::new("id", ColumnType::Int64), Column::new("name", ColumnType::Text)],
        vec![
            vec![NativeValue::Int64(1), NativeValue::Text("ada".into())],
            vec![NativeValue::Int64(2), NativeValue::Text("grace".into())],
        ],
    )
}

#[tokio::test]
async fn test_repeated_execution_is_identical() {
    let adapter = ScriptedAdapter::new().on_query("FROM users", users());
    let executor = scripted_executor(&adapter);
    let plan = PlanNode::Reverse(Box::new(PlanNode::raw_query("SELECT id, name FROM users", vec![])));

    let first = executor.execute(Request::new(plan.clone())).await.unwrap();
    for _ in 0..5 {
        assert_eq!(executor.execute(Request::new(plan.clone())).await.unwrap(), first);
    }
    assert_eq!(first.as_list().unwrap()[0].as_record().unwrap()["name"], Value::from("grace"));
}

#[tokio::test]
async fn test_now_is_fixed_within_one_execution() {
    let executor = scripted_executor(&ScriptedAdapter::new());
    let plan = PlanNode::Seq(vec![
        PlanNode::Value(Arg::List(vec![Arg::generator("now"), Arg::generator("now")])),
    ]);
    let value = executor.execute(Request::new(plan)).await.unwrap();
    let items = value.as_list().unwrap();
    assert_eq!(items[0], items[1]);
}

#[tokio::test]
async fn test_let_binding_runs_query_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let adapter = ScriptedAdapter::new()
        .on_query("FROM users", users())
        .hook("FROM users", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let executor = scripted_executor(&adapter);
    let body = PlanNode::Concat((0..4).map(|_| PlanNode::get("u")).collect());
    let plan = PlanNode::let_in("u", PlanNode::raw_query("SELECT id, name FROM users", vec![]), body);

    let value = executor.execute(Request::new(plan)).await.unwrap();
    assert_eq!(value.as_list().unwrap().len(), 8);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unselected_branch_never_dispatches() {
    let adapter = ScriptedAdapter::new().on_query("FROM users", users());
    let executor = scripted_executor(&adapter);
    let plan = PlanNode::if_then_else(
        PlanNode::raw_query("SELECT id, name FROM users", vec![]),
        Rule::RowCountNeq(0),
        PlanNode::literal(true),
        PlanNode::raw_execute("INSERT INTO users (name) VALUES ('fallback')", vec![]),
    );
    assert_eq!(executor.execute(Request::new(plan)).await.unwrap(), Value::Bool(true));
    assert_eq!(adapter.count_matching("INSERT"), 0);
}

#[tokio::test]
async fn test_unresolved_placeholder_fails_before_connecting() {
    let adapter = ScriptedAdapter::new();
    let executor = scripted_executor(&adapter);
    let plan = PlanNode::Seq(vec![
        PlanNode::raw_execute("DELETE FROM users", vec![]),
        PlanNode::raw_query("SELECT * FROM users WHERE id = ?", vec![Arg::placeholder("missing")]),
    ]);
    let err = executor.execute(Request::new(plan)).await.unwrap_err();
    assert!(matches!(err, Error::PlanBinding { .. }));
    assert_eq!(adapter.connects(), 0);
}

#[tokio::test]
async fn test_pool_exhaustion_surfaces_error() {
    let adapter = ScriptedAdapter::new();
    let executor = Executor::new(
        Arc::new(adapter.clone()),
        PoolConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(50),
        },
        TransactionOptions::default(),
    );
    let held = executor.start_transaction(None).await.unwrap();

    let err = executor
        .execute(Request::new(PlanNode::raw_query("SELECT 1", vec![])))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { .. }));
    assert!(err.is_retryable());

    executor.rollback_transaction(held).await.unwrap();
    assert!(executor
        .execute(Request::new(PlanNode::raw_query("SELECT 1", vec![])))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_shutdown_rolls_back_open_transactions() {
    let adapter = ScriptedAdapter::new();
    let executor = scripted_executor(&adapter);
    let id = executor.start_transaction(None).await.unwrap();
    executor.shutdown().await;
    assert_eq!(adapter.count_matching("ROLLBACK"), 1);
    assert!(executor.commit_transaction(id).await.is_err());
}
