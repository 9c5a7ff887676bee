//! Interactive transactions against SQLite.

use std::time::Duration;

use crate::common::*;
use sluice::{
    CancellationToken, ClosedReason, Error, Executor, IsolationLevel, PlanNode, Request, TransactionOptions,
    Value,
};

fn deposit(id: i64, amount: i64) -> PlanNode {
    PlanNode::raw_execute(
        "UPDATE accounts SET balance = balance + ? WHERE id = ?",
        vec![sluice::Arg::literal(amount), sluice::Arg::literal(id)],
    )
}

async fn seeded() -> Executor {
    let executor = memory_executor();
    create_accounts(&executor).await;
    exec(&executor, "INSERT INTO accounts VALUES (1, 'ada', 0)", vec![]).await;
    executor
}

async fn balance(executor: &Executor) -> Value {
    let rows = query(executor, "SELECT balance FROM accounts WHERE id = 1", vec![]).await;
    field(&rows[0], "balance").clone()
}

#[tokio::test]
async fn commit_makes_every_step_visible() {
    let executor = seeded().await;
    let mut session = executor.session();
    session.begin(None).await.unwrap();
    session.execute(Request::new(deposit(1, 5))).await.unwrap();
    session.execute(Request::new(deposit(1, 7))).await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(balance(&executor).await, Value::Int(12));
}

#[tokio::test]
async fn explicit_rollback_discards_steps() {
    let executor = seeded().await;
    let id = executor.start_transaction(None).await.unwrap();
    executor
        .execute(Request::new(deposit(1, 5)).in_transaction(id))
        .await
        .unwrap();
    executor.rollback_transaction(id).await.unwrap();
    assert_eq!(balance(&executor).await, Value::Int(0));

    let err = executor.commit_transaction(id).await.unwrap_err();
    assert!(matches!(err, Error::TransactionClosed { reason: ClosedReason::RolledBack, .. }));
}

#[tokio::test]
async fn cancellation_between_steps_rolls_back() {
    let executor = seeded().await;
    let id = executor.start_transaction(None).await.unwrap();
    let cancel = CancellationToken::new();

    let steps = [deposit(1, 1), deposit(1, 10), deposit(1, 100)];
    let mut outcome = Ok(Value::Null);
    for (n, step) in steps.into_iter().enumerate() {
        if n == 2 {
            cancel.cancel();
        }
        outcome = executor
            .execute_with_cancel(Request::new(step).in_transaction(id), cancel.clone())
            .await;
        if outcome.is_err() {
            break;
        }
    }

    assert_eq!(outcome.unwrap_err(), Error::Cancelled);
    assert!(!executor.transactions().is_open(id));
    assert_eq!(balance(&executor).await, Value::Int(0));
}

#[tokio::test]
async fn idle_transaction_expires() {
    let executor = seeded().await;
    let options = TransactionOptions {
        idle_timeout: Duration::from_millis(60),
        ..TransactionOptions::default()
    };
    let id = executor.start_transaction(Some(options)).await.unwrap();
    executor
        .execute(Request::new(deposit(1, 5)).in_transaction(id))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    let err = executor
        .execute(Request::new(deposit(1, 5)).in_transaction(id))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransactionClosed { reason: ClosedReason::TimedOut, .. }));
    assert_eq!(balance(&executor).await, Value::Int(0));
    assert_eq!(executor.pool_status().in_use, 0);
}

#[tokio::test]
async fn unsupported_isolation_is_rejected_up_front() {
    let executor = seeded().await;
    let options = TransactionOptions {
        isolation_level: Some(IsolationLevel::ReadCommitted),
        ..TransactionOptions::default()
    };
    let err = executor.start_transaction(Some(options)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidIsolationLevel { .. }));
    assert_eq!(executor.transactions().open_count(), 0);

    let serializable = TransactionOptions {
        isolation_level: Some(IsolationLevel::Serializable),
        ..TransactionOptions::default()
    };
    let id = executor.start_transaction(Some(serializable)).await.unwrap();
    executor.commit_transaction(id).await.unwrap();
}

#[tokio::test]
async fn transaction_node_inside_interactive_transaction() {
    let executor = seeded().await;
    let mut session = executor.session();
    session.begin(None).await.unwrap();
    session.execute(Request::new(deposit(1, 5))).await.unwrap();
    session
        .execute(Request::new(PlanNode::transaction(deposit(1, 100))))
        .await
        .unwrap();
    session.commit().await.unwrap();
    assert_eq!(balance(&executor).await, Value::Int(105));
}

#[tokio::test]
async fn failure_inside_nested_scope_rolls_back_everything() {
    let executor = seeded().await;
    let mut session = executor.session();
    session.begin(None).await.unwrap();
    session.execute(Request::new(deposit(1, 5))).await.unwrap();

    let failing = PlanNode::transaction(PlanNode::Seq(vec![
        deposit(1, 100),
        PlanNode::raw_execute("INSERT INTO accounts VALUES (1, 'dup', 0)", vec![]),
    ]));
    assert!(session.execute(Request::new(failing)).await.is_err());
    assert!(!session.in_transaction());
    assert_eq!(balance(&executor).await, Value::Int(0));
}
