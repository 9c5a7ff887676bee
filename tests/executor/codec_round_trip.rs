//! Values survive bind and decode through a real backend.

use crate::common::*;
use sluice::{Arg, PlanNode, Request, Timestamp, Value};
use sluice_core::{ArgScalarType, ArgType};
use sluice_engine::DbQuery;

async fn prices_table() -> sluice::Executor {
    let executor = memory_executor();
    exec(
        &executor,
        "CREATE TABLE prices (id INTEGER PRIMARY KEY, amount DECIMAL_TEXT, seen DATETIME, payload BLOB, big INTEGER)",
        vec![],
    )
    .await;
    executor
}

#[tokio::test]
async fn decimal_round_trips_digit_for_digit() {
    let executor = prices_table().await;
    let amount = "123456789012345678.987654321";
    let insert = DbQuery::raw_typed(
        "INSERT INTO prices (id, amount) VALUES (?, ?)",
        vec![Arg::literal(1i64), Arg::literal(Value::Decimal(amount.into()))],
        vec![ArgType::scalar(ArgScalarType::Int), ArgType::scalar(ArgScalarType::Decimal)],
    );
    executor.execute(Request::new(PlanNode::Execute(insert))).await.unwrap();

    let rows = query(&executor, "SELECT amount FROM prices WHERE id = 1", vec![]).await;
    assert_eq!(field(&rows[0], "amount"), &Value::Decimal(amount.into()));
}

#[tokio::test]
async fn timestamp_keeps_seconds_and_nanos() {
    let executor = prices_table().await;
    let seen = Timestamp::new(1_701_962_387, 551_813_333).unwrap();
    exec(
        &executor,
        "INSERT INTO prices (id, seen) VALUES (?, ?)",
        vec![Value::Int(1), Value::DateTime(seen)],
    )
    .await;

    let rows = query(&executor, "SELECT seen FROM prices", vec![]).await;
    let decoded = field(&rows[0], "seen").as_datetime().unwrap();
    assert_eq!(decoded.secs(), 1_701_962_387);
    assert_eq!(decoded.nanos(), 551_813_333);
}

#[tokio::test]
async fn bytes_and_extreme_integers_round_trip() {
    let executor = prices_table().await;
    let payload = vec![0u8, 1, 254, 255];
    exec(
        &executor,
        "INSERT INTO prices (id, payload, big) VALUES (?, ?, ?)",
        vec![Value::Int(1), Value::Bytes(payload.clone()), Value::Int(i64::MIN)],
    )
    .await;

    let rows = query(&executor, "SELECT payload, big FROM prices", vec![]).await;
    assert_eq!(field(&rows[0], "payload"), &Value::Bytes(payload));
    assert_eq!(field(&rows[0], "big"), &Value::Int(i64::MIN));
}

#[tokio::test]
async fn out_of_range_integer_fails_before_dispatch() {
    let executor = prices_table().await;
    let insert = DbQuery::raw_typed(
        "INSERT INTO prices (id, big) VALUES (1, ?)",
        vec![Arg::literal(Value::Decimal("9223372036854775808".into()))],
        vec![ArgType::scalar(ArgScalarType::BigInt)],
    );
    let err = executor.execute(Request::new(PlanNode::Execute(insert))).await.unwrap_err();
    assert_eq!(err.kind(), "EncodingError");
    assert!(query(&executor, "SELECT id FROM prices", vec![]).await.is_empty());
}
