//! Plan execution benchmarks
//!
//! Measures overhead at each layer:
//! - interpreter: plan evaluation against a scripted driver (no I/O)
//! - sqlite: the same plans end to end against an in-memory database
//! - batch: grouped reads versus one request at a time
//!
//! Run with: cargo bench --bench interpreter

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sluice::{Arg, BatchOptions, Executor, PlanNode, Request, Rule, Value};
use sluice_core::{Column, ColumnType};
use sluice_driver::{NativeValue, RawResultSet, ScriptedAdapter, SqliteAdapter};
use sluice_engine::{Binding, JoinExpression};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn rows(n: i64) -> RawResultSet {
    RawResultSet::new(
        vec![Column::new("id", ColumnType::Int64), Column::new("name", ColumnType::Text)],
        (0..n)
            .map(|i| vec![NativeValue::Int64(i), NativeValue::Text(format!("user{i}"))])
            .collect(),
    )
}

/// Users with their posts, stitched in memory
fn join_plan() -> PlanNode {
    PlanNode::Let {
        bindings: vec![Binding::new("users", PlanNode::raw_query("SELECT id, name FROM users", vec![]))],
        expr: Box::new(PlanNode::Join {
            parent: Box::new(PlanNode::get("users")),
            children: vec![JoinExpression {
                child: PlanNode::raw_query("SELECT id, user_id FROM posts", vec![]),
                on: vec![("id".into(), "user_id".into())],
                parent_field: "posts".into(),
                is_relation_unique: false,
            }],
        }),
    }
}

fn bench_interpreter(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter");
    group.measurement_time(Duration::from_secs(5));
    let rt = runtime();

    for n in [10i64, 1000] {
        let posts = RawResultSet::new(
            vec![Column::new("id", ColumnType::Int64), Column::new("user_id", ColumnType::Int64)],
            (0..n * 2).map(|i| vec![NativeValue::Int64(i), NativeValue::Int64(i % n)]).collect(),
        );
        let adapter = ScriptedAdapter::new()
            .on_query("FROM users", rows(n))
            .on_query("FROM posts", posts);
        let executor = Executor::with_adapter(Arc::new(adapter));

        group.bench_with_input(BenchmarkId::new("join", n), &n, |b, _| {
            b.iter(|| rt.block_on(executor.execute(Request::new(join_plan()))).unwrap());
        });
    }

    let executor = Executor::with_adapter(Arc::new(ScriptedAdapter::new().on_execute("UPDATE", 1)));
    let guarded = PlanNode::transaction(PlanNode::Validate {
        expr: Box::new(PlanNode::raw_execute(
            "UPDATE users SET name = ? WHERE id = ?",
            vec![Arg::placeholder("name"), Arg::placeholder("id")],
        )),
        rules: vec![Rule::AffectedRowCountEq(1)],
        message: "missing".into(),
    });
    group.bench_function("validated_update", |b| {
        b.iter(|| {
            let request = Request::new(guarded.clone()).param("name", "x").param("id", 1i64);
            rt.block_on(executor.execute(request)).unwrap()
        });
    });

    group.finish();
}

fn sqlite_executor(rt: &Runtime, users: i64) -> Executor {
    let executor = Executor::with_adapter(Arc::new(SqliteAdapter::in_memory().unwrap()));
    rt.block_on(async {
        executor
            .execute(Request::new(PlanNode::raw_execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
                vec![],
            )))
            .await
            .unwrap();
        executor
            .execute(Request::new(PlanNode::raw_execute(
                "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER)",
                vec![],
            )))
            .await
            .unwrap();
        for i in 0..users {
            let insert = PlanNode::Seq(vec![
                PlanNode::raw_execute("INSERT INTO users VALUES (?, ?)", vec![Arg::literal(i), Arg::literal(format!("user{i}"))]),
                PlanNode::raw_execute("INSERT INTO posts (user_id) VALUES (?)", vec![Arg::literal(i)]),
            ]);
            executor.execute(Request::new(insert)).await.unwrap();
        }
    });
    executor
}

fn bench_sqlite(c: &mut Criterion) {
    let mut group = c.benchmark_group("sqlite");
    group.measurement_time(Duration::from_secs(5));
    let rt = runtime();
    let executor = sqlite_executor(&rt, 500);

    group.bench_function("point_read", |b| {
        let mut i = 0i64;
        b.iter(|| {
            i = (i + 1) % 500;
            let request = Request::new(PlanNode::raw_query(
                "SELECT id, name FROM users WHERE id = ?",
                vec![Arg::placeholder("id")],
            ))
            .param("id", i);
            rt.block_on(executor.execute(request)).unwrap()
        });
    });

    group.bench_function("join_500", |b| {
        b.iter(|| rt.block_on(executor.execute(Request::new(join_plan()))).unwrap());
    });

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");
    group.measurement_time(Duration::from_secs(5));
    let rt = runtime();
    let executor = sqlite_executor(&rt, 100);

    let reads: Vec<Request> = (0..20i64)
        .map(|i| {
            Request::new(PlanNode::raw_query("SELECT name FROM users WHERE id = ?", vec![Arg::literal(i)]))
        })
        .collect();

    group.bench_function("grouped_20", |b| {
        b.iter(|| {
            let results = rt.block_on(executor.execute_many(reads.clone(), BatchOptions::default()));
            assert!(results.iter().all(Result::is_ok));
        });
    });

    group.bench_function("sequential_20", |b| {
        b.iter(|| {
            rt.block_on(async {
                for request in reads.clone() {
                    executor.execute(request).await.unwrap();
                }
            })
        });
    });

    group.bench_function("atomic_20", |b| {
        b.iter(|| {
            let results = rt.block_on(executor.execute_many(reads.clone(), BatchOptions::atomic()));
            assert!(results.iter().all(Result::is_ok));
            Value::List(results.into_iter().flatten().collect())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_interpreter, bench_sqlite, bench_batch);
criterion_main!(benches);
