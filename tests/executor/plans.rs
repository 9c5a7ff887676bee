//! Relational plans: includes, templates, record shaping and validation.

use std::collections::BTreeMap;

use crate::common::*;
use sluice::{Arg, Error, Executor, PlanNode, Request, Rule, Value};
use sluice_engine::{
    Binding, DbQuery, FieldInitializer, FieldOperation, Fragment, JoinExpression, PlaceholderFormat,
    ResultNode, ResultType,
};

async fn blog() -> Executor {
    let executor = memory_executor();
    exec(&executor, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", vec![]).await;
    exec(
        &executor,
        "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER, title TEXT)",
        vec![],
    )
    .await;
    exec(&executor, "INSERT INTO users VALUES (1, 'ada'), (2, 'grace'), (3, 'edsger')", vec![]).await;
    exec(
        &executor,
        "INSERT INTO posts VALUES (10, 1, 'engines'), (11, 1, 'notes'), (12, 2, 'compilers')",
        vec![],
    )
    .await;
    executor
}

fn in_list(prefix: &str, placeholder: &str) -> DbQuery {
    DbQuery::TemplateSql {
        fragments: vec![Fragment::chunk(prefix), Fragment::ParameterTuple],
        params: vec![Arg::placeholder(placeholder)],
        arg_types: vec![],
        placeholder: PlaceholderFormat::positional("?"),
        chunkable: true,
    }
}

#[tokio::test]
async fn include_stitches_children_onto_parents() {
    let executor = blog().await;
    let plan = PlanNode::Let {
        bindings: vec![
            Binding::new("users", PlanNode::raw_query("SELECT id, name FROM users ORDER BY id", vec![])),
            Binding::new(
                "user_ids",
                PlanNode::MapField {
                    records: Box::new(PlanNode::get("users")),
                    field: "id".into(),
                },
            ),
        ],
        expr: Box::new(PlanNode::Join {
            parent: Box::new(PlanNode::get("users")),
            children: vec![JoinExpression {
                child: PlanNode::Query(in_list(
                    "SELECT id, user_id, title FROM posts WHERE user_id IN ",
                    "user_ids",
                )),
                on: vec![("id".into(), "user_id".into())],
                parent_field: "posts".into(),
                is_relation_unique: false,
            }],
        }),
    };

    let users = executor.execute(Request::new(plan)).await.unwrap();
    let users = users.as_list().unwrap();
    assert_eq!(users.len(), 3);
    let posts_of = |i: usize| field(&users[i], "posts").as_list().unwrap().len();
    assert_eq!((posts_of(0), posts_of(1), posts_of(2)), (2, 1, 0));
}

#[tokio::test]
async fn chunked_template_merges_results() {
    let executor = memory_executor();
    exec(&executor, "CREATE TABLE nums (n INTEGER PRIMARY KEY)", vec![]).await;
    for start in (0..1500).step_by(250) {
        let values: Vec<String> = (start..start + 250).map(|n| format!("({n})")).collect();
        exec(&executor, &format!("INSERT INTO nums VALUES {}", values.join(",")), vec![]).await;
    }

    let ids: Vec<Value> = (0..1200).map(Value::Int).collect();
    let request = Request::new(PlanNode::Query(in_list("SELECT n FROM nums WHERE n IN ", "ids")))
        .param("ids", Value::List(ids));
    let rows = executor.execute(request).await.unwrap();
    assert_eq!(rows.as_list().unwrap().len(), 1200);
}

#[tokio::test]
async fn insert_then_shape_the_created_record() {
    let executor = blog().await;
    let create = PlanNode::InitializeRecord {
        expr: Box::new(PlanNode::raw_query(
            "INSERT INTO users (name) VALUES (?)",
            vec![Arg::placeholder("name")],
        )),
        fields: BTreeMap::from([
            ("id".to_string(), FieldInitializer::LastInsertId),
            ("name".to_string(), FieldInitializer::Value { value: Arg::placeholder("name") }),
            ("visits".to_string(), FieldInitializer::Value { value: Arg::literal(1i64) }),
        ]),
    };
    let bumped = PlanNode::MapRecord {
        expr: Box::new(create),
        fields: BTreeMap::from([("visits".to_string(), FieldOperation::Add(Arg::literal(2i64)))]),
    };
    let plan = PlanNode::DataMap {
        expr: Box::new(bumped),
        structure: ResultNode::Object {
            serialized_name: None,
            fields: BTreeMap::from([
                (
                    "id".to_string(),
                    ResultNode::Value { db_name: "id".into(), result_type: ResultType::Int },
                ),
                (
                    "displayName".to_string(),
                    ResultNode::Value { db_name: "name".into(), result_type: ResultType::String },
                ),
                (
                    "visits".to_string(),
                    ResultNode::Value { db_name: "visits".into(), result_type: ResultType::Int },
                ),
            ]),
            skip_nulls: false,
        },
        enums: BTreeMap::new(),
    };

    let record = executor
        .execute(Request::new(plan).param("name", "barbara"))
        .await
        .unwrap();
    assert_eq!(field(&record, "id"), &Value::Int(4));
    assert_eq!(field(&record, "displayName"), &Value::from("barbara"));
    assert_eq!(field(&record, "visits"), &Value::Int(3));
}

#[tokio::test]
async fn failed_validation_rolls_back_the_plan() {
    let executor = blog().await;
    let plan = PlanNode::transaction(PlanNode::Seq(vec![
        PlanNode::raw_execute("DELETE FROM posts WHERE user_id = 1", vec![]),
        PlanNode::Validate {
            expr: Box::new(PlanNode::raw_execute("UPDATE users SET name = 'x' WHERE id = 42", vec![])),
            rules: vec![Rule::AffectedRowCountEq(1)],
            message: "user to update not found".into(),
        },
    ]));

    let err = executor.execute(Request::new(plan)).await.unwrap_err();
    assert!(matches!(err, Error::PlanAssertion { .. }));
    assert!(err.to_string().contains("user to update not found"));
    assert_eq!(query(&executor, "SELECT id FROM posts", vec![]).await.len(), 3);
}

#[tokio::test]
async fn conditional_create_runs_only_when_missing() {
    let executor = blog().await;
    let upsert = |name: &str| {
        Request::new(PlanNode::let_in(
            "found",
            PlanNode::raw_query("SELECT id FROM users WHERE name = ?", vec![Arg::placeholder("name")]),
            PlanNode::if_then_else(
                PlanNode::get("found"),
                Rule::RowCountEq(0),
                PlanNode::raw_execute("INSERT INTO users (name) VALUES (?)", vec![Arg::placeholder("name")]),
                PlanNode::literal(0i64),
            ),
        ))
        .param("name", name)
    };

    assert_eq!(executor.execute(upsert("alan")).await.unwrap(), Value::Int(1));
    assert_eq!(executor.execute(upsert("alan")).await.unwrap(), Value::Int(0));
    assert_eq!(
        query(&executor, "SELECT id FROM users WHERE name = 'alan'", vec![]).await.len(),
        1
    );
}

#[tokio::test]
async fn serialized_plan_executes() {
    let executor = blog().await;
    let json = r#"{"root": {"type": "required", "args":
        {"type": "query", "args": {"type": "rawSql",
            "sql": "SELECT name FROM users WHERE id = ?",
            "params": [{"type": "placeholder", "value": {"name": "id"}}]}}}}"#;
    let plan = sluice::QueryPlan::from_json(json).unwrap();

    let found = executor
        .execute(Request::new(plan.clone()).param("id", 2i64))
        .await
        .unwrap();
    assert_eq!(field(&found.as_list().unwrap()[0], "name"), &Value::from("grace"));

    let missing = executor.execute(Request::new(plan).param("id", 99i64)).await.unwrap_err();
    assert!(matches!(missing, Error::PlanAssertion { .. }));
}
