//! Plan node interpreter
//!
//! A recursive walk over the plan tree. Every node is evaluated against the
//! execution's [`Environment`] on the single connection owned by the
//! [`TransactionContext`]; there is no parallelism inside one plan, so
//! statements are dispatched strictly in evaluation order.
//!
//! ## Suspension points
//!
//! The only awaits are driver calls. Cancellation is checked before each
//! statement is dispatched and again when it settles, so an in-flight call
//! is never interrupted but nothing further is sent once the token fires.
//!
//! ## Results
//!
//! Row-returning statements produce a `Value::Cursor`: rows are decoded up
//! front but turned into records only when consumed. A cursor bound by
//! `Let` is shared by every reference, so the statement runs once.

use sluice_concurrency::TransactionContext;
use sluice_core::{DatabaseErrorKind, Error, Record, Result, ResultSet, Value};
use sluice_driver::codec::decode_result_set;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::environment::Environment;
use crate::generators::GeneratorSnapshot;
use crate::plan::{DbQuery, FieldInitializer, PlanNode, QueryPlan};
use crate::render::{evaluate_arg, render_query};
use crate::{rules, transform};

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<Evaluated>> + Send + 'a>>;

/// A node's value plus the insert id of the statement that produced it
#[derive(Debug, Clone)]
struct Evaluated {
    value: Value,
    last_insert_id: Option<String>,
}

impl Evaluated {
    fn value(value: Value) -> Self {
        Evaluated {
            value,
            last_insert_id: None,
        }
    }

    fn map(self, f: impl FnOnce(Value) -> Value) -> Self {
        Evaluated {
            value: f(self.value),
            last_insert_id: self.last_insert_id,
        }
    }

    fn try_map(self, f: impl FnOnce(Value) -> Result<Value>) -> Result<Self> {
        Ok(Evaluated {
            value: f(self.value)?,
            last_insert_id: self.last_insert_id,
        })
    }
}

/// Evaluates plans for one execution
///
/// Holds the per-execution generator snapshot and the caller's
/// cancellation token. Create one per top-level execution.
#[derive(Debug, Clone)]
pub struct Interpreter {
    generators: GeneratorSnapshot,
    cancel: CancellationToken,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl Interpreter {
    /// Interpreter observing `cancel`
    pub fn new(cancel: CancellationToken) -> Self {
        Interpreter {
            generators: GeneratorSnapshot::capture(),
            cancel,
        }
    }

    /// Use a fixed generator snapshot
    pub fn with_generators(mut self, generators: GeneratorSnapshot) -> Self {
        self.generators = generators;
        self
    }

    /// Generator snapshot of this execution
    pub fn generators(&self) -> &GeneratorSnapshot {
        &self.generators
    }

    /// Cancellation token observed at every statement boundary
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Evaluate `plan` and return the root's value
    pub async fn run(
        &self,
        plan: &QueryPlan,
        env: &mut Environment,
        tx: &mut TransactionContext,
    ) -> Result<Value> {
        let started = Instant::now();
        let result = self.interpret(&plan.root, env, tx).await;
        trace!(
            target: "sluice::query",
            txn_id = %tx.id(),
            root = plan.root.kind(),
            ok = result.is_ok(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Plan evaluated"
        );
        result.map(|evaluated| evaluated.value)
    }

    /// Reject statements the backend cannot run before anything is sent
    fn check_supported(query: &DbQuery, tx: &TransactionContext) -> Result<()> {
        let caps = tx.capabilities();
        if !caps.supports_returning && query.uses_returning() {
            return Err(Error::database(
                DatabaseErrorKind::Query,
                None,
                format!("{} does not support RETURNING", caps.provider),
            ));
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn interpret<'a>(
        &'a self,
        node: &'a PlanNode,
        env: &'a mut Environment,
        tx: &'a mut TransactionContext,
    ) -> NodeFuture<'a> {
        Box::pin(async move {
            match node {
                PlanNode::Value(arg) => Ok(Evaluated::value(evaluate_arg(arg, env, &self.generators)?)),

                PlanNode::Get { name } => Ok(Evaluated::value(env.resolve(name)?.clone())),

                PlanNode::Let { bindings, expr } => {
                    env.push_frame();
                    let result = async {
                        for binding in bindings {
                            let bound = self.interpret(&binding.expr, env, tx).await?;
                            env.bind(binding.name.as_str(), bound.value)?;
                        }
                        self.interpret(expr, env, tx).await
                    }
                    .await;
                    env.pop_frame();
                    result
                }

                PlanNode::GetFirstNonEmpty { names } => {
                    let found = names
                        .iter()
                        .filter_map(|name| env.lookup(name))
                        .find(|value| !value.is_empty())
                        .cloned();
                    Ok(Evaluated::value(found.unwrap_or(Value::List(Vec::new()))))
                }

                PlanNode::Seq(nodes) => {
                    let mut last = Evaluated::value(Value::Null);
                    for child in nodes {
                        last = self.interpret(child, env, tx).await?;
                    }
                    Ok(last)
                }

                PlanNode::Query(query) => self.run_query(query, env, tx).await,

                PlanNode::Execute(query) => self.run_execute(query, env, tx).await,

                PlanNode::Concat(nodes) => {
                    let parts = self.interpret_all(nodes, env, tx).await?;
                    Ok(Evaluated::value(transform::concat(parts)))
                }

                PlanNode::Sum(nodes) => {
                    let parts = self.interpret_all(nodes, env, tx).await?;
                    Ok(Evaluated::value(transform::sum(&parts)?))
                }

                PlanNode::Unique(child) => self.interpret(child, env, tx).await?.try_map(transform::unique),

                PlanNode::Required(child) => {
                    let evaluated = self.interpret(child, env, tx).await?;
                    if evaluated.value.is_empty() {
                        return Err(Error::assertion("required value is empty"));
                    }
                    Ok(evaluated)
                }

                PlanNode::Reverse(child) => Ok(self.interpret(child, env, tx).await?.map(transform::reverse)),

                PlanNode::Diff { from, to } => {
                    let from = self.interpret(from, env, tx).await?.value;
                    let to = self.interpret(to, env, tx).await?.value;
                    Ok(Evaluated::value(transform::diff(from, &to)))
                }

                PlanNode::If {
                    value,
                    rule,
                    then,
                    otherwise,
                } => {
                    let tested = self.interpret(value, env, tx).await?.value;
                    let branch = if rules::satisfies(&tested, rule) { then } else { otherwise };
                    self.interpret(branch, env, tx).await
                }

                PlanNode::Transaction(body) => {
                    let scope = tx.begin_nested().await?;
                    match self.interpret(body, env, tx).await {
                        Ok(evaluated) => {
                            tx.commit_nested(scope).await?;
                            Ok(evaluated)
                        }
                        Err(e) => {
                            tx.rollback_nested(scope).await;
                            Err(e)
                        }
                    }
                }

                PlanNode::Unit => Ok(Evaluated::value(Value::Null)),

                PlanNode::MapField { records, field } => {
                    Ok(self.interpret(records, env, tx).await?.map(|v| transform::map_field(v, field)))
                }

                PlanNode::Join { parent, children } => {
                    let parent = self.interpret(parent, env, tx).await?;
                    if parent.value.is_null() {
                        return Ok(parent);
                    }
                    let mut fetched = Vec::with_capacity(children.len());
                    for join in children {
                        let records = self.interpret(&join.child, env, tx).await?.value;
                        fetched.push((join, records));
                    }
                    parent.try_map(|value| transform::attach_children(value, fetched))
                }

                PlanNode::Process { expr, operations } => {
                    self.interpret(expr, env, tx).await?.try_map(|v| transform::process(v, operations))
                }

                PlanNode::InitializeRecord { expr, fields } => {
                    let evaluated = self.interpret(expr, env, tx).await?;
                    let mut record = Record::new();
                    for (name, init) in fields {
                        let value = match init {
                            FieldInitializer::Value { value } => evaluate_arg(value, env, &self.generators)?,
                            FieldInitializer::LastInsertId => evaluated
                                .last_insert_id
                                .clone()
                                .map(Value::String)
                                .unwrap_or(Value::Null),
                        };
                        record.insert(name.clone(), value);
                    }
                    Ok(Evaluated {
                        value: Value::Record(record),
                        last_insert_id: evaluated.last_insert_id,
                    })
                }

                PlanNode::MapRecord { expr, fields } => {
                    let evaluated = self.interpret(expr, env, tx).await?;
                    let mut record = transform::record_or_empty(evaluated.value)?;
                    for (name, op) in fields {
                        let operand = evaluate_arg(op.arg(), env, &self.generators)?;
                        let current = record.remove(name).unwrap_or(Value::Null);
                        record.insert(name.clone(), transform::apply_field_operation(op, current, operand)?);
                    }
                    Ok(Evaluated {
                        value: Value::Record(record),
                        last_insert_id: evaluated.last_insert_id,
                    })
                }

                PlanNode::DataMap { expr, structure, enums } => self
                    .interpret(expr, env, tx)
                    .await?
                    .try_map(|v| transform::data_map(v, structure, enums)),

                PlanNode::Validate { expr, rules, message } => {
                    let evaluated = self.interpret(expr, env, tx).await?;
                    rules::validate(&evaluated.value, rules, message)?;
                    Ok(evaluated)
                }
            }
        })
    }

    async fn interpret_all(
        &self,
        nodes: &[PlanNode],
        env: &mut Environment,
        tx: &mut TransactionContext,
    ) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(nodes.len());
        for node in nodes {
            values.push(self.interpret(node, env, tx).await?.value);
        }
        Ok(values)
    }

    async fn run_query(
        &self,
        query: &DbQuery,
        env: &mut Environment,
        tx: &mut TransactionContext,
    ) -> Result<Evaluated> {
        Self::check_supported(query, tx)?;
        let statements = render_query(query, env, &self.generators, tx.capabilities().max_bind_values)?;
        let mut merged: Option<ResultSet> = None;
        for statement in &statements {
            self.checkpoint()?;
            let started = Instant::now();
            let outcome = tx.query(statement).await;
            debug!(
                target: "sluice::query",
                txn_id = %tx.id(),
                sql = %statement.sql,
                params = statement.args.len(),
                ok = outcome.is_ok(),
                duration_us = started.elapsed().as_micros() as u64,
                "Query dispatched"
            );
            let raw = outcome?;
            self.checkpoint()?;
            let decoded = decode_result_set(raw)?;
            merged = Some(match merged {
                Some(mut acc) => {
                    acc.append(decoded);
                    acc
                }
                None => decoded,
            });
        }
        let set = merged.unwrap_or_default();
        let last_insert_id = set.last_insert_id.clone();
        Ok(Evaluated {
            value: Value::from(set),
            last_insert_id,
        })
    }

    async fn run_execute(
        &self,
        query: &DbQuery,
        env: &mut Environment,
        tx: &mut TransactionContext,
    ) -> Result<Evaluated> {
        Self::check_supported(query, tx)?;
        let statements = render_query(query, env, &self.generators, tx.capabilities().max_bind_values)?;
        let mut affected: u64 = 0;
        for statement in &statements {
            self.checkpoint()?;
            let started = Instant::now();
            let outcome = tx.execute(statement).await;
            debug!(
                target: "sluice::query",
                txn_id = %tx.id(),
                sql = %statement.sql,
                params = statement.args.len(),
                ok = outcome.is_ok(),
                duration_us = started.elapsed().as_micros() as u64,
                "Statement executed"
            );
            affected = affected.saturating_add(outcome?);
            self.checkpoint()?;
        }
        let affected = i64::try_from(affected).unwrap_or(i64::MAX);
        Ok(Evaluated::value(Value::Int(affected)))
    }
}
