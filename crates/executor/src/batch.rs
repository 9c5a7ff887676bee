//! Batch scheduler
//!
//! Decides how a list of requests shares connections and transactions:
//!
//! | Mode | When | Failure |
//! |------|------|---------|
//! | `Atomic` | caller asked for one unit | first failure rolls everything back |
//! | `Grouped` | several read-only requests, backend batches | first failure ends the group |
//! | `Independent` | otherwise | each request fails on its own |
//!
//! Every failure that belongs to one request carries that request's index.
//! Grouped and atomic batches report the failing index on every item the
//! failure affected.

use sluice_concurrency::{validate_isolation, TransactionContext};
use sluice_core::{Error, IsolationLevel, Result, Value};
use sluice_driver::codec::decode_result_set;
use sluice_driver::{Capabilities, NativeQuery};
use sluice_engine::{render_query, Environment, Interpreter, PlanNode, QueryPlan};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::executor::Executor;
use crate::request::{BatchOptions, Request};

/// How a batch is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// One transaction, all or nothing
    Atomic,
    /// One context and, when possible, one round trip
    Grouped,
    /// Each request in its own implicit context, concurrently
    Independent,
}

impl BatchMode {
    /// Pick the mode for `requests`
    pub fn choose(requests: &[Request], options: &BatchOptions, capabilities: &Capabilities) -> Self {
        if options.atomic {
            return BatchMode::Atomic;
        }
        let groupable = requests.len() > 1
            && capabilities.supports_batching
            && requests
                .iter()
                .all(|r| r.transaction.is_none() && r.plan.is_read_only());
        if groupable {
            BatchMode::Grouped
        } else {
            BatchMode::Independent
        }
    }
}

pub(crate) async fn run(executor: &Executor, requests: Vec<Request>, options: BatchOptions) -> Vec<Result<Value>> {
    if requests.is_empty() {
        return Vec::new();
    }
    let size = requests.len();
    let cancel = options.cancel.clone().unwrap_or_else(|| executor.cancel_scope());
    let mode = BatchMode::choose(&requests, &options, executor.capabilities());
    debug!(target: "sluice::batch", size, ?mode, "Batch scheduled");
    match mode {
        BatchMode::Atomic => match run_atomic(executor, &requests, options.isolation_level, cancel).await {
            Ok(values) => values.into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e); size],
        },
        BatchMode::Grouped => run_grouped(executor, &requests, options.isolation_level, cancel).await,
        BatchMode::Independent => run_independent(executor, requests, cancel).await,
    }
}

/// Statements a plan may send, used to decide whether a batch needs BEGIN
fn statement_count(plan: &QueryPlan) -> usize {
    let mut count = 0;
    plan.root.any(&mut |node| {
        if matches!(node, PlanNode::Query(_) | PlanNode::Execute(_)) {
            count += 1;
        }
        false
    });
    count
}

fn check_batch_item(index: usize, request: &Request) -> Result<()> {
    if request.transaction.is_some() {
        return Err(Error::binding("a batched request cannot name an interactive transaction").with_batch_index(index));
    }
    request.check_bindings().map_err(|e| e.with_batch_index(index))
}

// =============================================================================
// Atomic
// =============================================================================

pub(crate) async fn run_atomic(
    executor: &Executor,
    requests: &[Request],
    isolation: Option<IsolationLevel>,
    cancel: CancellationToken,
) -> Result<Vec<Value>> {
    for (index, request) in requests.iter().enumerate() {
        check_batch_item(index, request)?;
    }
    validate_isolation(executor.capabilities(), isolation)?;
    let statements: usize = requests.iter().map(|r| statement_count(&r.plan)).sum();

    let conn = executor.pool().acquire().await?;
    let mut ctx = TransactionContext::begin_batch(conn, statements, isolation).await?;
    let interpreter = Interpreter::new(cancel);
    let mut values = Vec::with_capacity(requests.len());
    for (index, request) in requests.iter().enumerate() {
        let mut env = Environment::new(request.params.clone());
        match interpreter.run(&request.plan, &mut env, &mut ctx).await {
            Ok(value) => values.push(value.materialize()),
            Err(e) => {
                warn!(target: "sluice::batch", txn_id = %ctx.id(), index, error = %e, "Batch item failed, rolling back");
                ctx.rollback().await;
                return Err(e.with_batch_index(index));
            }
        }
    }
    ctx.commit().await?;
    debug!(target: "sluice::batch", size = requests.len(), statements, "Atomic batch committed");
    Ok(values)
}

// =============================================================================
// Grouped
// =============================================================================

async fn run_grouped(
    executor: &Executor,
    requests: &[Request],
    isolation: Option<IsolationLevel>,
    cancel: CancellationToken,
) -> Vec<Result<Value>> {
    // Items before a binding failure still run; the failing item and
    // everything after it share the failure.
    let (runnable, mut failure) = match requests
        .iter()
        .enumerate()
        .find_map(|(index, r)| check_batch_item(index, r).err().map(|e| (index, e)))
    {
        Some((index, e)) => (index, Some(e)),
        None => (requests.len(), None),
    };

    let mut values = Vec::with_capacity(runnable);
    if runnable > 0 {
        match execute_group(executor, &requests[..runnable], isolation, cancel).await {
            Ok((done, group_failure)) => {
                values = done;
                if group_failure.is_some() {
                    failure = group_failure;
                }
            }
            Err(e) => return vec![Err(e); requests.len()],
        }
    }

    let failure = failure.unwrap_or_else(|| Error::internal("grouped batch ended early").with_batch_index(values.len()));
    let completed = values.len();
    values
        .into_iter()
        .map(Ok)
        .chain((completed..requests.len()).map(|_| Err(failure.clone())))
        .collect()
}

/// Run a group on one context; returns the values produced before the
/// first item failure, and that failure
async fn execute_group(
    executor: &Executor,
    requests: &[Request],
    isolation: Option<IsolationLevel>,
    cancel: CancellationToken,
) -> Result<(Vec<Value>, Option<Error>)> {
    let conn = executor.pool().acquire().await?;
    let mut ctx = TransactionContext::begin_batch(conn, requests.len(), isolation).await?;
    let interpreter = Interpreter::new(cancel);

    let (values, failure) = match single_round_trip(&interpreter, requests, ctx.capabilities()) {
        Some(statements) => run_round_trip(&interpreter, &statements, &mut ctx).await,
        None => run_in_order(&interpreter, requests, &mut ctx).await,
    };

    match failure {
        None => {
            ctx.commit().await?;
            Ok((values, None))
        }
        Some(e) => {
            ctx.rollback().await;
            Ok((values, Some(e)))
        }
    }
}

/// One statement per request, when every request is a single read that
/// renders without chunking
fn single_round_trip(interpreter: &Interpreter, requests: &[Request], caps: &Capabilities) -> Option<Vec<NativeQuery>> {
    let mut statements = Vec::with_capacity(requests.len());
    for request in requests {
        let query = request.plan.as_single_query()?;
        let env = Environment::new(request.params.clone());
        let mut rendered = render_query(query, &env, interpreter.generators(), caps.max_bind_values).ok()?;
        if rendered.len() != 1 {
            return None;
        }
        statements.push(rendered.pop()?);
    }
    Some(statements)
}

async fn run_round_trip(
    interpreter: &Interpreter,
    statements: &[NativeQuery],
    ctx: &mut TransactionContext,
) -> (Vec<Value>, Option<Error>) {
    if interpreter.cancel_token().is_cancelled() {
        return (Vec::new(), Some(Error::Cancelled));
    }
    let results = ctx.query_batch(statements).await;
    debug!(target: "sluice::batch", txn_id = %ctx.id(), statements = statements.len(), "Grouped reads sent in one round trip");
    let mut values = Vec::with_capacity(statements.len());
    for (index, result) in results.into_iter().enumerate() {
        match result.and_then(decode_result_set) {
            Ok(set) => values.push(Value::from(set).materialize()),
            Err(e) => return (values, Some(e.with_batch_index(index))),
        }
    }
    if values.len() < statements.len() {
        let index = values.len();
        return (values, Some(Error::internal("batch returned fewer results than statements").with_batch_index(index)));
    }
    (values, None)
}

async fn run_in_order(
    interpreter: &Interpreter,
    requests: &[Request],
    ctx: &mut TransactionContext,
) -> (Vec<Value>, Option<Error>) {
    let mut values = Vec::with_capacity(requests.len());
    for (index, request) in requests.iter().enumerate() {
        let mut env = Environment::new(request.params.clone());
        match interpreter.run(&request.plan, &mut env, ctx).await {
            Ok(value) => values.push(value.materialize()),
            Err(e) => return (values, Some(e.with_batch_index(index))),
        }
    }
    (values, None)
}

// =============================================================================
// Independent
// =============================================================================

async fn run_independent(executor: &Executor, requests: Vec<Request>, cancel: CancellationToken) -> Vec<Result<Value>> {
    let size = requests.len();
    let mut tasks = JoinSet::new();
    for (index, request) in requests.into_iter().enumerate() {
        let executor = executor.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { (index, executor.execute_with_cancel(request, cancel).await) });
    }

    let mut results: Vec<Result<Value>> = (0..size)
        .map(|index| Err(Error::internal("batch item did not complete").with_batch_index(index)))
        .collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => {
                if let Some(slot) = results.get_mut(index) {
                    *slot = result.map_err(|e| e.with_batch_index(index));
                }
            }
            Err(e) => warn!(target: "sluice::batch", error = %e, "Batch task aborted"),
        }
    }
    results
}
