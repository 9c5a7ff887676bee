//! Query plan engine for Sluice
//!
//! This crate turns a serialized plan into statements and values:
//! - plan: the plan tree, its arguments and query templates
//! - environment: scoped variable bindings over the request parameters
//! - generators: per-execution value generators (`now`, `uuid`)
//! - render: argument evaluation and template rendering with chunking
//! - rules / transform: row-count rules and in-memory data operations
//! - interpreter: the recursive evaluator bound to one transaction context
//!
//! The interpreter never touches the pool or the transaction registry; the
//! executor hands it a context and decides how that context ends.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod environment;
pub mod generators;
pub mod interpreter;
pub mod plan;
pub mod render;
pub mod rules;
pub mod transform;

pub use environment::Environment;
pub use generators::GeneratorSnapshot;
pub use interpreter::Interpreter;
pub use plan::{
    Arg, Binding, DbQuery, FieldInitializer, FieldOperation, Fragment, InMemoryOps, JoinExpression,
    PlaceholderFormat, PlanNode, QueryPlan, ResultNode, ResultType, Rule,
};
pub use render::{evaluate_arg, render_query};
