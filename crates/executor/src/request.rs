//! Execution requests

use serde::{Deserialize, Serialize};
use sluice_core::{IsolationLevel, Record, TransactionId, Value};
use sluice_engine::{PlanNode, QueryPlan};
use tokio_util::sync::CancellationToken;

/// One plan execution
///
/// `transaction` routes the request through an open interactive
/// transaction; without it the request runs in its own implicit context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Plan to evaluate
    pub plan: QueryPlan,
    /// External parameters visible to every placeholder
    #[serde(default)]
    pub params: Record,
    /// Interactive transaction to run in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionId>,
}

impl Request {
    /// Request with no parameters
    pub fn new(plan: impl Into<QueryPlan>) -> Self {
        Request {
            plan: plan.into(),
            params: Record::new(),
            transaction: None,
        }
    }

    /// Add an external parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replace all parameters
    pub fn with_params(mut self, params: Record) -> Self {
        self.params = params;
        self
    }

    /// Run inside interactive transaction `id`
    pub fn in_transaction(mut self, id: TransactionId) -> Self {
        self.transaction = Some(id);
        self
    }

    /// Parse a request from JSON
    pub fn from_json(json: &str) -> sluice_core::Result<Self> {
        serde_json::from_str(json).map_err(|e| sluice_core::Error::binding(format!("malformed request: {e}")))
    }

    /// Fail with a binding error if any placeholder cannot resolve
    pub fn check_bindings(&self) -> sluice_core::Result<()> {
        self.plan.check_bindings(self.params.keys().map(String::as_str))
    }
}

impl From<PlanNode> for Request {
    fn from(root: PlanNode) -> Self {
        Request::new(root)
    }
}

/// How a list of requests is executed
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Run every request in one transaction; any failure rolls all back
    pub atomic: bool,
    /// Isolation level for the batch transaction
    pub isolation_level: Option<IsolationLevel>,
    /// Cancels every request of the batch
    pub cancel: Option<CancellationToken>,
}

impl BatchOptions {
    /// One transaction for the whole batch
    pub fn atomic() -> Self {
        BatchOptions {
            atomic: true,
            ..Default::default()
        }
    }

    /// Independent requests
    pub fn independent() -> Self {
        Self::default()
    }

    /// Apply `level` at BEGIN
    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Observe `cancel`
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_engine::Arg;

    #[test]
    fn request_json_shape() {
        let json = r#"{
            "plan": {"root": {"type": "query", "args": {"type": "rawSql", "sql": "SELECT 1", "params": []}}},
            "params": {"id": {"Int": 1}}
        }"#;
        let request = Request::from_json(json).unwrap();
        assert_eq!(request.params["id"], Value::Int(1));
        assert!(request.transaction.is_none());
        assert!(Request::from_json("{\"plan\": 3}").is_err());
    }

    #[test]
    fn binding_check_sees_params() {
        let plan = PlanNode::raw_query("SELECT * FROM t WHERE id = ?", vec![Arg::placeholder("id")]);
        assert!(Request::new(plan.clone()).check_bindings().is_err());
        assert!(Request::new(plan).param("id", 7i64).check_bindings().is_ok());
    }
}
