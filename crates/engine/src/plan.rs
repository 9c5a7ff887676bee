//! Query plan model
//!
//! A plan is a tree of [`PlanNode`]s produced upstream and shipped as JSON.
//! Every node serializes as `{"type": <kind>, "args": <payload>}`; argument
//! values serialize as `{"type": <kind>, "value": <payload>}`.
//!
//! ```json
//! {"type": "let", "args": {
//!   "bindings": [{"name": "user", "expr": {"type": "query", "args": {
//!     "type": "rawSql", "sql": "SELECT * FROM users WHERE id = ?",
//!     "params": [{"type": "placeholder", "value": {"name": "id"}}]}}}],
//!   "expr": {"type": "get", "args": {"name": "user"}}}}
//! ```
//!
//! Plans are immutable once built. The interpreter never rewrites them, so a
//! single plan can be executed concurrently against several connections.

use serde::{Deserialize, Serialize};
use sluice_core::{ArgScalarType, ArgType, Error, Result, Value};
use std::collections::{BTreeMap, HashSet};

/// A complete plan: the root node to evaluate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Root node
    pub root: PlanNode,
}

impl QueryPlan {
    /// Wrap a root node
    pub fn new(root: PlanNode) -> Self {
        QueryPlan { root }
    }

    /// Parse a serialized plan
    ///
    /// # Errors
    ///
    /// `PlanBinding` when the payload is not a well-formed plan.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::binding(format!("malformed query plan: {e}")))
    }

    /// Serialize the plan
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::internal(format!("plan serialization failed: {e}")))
    }

    /// Check that every reference resolves before anything runs
    ///
    /// `Get` nodes and placeholder arguments must name an external parameter
    /// or a binding of an enclosing `Let` made earlier in the same branch.
    /// A name bound twice in one `Let` is rejected.
    pub fn check_bindings<'a>(&self, params: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let params: HashSet<&str> = params.into_iter().collect();
        let mut scopes: Vec<HashSet<&str>> = Vec::new();
        check_node(&self.root, &params, &mut scopes)
    }

    /// True when the plan cannot modify data
    pub fn is_read_only(&self) -> bool {
        !self.root.any(&mut |node| match node {
            PlanNode::Execute(_) | PlanNode::Transaction(_) => true,
            PlanNode::Query(query) => !query.is_read_only(),
            _ => false,
        })
    }

    /// The query when the whole plan is one read
    pub fn as_single_query(&self) -> Option<&DbQuery> {
        match &self.root {
            PlanNode::Query(query) if query.is_read_only() => Some(query),
            _ => None,
        }
    }
}

impl From<PlanNode> for QueryPlan {
    fn from(root: PlanNode) -> Self {
        QueryPlan::new(root)
    }
}

fn check_node<'p>(
    node: &'p PlanNode,
    params: &HashSet<&str>,
    scopes: &mut Vec<HashSet<&'p str>>,
) -> Result<()> {
    let resolves = |name: &str, scopes: &[HashSet<&str>]| {
        params.contains(name) || scopes.iter().any(|frame| frame.contains(name))
    };

    match node {
        PlanNode::Let { bindings, expr } => {
            scopes.push(HashSet::new());
            for binding in bindings {
                if let Err(e) = check_node(&binding.expr, params, scopes) {
                    scopes.pop();
                    return Err(e);
                }
                let frame = scopes.last_mut().ok_or_else(|| Error::internal("scope stack underflow"))?;
                if !frame.insert(binding.name.as_str()) {
                    let name = binding.name.clone();
                    scopes.pop();
                    return Err(Error::binding(format!("'{name}' is bound twice in the same scope")));
                }
            }
            let result = check_node(expr, params, scopes);
            scopes.pop();
            result
        }
        PlanNode::Get { name } => {
            if resolves(name, scopes) {
                Ok(())
            } else {
                Err(Error::binding(format!("unresolved reference '{name}'")))
            }
        }
        _ => {
            let mut missing = None;
            for arg in node.args() {
                arg.for_each_placeholder(&mut |name| {
                    if missing.is_none() && !resolves(name, scopes) {
                        missing = Some(name.to_string());
                    }
                });
            }
            if let Some(name) = missing {
                return Err(Error::binding(format!("unresolved placeholder '{name}'")));
            }
            for child in node.children() {
                check_node(child, params, scopes)?;
            }
            Ok(())
        }
    }
}

/// One node of a query plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "camelCase")]
pub enum PlanNode {
    /// A constant, or a value computed from placeholders and generators
    Value(Arg),
    /// Look up a binding or external parameter
    Get {
        /// Name to resolve
        name: String,
    },
    /// Evaluate bindings once each, then the body with them in scope
    Let {
        /// Bindings, evaluated in order
        bindings: Vec<Binding>,
        /// Body
        expr: Box<PlanNode>,
    },
    /// The first of the named bindings that is not empty, else `[]`
    GetFirstNonEmpty {
        /// Candidate names, in priority order
        names: Vec<String>,
    },
    /// Evaluate in order; the last result is the result
    Seq(Vec<PlanNode>),
    /// Run a statement returning rows
    Query(DbQuery),
    /// Run a statement returning an affected-row count
    Execute(DbQuery),
    /// Flatten lists into one list
    Concat(Vec<PlanNode>),
    /// Add numbers
    Sum(Vec<PlanNode>),
    /// Zero or one element; more is an assertion failure
    Unique(Box<PlanNode>),
    /// Fail when the value is empty
    Required(Box<PlanNode>),
    /// Reverse a list
    Reverse(Box<PlanNode>),
    /// Items of `from` not present in `to`
    Diff {
        /// Source list
        from: Box<PlanNode>,
        /// Items to remove
        to: Box<PlanNode>,
    },
    /// Evaluate `then` or `else` depending on a rule over `value`
    If {
        /// Value the rule is checked against
        value: Box<PlanNode>,
        /// Rule
        rule: Rule,
        /// Branch taken when the rule holds
        then: Box<PlanNode>,
        /// Branch taken otherwise
        #[serde(rename = "else")]
        otherwise: Box<PlanNode>,
    },
    /// Run the child inside a transaction scope
    Transaction(Box<PlanNode>),
    /// No value
    Unit,
    /// Project one field out of a record or list of records
    MapField {
        /// Records
        records: Box<PlanNode>,
        /// Field to project
        field: String,
    },
    /// Attach child records to parent records
    Join {
        /// Parent records
        parent: Box<PlanNode>,
        /// Child relations
        children: Vec<JoinExpression>,
    },
    /// In-memory skip / take / distinct / reverse
    Process {
        /// Records
        expr: Box<PlanNode>,
        /// Operations
        operations: InMemoryOps,
    },
    /// Build a record from initializers after evaluating `expr`
    InitializeRecord {
        /// Statement whose last insert id feeds the initializers
        expr: Box<PlanNode>,
        /// Field initializers
        fields: BTreeMap<String, FieldInitializer>,
    },
    /// Apply field operations to a record
    MapRecord {
        /// Record
        expr: Box<PlanNode>,
        /// Operations per field
        fields: BTreeMap<String, FieldOperation>,
    },
    /// Shape raw records into the caller-facing result
    DataMap {
        /// Raw records
        expr: Box<PlanNode>,
        /// Target shape
        structure: ResultNode,
        /// Enum tables: enum name -> database value -> caller value
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        enums: BTreeMap<String, BTreeMap<String, String>>,
    },
    /// Check rules against a value and fail with `message` if any does not hold
    Validate {
        /// Value under test
        expr: Box<PlanNode>,
        /// Rules that must all hold
        rules: Vec<Rule>,
        /// Failure message
        message: String,
    },
}

impl PlanNode {
    /// A literal value
    pub fn literal(value: impl Into<Value>) -> Self {
        PlanNode::Value(Arg::Literal(value.into()))
    }

    /// Resolve `name`
    pub fn get(name: impl Into<String>) -> Self {
        PlanNode::Get { name: name.into() }
    }

    /// Bind `name` to `expr` while evaluating `body`
    pub fn let_in(name: impl Into<String>, expr: PlanNode, body: PlanNode) -> Self {
        PlanNode::Let {
            bindings: vec![Binding::new(name, expr)],
            expr: Box::new(body),
        }
    }

    /// A raw SQL read
    pub fn raw_query(sql: impl Into<String>, params: Vec<Arg>) -> Self {
        PlanNode::Query(DbQuery::raw(sql, params))
    }

    /// A raw SQL write
    pub fn raw_execute(sql: impl Into<String>, params: Vec<Arg>) -> Self {
        PlanNode::Execute(DbQuery::raw(sql, params))
    }

    /// Run `body` in a transaction scope
    pub fn transaction(body: PlanNode) -> Self {
        PlanNode::Transaction(Box::new(body))
    }

    /// Conditional
    pub fn if_then_else(value: PlanNode, rule: Rule, then: PlanNode, otherwise: PlanNode) -> Self {
        PlanNode::If {
            value: Box::new(value),
            rule,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Node kind name as it appears in the serialized plan
    pub fn kind(&self) -> &'static str {
        match self {
            PlanNode::Value(_) => "value",
            PlanNode::Get { .. } => "get",
            PlanNode::Let { .. } => "let",
            PlanNode::GetFirstNonEmpty { .. } => "getFirstNonEmpty",
            PlanNode::Seq(_) => "seq",
            PlanNode::Query(_) => "query",
            PlanNode::Execute(_) => "execute",
            PlanNode::Concat(_) => "concat",
            PlanNode::Sum(_) => "sum",
            PlanNode::Unique(_) => "unique",
            PlanNode::Required(_) => "required",
            PlanNode::Reverse(_) => "reverse",
            PlanNode::Diff { .. } => "diff",
            PlanNode::If { .. } => "if",
            PlanNode::Transaction(_) => "transaction",
            PlanNode::Unit => "unit",
            PlanNode::MapField { .. } => "mapField",
            PlanNode::Join { .. } => "join",
            PlanNode::Process { .. } => "process",
            PlanNode::InitializeRecord { .. } => "initializeRecord",
            PlanNode::MapRecord { .. } => "mapRecord",
            PlanNode::DataMap { .. } => "dataMap",
            PlanNode::Validate { .. } => "validate",
        }
    }

    /// Direct child nodes, in evaluation order
    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::Value(_)
            | PlanNode::Get { .. }
            | PlanNode::GetFirstNonEmpty { .. }
            | PlanNode::Query(_)
            | PlanNode::Execute(_)
            | PlanNode::Unit => Vec::new(),
            PlanNode::Let { bindings, expr } => bindings
                .iter()
                .map(|b| &b.expr)
                .chain(std::iter::once(expr.as_ref()))
                .collect(),
            PlanNode::Seq(nodes) | PlanNode::Concat(nodes) | PlanNode::Sum(nodes) => nodes.iter().collect(),
            PlanNode::Unique(node)
            | PlanNode::Required(node)
            | PlanNode::Reverse(node)
            | PlanNode::Transaction(node) => vec![node.as_ref()],
            PlanNode::Diff { from, to } => vec![from.as_ref(), to.as_ref()],
            PlanNode::If {
                value,
                then,
                otherwise,
                ..
            } => vec![value.as_ref(), then.as_ref(), otherwise.as_ref()],
            PlanNode::MapField { records, .. } => vec![records.as_ref()],
            PlanNode::Join { parent, children } => std::iter::once(parent.as_ref())
                .chain(children.iter().map(|c| &c.child))
                .collect(),
            PlanNode::Process { expr, .. }
            | PlanNode::InitializeRecord { expr, .. }
            | PlanNode::MapRecord { expr, .. }
            | PlanNode::DataMap { expr, .. }
            | PlanNode::Validate { expr, .. } => vec![expr.as_ref()],
        }
    }

    /// Argument values embedded directly in this node
    pub fn args(&self) -> Vec<&Arg> {
        match self {
            PlanNode::Value(arg) => vec![arg],
            PlanNode::Query(query) | PlanNode::Execute(query) => query.params().iter().collect(),
            PlanNode::InitializeRecord { fields, .. } => fields
                .values()
                .filter_map(|f| match f {
                    FieldInitializer::Value { value } => Some(value),
                    FieldInitializer::LastInsertId => None,
                })
                .collect(),
            PlanNode::MapRecord { fields, .. } => fields.values().map(FieldOperation::arg).collect(),
            _ => Vec::new(),
        }
    }

    /// True if `pred` holds for this node or any descendant
    pub fn any(&self, pred: &mut impl FnMut(&PlanNode) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().into_iter().any(|child| child.any(pred))
    }

    /// Number of nodes in the subtree
    pub fn size(&self) -> usize {
        1 + self.children().into_iter().map(PlanNode::size).sum::<usize>()
    }
}

/// One `Let` binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Bound name
    pub name: String,
    /// Expression evaluated once
    pub expr: PlanNode,
}

impl Binding {
    /// Bind `name` to `expr`
    pub fn new(name: impl Into<String>, expr: PlanNode) -> Self {
        Binding {
            name: name.into(),
            expr,
        }
    }
}

/// An argument value inside a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Arg {
    /// Constant
    Literal(Value),
    /// Reference to a binding or external parameter
    Placeholder {
        /// Name to resolve
        name: String,
    },
    /// Call to a value generator such as `now` or `uuid`
    Generator {
        /// Generator name
        name: String,
        /// Generator arguments
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// List of arguments
    List(Vec<Arg>),
    /// Record of arguments
    Record(BTreeMap<String, Arg>),
}

impl Arg {
    /// A constant
    pub fn literal(value: impl Into<Value>) -> Self {
        Arg::Literal(value.into())
    }

    /// A reference to `name`
    pub fn placeholder(name: impl Into<String>) -> Self {
        Arg::Placeholder { name: name.into() }
    }

    /// A generator call without arguments
    pub fn generator(name: impl Into<String>) -> Self {
        Arg::Generator {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Visit every placeholder name inside this argument
    pub fn for_each_placeholder(&self, f: &mut impl FnMut(&str)) {
        match self {
            Arg::Literal(_) => {}
            Arg::Placeholder { name } => f(name),
            Arg::Generator { args, .. } | Arg::List(args) => {
                args.iter().for_each(|a| a.for_each_placeholder(f));
            }
            Arg::Record(fields) => fields.values().for_each(|a| a.for_each_placeholder(f)),
        }
    }
}

/// A data-access statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DbQuery {
    /// SQL text with backend placeholders already in place
    #[serde(rename_all = "camelCase")]
    RawSql {
        /// Statement text
        sql: String,
        /// Positional parameters
        #[serde(default)]
        params: Vec<Arg>,
        /// Declared type per parameter; missing entries are untyped
        #[serde(default)]
        arg_types: Vec<ArgType>,
    },
    /// SQL assembled from fragments; list parameters expand into tuples
    #[serde(rename_all = "camelCase")]
    TemplateSql {
        /// Template fragments
        fragments: Vec<Fragment>,
        /// One parameter per non-chunk fragment
        #[serde(default)]
        params: Vec<Arg>,
        /// Declared type per parameter
        #[serde(default)]
        arg_types: Vec<ArgType>,
        /// Placeholder rendering
        placeholder: PlaceholderFormat,
        /// Whether the statement may be split to respect the bind limit
        #[serde(default)]
        chunkable: bool,
    },
}

impl DbQuery {
    /// Raw SQL with untyped parameters
    pub fn raw(sql: impl Into<String>, params: Vec<Arg>) -> Self {
        DbQuery::RawSql {
            sql: sql.into(),
            params,
            arg_types: Vec::new(),
        }
    }

    /// Raw SQL with typed parameters
    pub fn raw_typed(sql: impl Into<String>, params: Vec<Arg>, arg_types: Vec<ArgType>) -> Self {
        DbQuery::RawSql {
            sql: sql.into(),
            params,
            arg_types,
        }
    }

    /// Parameters
    pub fn params(&self) -> &[Arg] {
        match self {
            DbQuery::RawSql { params, .. } | DbQuery::TemplateSql { params, .. } => params,
        }
    }

    /// Declared parameter types
    pub fn arg_types(&self) -> &[ArgType] {
        match self {
            DbQuery::RawSql { arg_types, .. } | DbQuery::TemplateSql { arg_types, .. } => arg_types,
        }
    }

    /// Declared type of parameter `index`
    pub fn arg_type(&self, index: usize) -> ArgType {
        self.arg_types().get(index).cloned().unwrap_or(ArgType::UNKNOWN)
    }

    /// Leading SQL text, enough to classify the statement
    pub fn leading_sql(&self) -> &str {
        match self {
            DbQuery::RawSql { sql, .. } => sql,
            DbQuery::TemplateSql { fragments, .. } => fragments
                .iter()
                .find_map(|f| match f {
                    Fragment::StringChunk { chunk } if !chunk.trim().is_empty() => Some(chunk.as_str()),
                    _ => None,
                })
                .unwrap_or(""),
        }
    }

    /// Whether the statement has a `RETURNING` clause
    pub fn uses_returning(&self) -> bool {
        let has_keyword = |text: &str| {
            text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .any(|word| word.eq_ignore_ascii_case("returning"))
        };
        match self {
            DbQuery::RawSql { sql, .. } => has_keyword(sql),
            DbQuery::TemplateSql { fragments, .. } => fragments.iter().any(|f| match f {
                Fragment::StringChunk { chunk } => has_keyword(chunk),
                _ => false,
            }),
        }
    }

    /// True for SELECT, EXPLAIN, SHOW and VALUES statements
    ///
    /// `WITH` may front a DELETE or UPDATE and `PRAGMA` may assign, so
    /// both count as writes.
    pub fn is_read_only(&self) -> bool {
        let head = self
            .leading_sql()
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        matches!(head.as_str(), "SELECT" | "EXPLAIN" | "SHOW" | "VALUES")
    }
}

/// A piece of a SQL template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Fragment {
    /// Literal SQL text
    StringChunk {
        /// Text
        chunk: String,
    },
    /// One placeholder for the next parameter
    Parameter,
    /// `(p1,p2,...)` for the next parameter, which is a list
    ParameterTuple,
    /// Several tuples for the next parameter, which is a list of lists
    #[serde(rename_all = "camelCase")]
    ParameterTupleList {
        /// Text before each tuple
        item_prefix: String,
        /// Text between items of a tuple
        item_separator: String,
        /// Text after each tuple
        item_suffix: String,
        /// Text between tuples
        group_separator: String,
    },
}

impl Fragment {
    /// Literal SQL text
    pub fn chunk(text: impl Into<String>) -> Self {
        Fragment::StringChunk { chunk: text.into() }
    }
}

/// How placeholders are written in the SQL text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderFormat {
    /// Placeholder text, or prefix when numbered
    pub prefix: String,
    /// Append a 1-based position (`$1`, `$2`, ...)
    pub has_numbering: bool,
}

impl PlaceholderFormat {
    /// `$1`, `$2`, ...
    pub fn numbered(prefix: impl Into<String>) -> Self {
        PlaceholderFormat {
            prefix: prefix.into(),
            has_numbering: true,
        }
    }

    /// `?` for every position
    pub fn positional(marker: impl Into<String>) -> Self {
        PlaceholderFormat {
            prefix: marker.into(),
            has_numbering: false,
        }
    }

    /// Placeholder text for 1-based `position`
    pub fn render(&self, position: usize) -> String {
        if self.has_numbering {
            format!("{}{}", self.prefix, position)
        } else {
            self.prefix.clone()
        }
    }
}

/// Predicate used by `If` and `Validate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "camelCase")]
pub enum Rule {
    /// The value holds exactly this many rows
    RowCountEq(usize),
    /// The value does not hold this many rows
    RowCountNeq(usize),
    /// The value is an affected-row count equal to this
    AffectedRowCountEq(u64),
    /// Never holds
    Never,
}

/// Parent/child stitching for one relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinExpression {
    /// Child records
    pub child: PlanNode,
    /// Key pairs: (parent field, child field)
    pub on: Vec<(String, String)>,
    /// Field on the parent that receives the children
    pub parent_field: String,
    /// One child (or null) instead of a list
    #[serde(default)]
    pub is_relation_unique: bool,
}

/// In-memory post-processing of a record list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InMemoryOps {
    /// Drop this many records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    /// Keep at most this many records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<usize>,
    /// Keep the first record per distinct combination of these fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinct: Option<Vec<String>>,
    /// Reverse the list before anything else
    #[serde(default)]
    pub reverse: bool,
    /// Operations applied to nested relation fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nested: BTreeMap<String, InMemoryOps>,
}

/// Initial value of one field of a new record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldInitializer {
    /// A computed value
    Value {
        /// Value
        value: Arg,
    },
    /// The id generated by the preceding insert
    LastInsertId,
}

/// Update applied to one field of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum FieldOperation {
    /// Replace
    Set(Arg),
    /// Add
    Add(Arg),
    /// Subtract
    Subtract(Arg),
    /// Multiply
    Multiply(Arg),
    /// Divide; division by zero yields null
    Divide(Arg),
}

impl FieldOperation {
    /// Operand
    pub fn arg(&self) -> &Arg {
        match self {
            FieldOperation::Set(arg)
            | FieldOperation::Add(arg)
            | FieldOperation::Subtract(arg)
            | FieldOperation::Multiply(arg)
            | FieldOperation::Divide(arg) => arg,
        }
    }
}

/// Target shape of a data map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResultNode {
    /// `{"count": n}` from an affected-row count
    AffectedRows,
    /// A record (or list of records) with mapped fields
    #[serde(rename_all = "camelCase")]
    Object {
        /// Source field holding the nested data; `None` maps the current record
        #[serde(default)]
        serialized_name: Option<String>,
        /// Output field name -> mapping
        fields: BTreeMap<String, ResultNode>,
        /// Drop null entries from lists
        #[serde(default)]
        skip_nulls: bool,
    },
    /// A scalar read from column `db_name`
    #[serde(rename_all = "camelCase")]
    Value {
        /// Source column
        db_name: String,
        /// Target type
        result_type: ResultType,
    },
}

/// Scalar target type of a data map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "inner", rename_all = "camelCase")]
pub enum ResultType {
    /// Keep as is
    Any,
    /// String
    String,
    /// 64-bit integer (truncating floats and numeric text)
    Int,
    /// Integer kept exact (as decimal text beyond i64)
    BigInt,
    /// Float
    Float,
    /// Boolean (accepts 0/1 and "true"/"false")
    Boolean,
    /// Exact decimal
    Decimal,
    /// Date or date-time
    Date,
    /// Time of day
    Time,
    /// JSON document
    Json,
    /// Nested object serialized as JSON
    Object,
    /// Bytes
    Bytes,
    /// List of an element type
    Array(Box<ResultType>),
    /// Enum mapped through the named table
    Enum(String),
}

impl ResultType {
    /// The matching parameter scalar, used when shaping values for output
    pub fn scalar(&self) -> ArgScalarType {
        match self {
            ResultType::String => ArgScalarType::String,
            ResultType::Int => ArgScalarType::Int,
            ResultType::BigInt => ArgScalarType::BigInt,
            ResultType::Float => ArgScalarType::Float,
            ResultType::Boolean => ArgScalarType::Boolean,
            ResultType::Decimal => ArgScalarType::Decimal,
            ResultType::Date | ResultType::Time => ArgScalarType::DateTime,
            ResultType::Json | ResultType::Object => ArgScalarType::Json,
            ResultType::Bytes => ArgScalarType::Bytes,
            ResultType::Enum(_) => ArgScalarType::Enum,
            ResultType::Array(inner) => inner.scalar(),
            ResultType::Any => ArgScalarType::Unknown,
        }
    }
}
