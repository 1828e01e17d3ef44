//! Query IR types.
//!
//! A query is a tree with one [`QueryIr`] node per level. The leaf sources are
//! collection references; nested levels are subquery references that wrap a
//! whole query together with the alias the outer level sees it under.
//!
//! The IR is immutable once built. Subqueries are held behind [`Arc`] so
//! rewrites can share untouched subtrees and allocate new nodes only where
//! something changes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// A query source: a base collection or a nested query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Source {
    /// Direct reference to a base collection.
    CollectionRef(CollectionRef),
    /// Reference to a nested query.
    QueryRef(QueryRef),
}

/// Reference to a base collection under an alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    /// Name of the owning collection.
    pub collection: String,
    /// Alias the query refers to the collection by.
    pub alias: String,
}

/// Reference to a nested query under an alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRef {
    /// The nested query.
    pub query: Arc<QueryIr>,
    /// Alias the outer query refers to the nested results by.
    pub alias: String,
}

impl Source {
    /// Create a collection source.
    pub fn collection(collection: impl Into<String>, alias: impl Into<String>) -> Self {
        Source::CollectionRef(CollectionRef {
            collection: collection.into(),
            alias: alias.into(),
        })
    }

    /// Create a subquery source.
    pub fn query(query: impl Into<Arc<QueryIr>>, alias: impl Into<String>) -> Self {
        Source::QueryRef(QueryRef {
            query: query.into(),
            alias: alias.into(),
        })
    }

    /// The alias this source is visible under.
    pub fn alias(&self) -> &str {
        match self {
            Source::CollectionRef(c) => &c.alias,
            Source::QueryRef(q) => &q.alias,
        }
    }

    /// Check if this is a direct collection reference.
    pub fn is_collection(&self) -> bool {
        matches!(self, Source::CollectionRef(_))
    }
}

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    /// Matched pairs only.
    #[default]
    Inner,
    /// All rows of the main side, padded when unmatched.
    Left,
    /// All rows of the joined side, padded when unmatched.
    Right,
    /// All rows of both sides.
    Full,
}

impl JoinType {
    /// Whether unmatched rows of the main (left) side are kept, padded.
    pub fn keeps_unmatched_left(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    /// Whether unmatched rows of the joined (right) side are kept, padded.
    pub fn keeps_unmatched_right(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }

    /// Whether this is an outer join of any kind.
    pub fn is_outer(self) -> bool {
        self != JoinType::Inner
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Full => "full",
        };
        f.write_str(name)
    }
}

/// One entry of a query's join list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    /// The newly introduced source.
    pub from: Source,
    /// Join type.
    #[serde(rename = "type", default)]
    pub join_type: JoinType,
    /// Expression evaluated against the sources introduced so far.
    pub left: Expr,
    /// Expression evaluated against the joined source.
    pub right: Expr,
}

impl JoinClause {
    /// Create a join clause.
    pub fn new(join_type: JoinType, from: Source, left: Expr, right: Expr) -> Self {
        Self {
            from,
            join_type,
            left,
            right,
        }
    }

    /// Create an inner join clause.
    pub fn inner(from: Source, left: Expr, right: Expr) -> Self {
        Self::new(JoinType::Inner, from, left, right)
    }

    /// Create a left join clause.
    pub fn left(from: Source, left: Expr, right: Expr) -> Self {
        Self::new(JoinType::Left, from, left, right)
    }

    /// Create a right join clause.
    pub fn right(from: Source, left: Expr, right: Expr) -> Self {
        Self::new(JoinType::Right, from, left, right)
    }

    /// Create a full join clause.
    pub fn full(from: Source, left: Expr, right: Expr) -> Self {
        Self::new(JoinType::Full, from, left, right)
    }
}

/// An expression node.
///
/// Shapes this version does not recognize deserialize to [`Expr::Unknown`]
/// so partially constructed or newer IR can still be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Expr {
    /// A literal value.
    Val {
        /// The literal.
        value: Value,
    },
    /// A property reference: `[alias, field, ...]`.
    ///
    /// An empty path, or an empty first segment, names no source.
    Ref {
        /// Alias followed by the field path.
        path: Vec<String>,
    },
    /// A function call such as `eq`, `and` or `upper`.
    Func {
        /// Function name.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// An aggregate such as `count` or `sum`.
    Agg {
        /// Aggregate name.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Unrecognized expression shape.
    #[serde(other)]
    Unknown,
}

impl Expr {
    /// A literal value.
    pub fn val(value: impl Into<Value>) -> Self {
        Expr::Val {
            value: value.into(),
        }
    }

    /// A reference to `alias.field`.
    pub fn col(alias: impl Into<String>, field: impl Into<String>) -> Self {
        Expr::Ref {
            path: vec![alias.into(), field.into()],
        }
    }

    /// A reference to an arbitrary path.
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::Ref {
            path: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// A function call.
    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Func {
            name: name.into(),
            args,
        }
    }

    /// An aggregate.
    pub fn agg(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Agg {
            name: name.into(),
            args,
        }
    }

    /// `a = b`
    pub fn eq(a: Expr, b: Expr) -> Self {
        Self::func("eq", vec![a, b])
    }

    /// `a > b`
    pub fn gt(a: Expr, b: Expr) -> Self {
        Self::func("gt", vec![a, b])
    }

    /// `a >= b`
    pub fn gte(a: Expr, b: Expr) -> Self {
        Self::func("gte", vec![a, b])
    }

    /// `a < b`
    pub fn lt(a: Expr, b: Expr) -> Self {
        Self::func("lt", vec![a, b])
    }

    /// `a <= b`
    pub fn lte(a: Expr, b: Expr) -> Self {
        Self::func("lte", vec![a, b])
    }

    /// Conjunction.
    pub fn and(args: Vec<Expr>) -> Self {
        Self::func("and", args)
    }

    /// Disjunction.
    pub fn or(args: Vec<Expr>) -> Self {
        Self::func("or", args)
    }

    /// Negation.
    pub fn not(arg: Expr) -> Self {
        Self::func("not", vec![arg])
    }

    /// `count(arg)`
    pub fn count(arg: Expr) -> Self {
        Self::agg("count", vec![arg])
    }

    /// `sum(arg)`
    pub fn sum(arg: Expr) -> Self {
        Self::agg("sum", vec![arg])
    }

    /// Check if this is a call to the named function.
    pub fn is_func(&self, function: &str) -> bool {
        matches!(self, Expr::Func { name, .. } if name == function)
    }

    /// Check whether an aggregate appears anywhere in this expression.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Agg { .. } => true,
            Expr::Func { args, .. } => args.iter().any(Expr::contains_aggregate),
            _ => false,
        }
    }

    /// Check whether an unrecognized node appears anywhere in this expression.
    pub fn contains_unknown(&self) -> bool {
        match self {
            Expr::Unknown => true,
            Expr::Func { args, .. } | Expr::Agg { args, .. } => {
                args.iter().any(Expr::contains_unknown)
            }
            _ => false,
        }
    }

    /// Visit every property reference path in this expression.
    pub fn for_each_ref<'a>(&'a self, visit: &mut impl FnMut(&'a [String])) {
        match self {
            Expr::Ref { path } => visit(path),
            Expr::Func { args, .. } | Expr::Agg { args, .. } => {
                for arg in args {
                    arg.for_each_ref(visit);
                }
            }
            Expr::Val { .. } | Expr::Unknown => {}
        }
    }
}

/// A WHERE or HAVING entry.
///
/// Residual clauses are copies the optimizer leaves behind to preserve outer
/// join semantics; they are evaluated normally but never relocated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    /// The boolean expression.
    pub expr: Expr,
    /// Whether this is a residual copy of a relocated clause.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub residual: bool,
}

impl WhereClause {
    /// Create a plain clause.
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            residual: false,
        }
    }

    /// Create a residual clause.
    pub fn residual(expr: Expr) -> Self {
        Self {
            expr,
            residual: true,
        }
    }
}

impl From<Expr> for WhereClause {
    fn from(expr: Expr) -> Self {
        Self::new(expr)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// Where nulls sort relative to other values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    /// Nulls before every other value.
    #[default]
    First,
    /// Nulls after every other value.
    Last,
}

/// String collation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringSort {
    /// Byte-wise lexical order.
    #[default]
    Lexical,
    /// Case-insensitive order with lexical tie-break.
    Locale,
}

/// Comparison policy for one ORDER BY entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareOptions {
    /// Sort direction.
    #[serde(default)]
    pub direction: Direction,
    /// Null placement.
    #[serde(default)]
    pub nulls: NullsOrder,
    /// String collation.
    #[serde(default)]
    pub string_sort: StringSort,
}

impl CompareOptions {
    /// Ascending, nulls first, lexical.
    pub fn asc() -> Self {
        Self::default()
    }

    /// Descending, nulls first, lexical.
    pub fn desc() -> Self {
        Self {
            direction: Direction::Desc,
            ..Self::default()
        }
    }

    /// Set null placement.
    pub fn with_nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = nulls;
        self
    }

    /// Set string collation.
    pub fn with_string_sort(mut self, string_sort: StringSort) -> Self {
        self.string_sort = string_sort;
        self
    }
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByClause {
    /// Sort expression.
    pub expr: Expr,
    /// Comparison policy.
    #[serde(default)]
    pub options: CompareOptions,
}

impl OrderByClause {
    /// Ascending order on an expression.
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            options: CompareOptions::asc(),
        }
    }

    /// Descending order on an expression.
    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            options: CompareOptions::desc(),
        }
    }

    /// Replace the comparison policy.
    pub fn with_options(mut self, options: CompareOptions) -> Self {
        self.options = options;
        self
    }
}

/// One projected field of a SELECT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectField {
    /// Output field name.
    pub alias: String,
    /// Projected expression.
    pub expr: Expr,
}

impl SelectField {
    /// Create a projected field.
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: alias.into(),
            expr,
        }
    }
}

/// An opaque, user-supplied row function.
///
/// Row functions cannot be inspected, so two are equal only when they are
/// the same allocation.
#[derive(Clone)]
pub struct RowFn(Arc<dyn Fn(&Value) -> Value + Send + Sync>);

impl RowFn {
    /// Wrap a closure.
    pub fn new(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Invoke the function on a row.
    pub fn call(&self, row: &Value) -> Value {
        (self.0)(row)
    }
}

impl fmt::Debug for RowFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowFn({:p})", Arc::as_ptr(&self.0))
    }
}

impl PartialEq for RowFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// One level of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIr {
    /// Main source.
    pub from: Source,
    /// Projection, in output order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<SelectField>>,
    /// Joins, applied in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub join: Vec<JoinClause>,
    /// Filters (top-level conjunction).
    #[serde(rename = "where", default, skip_serializing_if = "Vec::is_empty")]
    pub where_clauses: Vec<WhereClause>,
    /// Grouping expressions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<Expr>,
    /// Post-aggregation filters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub having: Vec<WhereClause>,
    /// Ordering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderByClause>,
    /// Window size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Window start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Deduplicate selected rows.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub distinct: bool,
    /// Opaque projection function.
    #[serde(skip)]
    pub fn_select: Option<RowFn>,
    /// Opaque row filters.
    #[serde(skip)]
    pub fn_where: Vec<RowFn>,
    /// Opaque post-aggregation filters.
    #[serde(skip)]
    pub fn_having: Vec<RowFn>,
}

impl QueryIr {
    /// Create a query over a source.
    pub fn new(from: Source) -> Self {
        Self {
            from,
            select: None,
            join: Vec::new(),
            where_clauses: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            fn_select: None,
            fn_where: Vec::new(),
            fn_having: Vec::new(),
        }
    }

    /// Create a query over a collection.
    pub fn from_collection(collection: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(Source::collection(collection, alias))
    }

    /// Parse a query from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the query to pretty JSON. Row functions are omitted.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the projection.
    pub fn with_select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<String>,
    {
        self.select = Some(
            fields
                .into_iter()
                .map(|(alias, expr)| SelectField::new(alias, expr))
                .collect(),
        );
        self
    }

    /// Append a join.
    pub fn with_join(mut self, join: JoinClause) -> Self {
        self.join.push(join);
        self
    }

    /// Append a filter.
    pub fn with_where(mut self, expr: Expr) -> Self {
        self.where_clauses.push(WhereClause::new(expr));
        self
    }

    /// Set grouping expressions.
    pub fn with_group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    /// Append a post-aggregation filter.
    pub fn with_having(mut self, expr: Expr) -> Self {
        self.having.push(WhereClause::new(expr));
        self
    }

    /// Append an ordering.
    pub fn with_order_by(mut self, order: OrderByClause) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the window size.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the window start.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Enable DISTINCT.
    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Set an opaque projection.
    pub fn with_fn_select(mut self, f: RowFn) -> Self {
        self.fn_select = Some(f);
        self
    }

    /// Append an opaque row filter.
    pub fn with_fn_where(mut self, f: RowFn) -> Self {
        self.fn_where.push(f);
        self
    }

    /// Append an opaque post-aggregation filter.
    pub fn with_fn_having(mut self, f: RowFn) -> Self {
        self.fn_having.push(f);
        self
    }

    /// Check if this level has any joins.
    pub fn has_joins(&self) -> bool {
        !self.join.is_empty()
    }

    /// Check if the projection contains an aggregate.
    pub fn select_has_aggregates(&self) -> bool {
        self.select
            .as_ref()
            .is_some_and(|fields| fields.iter().any(|f| f.expr.contains_aggregate()))
    }

    /// Iterate over every source introduced at this level, main source first.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        std::iter::once(&self.from).chain(self.join.iter().map(|j| &j.from))
    }
}
