//! Query IR to dataflow graph compilation.
//!
//! A query level compiles to this pipeline, each stage feeding the next:
//!
//! ```text
//! sources -> namespace -> joins -> WHERE -> SELECT | GROUP BY -> HAVING
//!         -> DISTINCT -> ORDER BY / window -> output
//! ```
//!
//! Rows between the namespace and SELECT stages are namespaced objects
//! (`{alias: row, ...}`). SELECT adds the projection under `$selected`;
//! grouping and DISTINCT reduce the row to the projection alone. Subqueries
//! compile to their own pipeline whose output feeds the outer level like a
//! collection would.

use std::collections::HashMap;
use std::sync::Arc;

use ivmdb_proto::{Expr, QueryIr, Source, Value};

use super::comparator::compare_tuples;
use super::evaluator::{compile_expression, compile_predicate, CompiledExpr};
use super::group_by::{compile_group_by, replace_with_selected_refs};
use super::joins::analyze_join_expressions;
use super::optimizer::{OptimizationResult, Optimizer};
use super::SELECTED_FIELD;
use crate::config::OptimizerConfig;
use crate::dataflow::{DistinctOperator, Entry, Graph, NodeId, OutputHandle};
use crate::error::{Error, Result};
use crate::join::{JoinKey, JoinOperator};
use crate::topk::{TopKOperator, ValueComparator, Window, WindowHandle};

/// A query compiled into a runnable graph.
pub struct CompiledQuery {
    /// The dataflow graph, finalized.
    pub graph: Graph,
    /// Input nodes per collection name. A collection referenced under several
    /// aliases has one input per reference.
    pub inputs: HashMap<String, Vec<NodeId>>,
    /// Sink receiving the result deltas.
    pub output: OutputHandle,
    /// Window control of the root ORDER BY, if the query has one.
    pub window: Option<WindowHandle>,
    /// The query after optimization, as compiled.
    pub optimized_query: QueryIr,
    /// Root-level single-source filters, keyed by alias.
    pub source_where_clauses: HashMap<String, Expr>,
}

impl CompiledQuery {
    /// Input nodes fed by the named collection.
    pub fn inputs_for(&self, collection: &str) -> &[NodeId] {
        self.inputs
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Optimize and compile a query.
pub fn compile_query(query: &QueryIr, config: &OptimizerConfig) -> Result<CompiledQuery> {
    let OptimizationResult {
        optimized_query,
        source_where_clauses,
    } = Optimizer::new(config.clone()).optimize(query);

    let mut compiler = Compiler::default();
    let (root, window) = compiler.compile_level(&optimized_query)?;
    let mut graph = compiler.graph;
    let (_, output) = graph.output(root)?;
    graph.finalize()?;

    tracing::debug!(
        nodes = graph.len(),
        collections = compiler.inputs.len(),
        windowed = window.is_some(),
        "query compiled"
    );

    Ok(CompiledQuery {
        graph,
        inputs: compiler.inputs,
        output,
        window,
        optimized_query,
        source_where_clauses,
    })
}

fn selected(value: &Value) -> Value {
    value.get(SELECTED_FIELD).cloned().unwrap_or(Value::Null)
}

fn with_selected(row: Value, projection: Value) -> Value {
    match row {
        Value::Object(mut fields) => {
            fields.insert(SELECTED_FIELD.to_string(), projection);
            Value::Object(fields)
        }
        _ => Value::object([(SELECTED_FIELD, projection)]),
    }
}

/// Reject property references to aliases this level does not introduce.
/// `$selected` and paths without an alias are always allowed.
fn check_aliases(query: &QueryIr, available: &[String]) -> Result<()> {
    let exprs = query
        .where_clauses
        .iter()
        .chain(&query.having)
        .map(|clause| &clause.expr)
        .chain(query.select.iter().flatten().map(|field| &field.expr))
        .chain(&query.group_by)
        .chain(query.order_by.iter().map(|clause| &clause.expr));

    let mut unknown = None;
    for expr in exprs {
        expr.for_each_ref(&mut |path| {
            let Some(alias) = path.first().filter(|a| !a.is_empty()) else {
                return;
            };
            if unknown.is_none()
                && alias != SELECTED_FIELD
                && !available.iter().any(|known| known == alias)
            {
                unknown = Some(alias.clone());
            }
        });
        if let Some(alias) = unknown.take() {
            return Err(Error::UnknownSourceAlias { alias });
        }
    }
    Ok(())
}

#[derive(Default)]
struct Compiler {
    graph: Graph,
    inputs: HashMap<String, Vec<NodeId>>,
    /// Compiled subqueries, keyed by the address of their shared IR node.
    subqueries: HashMap<*const QueryIr, NodeId>,
}

impl Compiler {
    /// Compile one query level. Returns the node emitting projected rows and
    /// the level's window handle when it has an ORDER BY.
    fn compile_level(&mut self, query: &QueryIr) -> Result<(NodeId, Option<WindowHandle>)> {
        if query.distinct && query.select.is_none() && query.fn_select.is_none() {
            return Err(Error::DistinctRequiresSelect);
        }
        if query.order_by.is_empty() && (query.limit.is_some() || query.offset.is_some()) {
            return Err(Error::LimitOffsetRequireOrderBy);
        }

        let main_alias = query.from.alias().to_string();
        let mut node = self.compile_source(&query.from)?;

        let mut available = vec![main_alias.clone()];
        for join in &query.join {
            let joined_alias = join.from.alias();
            let joined = self.compile_source(&join.from)?;
            let (main_expr, joined_expr) =
                analyze_join_expressions(&join.left, &join.right, &available, joined_alias)?;
            if available.iter().any(|alias| alias == joined_alias) {
                return Err(Error::DuplicateSourceAlias {
                    alias: joined_alias.to_string(),
                });
            }
            let main_key = compile_expression(&main_expr)?;
            let joined_key = compile_expression(&joined_expr)?;
            let operator = JoinOperator::new(
                join.join_type,
                move |entry: &Entry| JoinKey::from_value(main_key(&entry.value)),
                move |entry: &Entry| JoinKey::from_value(joined_key(&entry.value)),
            );
            node = self.graph.add_operator(operator, &[node, joined])?;
            available.push(joined_alias.to_string());
        }
        check_aliases(query, &available)?;

        for clause in &query.where_clauses {
            let predicate = compile_predicate(&clause.expr)?;
            node = self.graph.filter(node, move |entry| predicate(&entry.value))?;
        }
        for f in &query.fn_where {
            let f = f.clone();
            node = self
                .graph
                .filter(node, move |entry| f.call(&entry.value).is_truthy())?;
        }

        let grouped = !query.group_by.is_empty() || query.select_has_aggregates();
        if grouped {
            node = compile_group_by(&mut self.graph, node, query)?;
        } else {
            node = self.compile_select(node, query, &main_alias)?;
        }

        for clause in &query.having {
            let expr = match (&query.select, grouped) {
                (Some(select), true) => replace_with_selected_refs(&clause.expr, select)?,
                _ => clause.expr.clone(),
            };
            let predicate = compile_predicate(&expr)?;
            node = self.graph.filter(node, move |entry| predicate(&entry.value))?;
        }
        for f in &query.fn_having {
            let f = f.clone();
            node = self
                .graph
                .filter(node, move |entry| f.call(&entry.value).is_truthy())?;
        }

        if query.distinct {
            let distinct = DistinctOperator::new(|entry: &Entry| selected(&entry.value));
            node = self.graph.add_operator(distinct, &[node])?;
            node = self.graph.map(node, |mut entry| {
                entry.value = Value::object([(SELECTED_FIELD, entry.value)]);
                entry
            })?;
        }

        let mut window = None;
        if !query.order_by.is_empty() {
            let comparator = self.order_comparator(query, grouped)?;
            let operator = TopKOperator::new(
                Window::new(query.offset.unwrap_or(0), query.limit),
                comparator,
            );
            window = Some(operator.window_handle());
            node = self.graph.add_operator(operator, &[node])?;
        }

        node = self.graph.map(node, |mut entry| {
            entry.value = selected(&entry.value);
            entry
        })?;
        Ok((node, window))
    }

    fn compile_select(&mut self, node: NodeId, query: &QueryIr, main_alias: &str) -> Result<NodeId> {
        if let Some(f) = &query.fn_select {
            let f = f.clone();
            return self.graph.map(node, move |mut entry| {
                let projection = f.call(&entry.value);
                entry.value = with_selected(entry.value, projection);
                entry
            });
        }

        if let Some(select) = &query.select {
            let fields: Vec<(String, CompiledExpr)> = select
                .iter()
                .map(|field| Ok((field.alias.clone(), compile_expression(&field.expr)?)))
                .collect::<Result<_>>()?;
            return self.graph.map(node, move |mut entry| {
                let projection = Value::object(
                    fields
                        .iter()
                        .map(|(alias, f)| (alias.clone(), f(&entry.value))),
                );
                entry.value = with_selected(entry.value, projection);
                entry
            });
        }

        if query.join.is_empty() {
            let alias = main_alias.to_string();
            return self.graph.map(node, move |mut entry| {
                let projection = entry.value.get(&alias).cloned().unwrap_or(Value::Null);
                entry.value = with_selected(entry.value, projection);
                entry
            });
        }

        self.graph.map(node, |mut entry| {
            let projection = entry.value.clone();
            entry.value = with_selected(entry.value, projection);
            entry
        })
    }

    fn order_comparator(&self, query: &QueryIr, grouped: bool) -> Result<ValueComparator> {
        // Rows that were reduced to their projection are ordered through it.
        let projected = grouped || query.distinct;
        let mut exprs: Vec<CompiledExpr> = Vec::with_capacity(query.order_by.len());
        for clause in &query.order_by {
            let expr = match (&query.select, projected) {
                (Some(select), true) => replace_with_selected_refs(&clause.expr, select)?,
                _ => clause.expr.clone(),
            };
            exprs.push(compile_expression(&expr)?);
        }
        let options: Vec<_> = query.order_by.iter().map(|c| c.options).collect();

        Ok(Arc::new(move |a: &Value, b: &Value| {
            let left: Vec<Value> = exprs.iter().map(|f| f(a)).collect();
            let right: Vec<Value> = exprs.iter().map(|f| f(b)).collect();
            compare_tuples(&left, &right, &options)
        }))
    }

    /// Compile a source into a node emitting `{alias: row}` entries.
    fn compile_source(&mut self, source: &Source) -> Result<NodeId> {
        let node = match source {
            Source::CollectionRef(collection) => {
                let input = self.graph.add_input()?;
                self.inputs
                    .entry(collection.collection.clone())
                    .or_default()
                    .push(input);
                input
            }
            Source::QueryRef(subquery) => {
                let address = Arc::as_ptr(&subquery.query);
                match self.subqueries.get(&address) {
                    Some(node) => *node,
                    None => {
                        let (node, _) = self.compile_level(&subquery.query)?;
                        self.subqueries.insert(address, node);
                        node
                    }
                }
            }
        };

        let alias = source.alias().to_string();
        self.graph.map(node, move |mut entry| {
            entry.value = Value::object([(alias.as_str(), std::mem::take(&mut entry.value))]);
            entry.order = None;
            entry
        })
    }
}
