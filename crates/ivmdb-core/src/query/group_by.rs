//! GROUP BY and HAVING compilation.
//!
//! Grouped rows leave this stage as `{"$selected": {...}}`: the projection
//! is the only thing later stages can see, so HAVING and ORDER BY
//! expressions are rewritten to read aggregates and grouped columns through
//! `$selected` references.

use std::collections::BTreeMap;

use ivmdb_proto::{Expr, QueryIr, SelectField, Value};

use super::evaluator::{compile_expression, CompiledExpr};
use super::SELECTED_FIELD;
use crate::dataflow::{Aggregate, AggregateKind, Graph, NodeId, ReduceOperator};
use crate::error::{Error, Result};

/// Group key used when a query aggregates without GROUP BY.
pub const SINGLE_GROUP_KEY: &str = "single_group";

/// How a projected field of a grouped row is produced.
enum GroupedField {
    /// Read from the reduce output under the field's alias.
    Aggregate(String),
    /// Component `i` of the group key.
    KeyPart(usize),
}

fn selected_ref(alias: &str) -> Expr {
    Expr::path([SELECTED_FIELD, alias])
}

/// Rewrite `expr` so it can be evaluated against a projected row: every
/// subexpression equal to a SELECT field becomes a `$selected` reference.
///
/// An aggregate with no matching SELECT field is an error.
pub fn replace_with_selected_refs(expr: &Expr, select: &[SelectField]) -> Result<Expr> {
    if let Some(field) = select.iter().find(|f| f.expr == *expr) {
        return Ok(selected_ref(&field.alias));
    }
    match expr {
        Expr::Agg { name, .. } => Err(Error::AggregateNotInSelect { name: name.clone() }),
        Expr::Func { name, args } => Ok(Expr::Func {
            name: name.clone(),
            args: args
                .iter()
                .map(|arg| replace_with_selected_refs(arg, select))
                .collect::<Result<_>>()?,
        }),
        other => Ok(other.clone()),
    }
}

fn aggregate_for(field: &SelectField, name: &str, args: &[Expr]) -> Result<Aggregate> {
    let kind = AggregateKind::parse(name).ok_or_else(|| Error::UnsupportedAggregate {
        name: name.to_string(),
    })?;
    let arg: CompiledExpr = match args.first() {
        Some(expr) => compile_expression(expr)?,
        // count() with no argument counts rows.
        None => compile_expression(&Expr::val(1))?,
    };
    Ok(Aggregate::new(field.alias.clone(), kind, move |row| arg(row)))
}

/// Add the reduce stage for a grouped query and return the node emitting
/// `{"$selected": ...}` rows keyed by group.
pub fn compile_group_by(graph: &mut Graph, input: NodeId, query: &QueryIr) -> Result<NodeId> {
    let key_exprs: Vec<CompiledExpr> = query
        .group_by
        .iter()
        .map(compile_expression)
        .collect::<Result<_>>()?;

    let mut aggregates = Vec::new();
    let mut fields = Vec::new();
    for field in query.select.iter().flatten() {
        match &field.expr {
            Expr::Agg { name, args } => {
                aggregates.push(aggregate_for(field, name, args)?);
                fields.push((field.alias.clone(), GroupedField::Aggregate(field.alias.clone())));
            }
            expr => {
                if let Some(Expr::Agg { name, .. }) = find_aggregate(expr) {
                    return Err(Error::MisplacedAggregate { name: name.clone() });
                }
                let position = query
                    .group_by
                    .iter()
                    .position(|g| g == expr)
                    .ok_or_else(|| Error::NonAggregateNotInGroupBy {
                        alias: field.alias.clone(),
                    })?;
                fields.push((field.alias.clone(), GroupedField::KeyPart(position)));
            }
        }
    }
    if query.select.is_none() {
        fields = (0..query.group_by.len())
            .map(|i| (format!("__key_{i}"), GroupedField::KeyPart(i)))
            .collect();
    }

    tracing::debug!(
        keys = key_exprs.len(),
        aggregates = aggregates.len(),
        "compiling group by"
    );

    let key_count = key_exprs.len();
    let reduce = ReduceOperator::new(
        move |entry| match key_exprs.as_slice() {
            [] => Value::from(SINGLE_GROUP_KEY),
            [single] => single(&entry.value),
            many => Value::Array(many.iter().map(|f| f(&entry.value)).collect()),
        },
        aggregates,
    );
    let reduced = graph.add_operator(reduce, &[input])?;

    graph.map(reduced, move |mut entry| {
        let key = entry
            .value
            .get(crate::dataflow::GROUP_KEY_FIELD)
            .cloned()
            .unwrap_or(Value::Null);
        let mut selected = BTreeMap::new();
        for (alias, source) in &fields {
            let value = match source {
                GroupedField::Aggregate(name) => {
                    entry.value.get(name).cloned().unwrap_or(Value::Null)
                }
                GroupedField::KeyPart(_) if key_count == 1 => key.clone(),
                GroupedField::KeyPart(i) => key
                    .as_array()
                    .and_then(|parts| parts.get(*i))
                    .cloned()
                    .unwrap_or(Value::Null),
            };
            selected.insert(alias.clone(), value);
        }
        entry.value = Value::object([(SELECTED_FIELD, Value::Object(selected))]);
        entry
    })
}

fn find_aggregate(expr: &Expr) -> Option<&Expr> {
    match expr {
        Expr::Agg { .. } => Some(expr),
        Expr::Func { args, .. } => args.iter().find_map(find_aggregate),
        _ => None,
    }
}
