//! Predicate pushdown.
//!
//! The optimizer rewrites a query so that filters touching a single source
//! run against that source before any join. Each pass works level by level,
//! innermost subqueries first:
//!
//! 1. Split the level's WHERE into its top-level conjuncts (OR is never
//!    split) and classify each by the aliases it references.
//! 2. Drop constant clauses. Keep multi-source clauses, and anything holding
//!    an unrecognized node, at the current level.
//! 3. Push single-source clauses into their source: a collection becomes a
//!    one-clause subquery, an existing subquery receives the clause only
//!    when filtering it first cannot change its output.
//! 4. A pushed clause on the nullable side of an outer join also stays
//!    behind as a residual clause, so padded rows are still filtered after
//!    the join.
//!
//! Passes repeat until the tree stops changing or the iteration bound is
//! hit, after which subqueries left with nothing to do are collapsed into
//! their inner source. The input is never modified; unchanged subtrees are
//! shared with the output.

use std::collections::{BTreeSet, HashMap, HashSet};

use ivmdb_proto::{Expr, QueryIr, QueryRef, SelectField, Source, WhereClause};

use crate::config::OptimizerConfig;

/// Output of [`Optimizer::optimize`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    /// The rewritten query.
    pub optimized_query: QueryIr,
    /// Root-level single-source filters on direct collection references,
    /// keyed by alias. A storage layer can use these to load only rows that
    /// can possibly match.
    pub source_where_clauses: HashMap<String, Expr>,
}

/// Which sources a WHERE conjunct depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ClauseSources {
    /// References no source.
    Constant,
    /// References exactly one alias, always through a field.
    Single(String),
    /// References several aliases, or a whole namespace.
    Multi,
    /// Contains an unrecognized node.
    Opaque,
}

fn analyze(expr: &Expr) -> ClauseSources {
    if expr.contains_unknown() {
        return ClauseSources::Opaque;
    }

    let mut touched: BTreeSet<&str> = BTreeSet::new();
    let mut namespace_only = false;
    expr.for_each_ref(&mut |path| {
        if let Some(alias) = path.first().filter(|a| !a.is_empty()) {
            touched.insert(alias.as_str());
            if path.len() == 1 {
                namespace_only = true;
            }
        }
    });

    match touched.len() {
        0 => ClauseSources::Constant,
        1 if !namespace_only => touched
            .into_iter()
            .next()
            .map(|alias| ClauseSources::Single(alias.to_string()))
            .unwrap_or(ClauseSources::Constant),
        _ => ClauseSources::Multi,
    }
}

/// Flatten nested `and` calls into their conjuncts.
pub fn split_and(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Func { name, args } if name == "and" => {
            for arg in args {
                split_and(arg, out);
            }
        }
        other => out.push(other.clone()),
    }
}

fn split_where(clauses: &[WhereClause]) -> Vec<Expr> {
    let mut out = Vec::new();
    for clause in clauses {
        split_and(&clause.expr, &mut out);
    }
    out
}

/// Combine expressions into one flat `and`. Returns `None` for no input.
pub fn and_all(exprs: Vec<Expr>) -> Option<Expr> {
    let mut flat = Vec::with_capacity(exprs.len());
    for expr in &exprs {
        split_and(expr, &mut flat);
    }
    match flat.len() {
        0 => None,
        1 => flat.pop(),
        _ => Some(Expr::and(flat)),
    }
}

/// Single-source clauses grouped by alias, in first-seen order, plus the
/// clauses that stay where they are.
#[derive(Default)]
struct GroupedClauses {
    single_source: Vec<(String, Vec<Expr>)>,
    stay: Vec<Expr>,
}

impl GroupedClauses {
    fn from_exprs(exprs: Vec<Expr>) -> Self {
        let mut grouped = Self::default();
        for expr in exprs {
            match analyze(&expr) {
                ClauseSources::Constant => {
                    tracing::trace!(clause = ?expr, "dropping constant clause");
                }
                ClauseSources::Single(alias) => {
                    match grouped.single_source.iter_mut().find(|(a, _)| *a == alias) {
                        Some((_, clauses)) => clauses.push(expr),
                        None => grouped.single_source.push((alias, vec![expr])),
                    }
                }
                ClauseSources::Multi | ClauseSources::Opaque => grouped.stay.push(expr),
            }
        }
        grouped
    }

    fn combined_single_source(&self) -> Vec<(String, Expr)> {
        self.single_source
            .iter()
            .filter_map(|(alias, clauses)| {
                and_all(clauses.clone()).map(|expr| (alias.clone(), expr))
            })
            .collect()
    }
}

/// Aliases that can be padded with an absent row by an outer join.
fn nullable_aliases(query: &QueryIr) -> HashSet<String> {
    let mut nullable = HashSet::new();
    let mut introduced: Vec<&str> = vec![query.from.alias()];
    for join in &query.join {
        let joined = join.from.alias();
        if join.join_type.keeps_unmatched_left() {
            nullable.insert(joined.to_string());
        }
        if join.join_type.keeps_unmatched_right() {
            nullable.extend(introduced.iter().map(|a| a.to_string()));
        }
        introduced.push(joined);
    }
    nullable
}

fn lookup<'a>(clauses: &'a [(String, Expr)], alias: &str) -> Option<&'a Expr> {
    clauses.iter().find(|(a, _)| a == alias).map(|(_, e)| e)
}

/// Whether a clause on `alias` can be evaluated inside `subquery` instead of
/// against its output.
fn is_safe_to_push(subquery: &QueryIr, clause: &Expr, alias: &str) -> bool {
    // References to the outer alias only resolve inside when the subquery
    // reads its main source under the same alias.
    if subquery.from.alias() != alias {
        return false;
    }
    if subquery.select_has_aggregates()
        || !subquery.group_by.is_empty()
        || !subquery.having.is_empty()
        || (!subquery.order_by.is_empty()
            && (subquery.limit.is_some() || subquery.offset.is_some()))
        || subquery.fn_select.is_some()
        || !subquery.fn_where.is_empty()
        || !subquery.fn_having.is_empty()
        || subquery.distinct
    {
        return false;
    }
    clause_fields_preserved(subquery, clause, alias)
}

/// Every field the clause reads from `alias` must reach the subquery output
/// unchanged and under the same name.
fn clause_fields_preserved(subquery: &QueryIr, clause: &Expr, alias: &str) -> bool {
    let Some(select) = &subquery.select else {
        // Without a projection the output row is the source row, unless joins
        // turn it into a namespaced row.
        return subquery.join.is_empty();
    };

    let mut preserved = true;
    clause.for_each_ref(&mut |path| {
        if path.first().map(String::as_str) != Some(alias) {
            return;
        }
        let Some(field) = path.get(1) else {
            preserved = false;
            return;
        };
        let passthrough = select.iter().any(|SelectField { alias: name, expr }| {
            name == field
                && matches!(expr, Expr::Ref { path: inner }
                    if inner.len() == 2 && inner[0] == alias && inner[1] == *field)
        });
        if !passthrough {
            preserved = false;
        }
    });
    preserved
}

/// Relocate the clause for `source`'s alias, if any, and record the alias in
/// `pushed` when it moved.
fn push_into_source(
    source: &Source,
    clauses: &[(String, Expr)],
    pushed: &mut HashSet<String>,
) -> Source {
    let alias = source.alias();
    let Some(clause) = lookup(clauses, alias) else {
        return source.clone();
    };

    match source {
        Source::CollectionRef(collection) => {
            pushed.insert(alias.to_string());
            let subquery = QueryIr::new(Source::CollectionRef(collection.clone()))
                .with_where(clause.clone());
            Source::query(subquery, alias)
        }
        Source::QueryRef(QueryRef { query, .. }) => {
            if !is_safe_to_push(query, clause, alias) {
                tracing::trace!(alias, "subquery not safe for pushdown");
                return source.clone();
            }
            pushed.insert(alias.to_string());
            let mut subquery = (**query).clone();
            subquery.where_clauses.push(WhereClause::new(clause.clone()));
            Source::query(subquery, alias)
        }
    }
}

/// Rewrite the WHERE of one level, pushing what it can into its sources.
fn optimize_single_level(mut query: QueryIr) -> QueryIr {
    if query.where_clauses.is_empty() {
        return query;
    }

    if query.join.is_empty() {
        if query.where_clauses.len() > 1 {
            if let Some(expr) = and_all(split_where(&query.where_clauses)) {
                query.where_clauses = vec![WhereClause::new(expr)];
            }
        }
        return query;
    }

    let (residuals, candidates): (Vec<WhereClause>, Vec<WhereClause>) = query
        .where_clauses
        .drain(..)
        .partition(|clause| clause.residual);

    let grouped = GroupedClauses::from_exprs(split_where(&candidates));
    let single_source = grouped.combined_single_source();
    let nullable = nullable_aliases(&query);

    let mut pushed = HashSet::new();
    query.from = push_into_source(&query.from, &single_source, &mut pushed);
    for join in &mut query.join {
        join.from = push_into_source(&join.from, &single_source, &mut pushed);
    }

    let mut remaining = grouped.stay;
    let mut residual_copies = Vec::new();
    for (alias, clause) in single_source {
        if !pushed.contains(&alias) {
            remaining.push(clause);
        } else if nullable.contains(&alias) {
            residual_copies.push(clause);
        }
    }

    let mut where_clauses = Vec::new();
    if let Some(expr) = and_all(remaining) {
        where_clauses.push(WhereClause::new(expr));
    }
    if let Some(expr) = and_all(residual_copies) {
        where_clauses.push(WhereClause::residual(expr));
    }
    where_clauses.extend(residuals);
    query.where_clauses = where_clauses;

    tracing::trace!(
        alias = query.from.alias(),
        pushed = pushed.len(),
        "optimized query level"
    );
    query
}

fn is_redundant(query: &QueryIr) -> bool {
    query.where_clauses.is_empty()
        && query.select.is_none()
        && query.join.is_empty()
        && query.group_by.is_empty()
        && query.having.is_empty()
        && query.order_by.is_empty()
        && query.limit.is_none()
        && query.offset.is_none()
        && !query.distinct
        && query.fn_select.is_none()
        && query.fn_where.is_empty()
        && query.fn_having.is_empty()
}

fn remove_redundant_source(source: &Source) -> Source {
    let Source::QueryRef(QueryRef { query, alias }) = source else {
        return source.clone();
    };

    let processed = remove_redundant_subqueries(query);
    if is_redundant(&processed) {
        return match remove_redundant_source(&processed.from) {
            Source::CollectionRef(inner) => Source::collection(inner.collection, alias.clone()),
            Source::QueryRef(inner) => Source::query(inner.query, alias.clone()),
        };
    }
    if processed == **query {
        source.clone()
    } else {
        Source::query(processed, alias.clone())
    }
}

/// Collapse subqueries that only forward their source.
pub fn remove_redundant_subqueries(query: &QueryIr) -> QueryIr {
    let mut cleaned = query.clone();
    cleaned.from = remove_redundant_source(&query.from);
    for join in &mut cleaned.join {
        join.from = remove_redundant_source(&join.from);
    }
    cleaned
}

/// Root-level single-source filters on direct collection references.
pub fn extract_source_where_clauses(query: &QueryIr) -> HashMap<String, Expr> {
    if query.where_clauses.is_empty() {
        return HashMap::new();
    }

    let grouped = GroupedClauses::from_exprs(split_where(&query.where_clauses));
    grouped
        .combined_single_source()
        .into_iter()
        .filter(|(alias, _)| {
            query
                .sources()
                .find(|source| source.alias() == alias)
                .is_some_and(Source::is_collection)
        })
        .collect()
}

/// Query optimizer.
#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    /// Create an optimizer with the given configuration.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Optimize a query.
    pub fn optimize(&self, query: &QueryIr) -> OptimizationResult {
        let source_where_clauses = extract_source_where_clauses(query);
        if !self.config.enabled {
            return OptimizationResult {
                optimized_query: query.clone(),
                source_where_clauses,
            };
        }

        let mut optimized = query.clone();
        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.config.max_iterations {
            let next = self.optimize_level(&optimized, 0);
            iterations += 1;
            if next == optimized {
                converged = true;
                break;
            }
            optimized = next;
        }

        let optimized_query = remove_redundant_subqueries(&optimized);
        tracing::debug!(
            iterations,
            converged,
            source_filters = source_where_clauses.len(),
            "query optimized"
        );

        OptimizationResult {
            optimized_query,
            source_where_clauses,
        }
    }

    fn optimize_level(&self, query: &QueryIr, depth: usize) -> QueryIr {
        let mut level = query.clone();
        if depth < self.config.max_depth {
            level.from = self.optimize_nested(&query.from, depth);
            for join in &mut level.join {
                join.from = self.optimize_nested(&join.from, depth);
            }
        }
        optimize_single_level(level)
    }

    fn optimize_nested(&self, source: &Source, depth: usize) -> Source {
        let Source::QueryRef(QueryRef { query, alias }) = source else {
            return source.clone();
        };
        let optimized = self.optimize_level(query, depth + 1);
        if optimized == **query {
            source.clone()
        } else {
            Source::query(optimized, alias.clone())
        }
    }
}

/// Optimize a query with the default configuration.
pub fn optimize_query(query: &QueryIr) -> OptimizationResult {
    Optimizer::default().optimize(query)
}
