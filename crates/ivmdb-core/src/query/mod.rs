//! Query optimization and compilation.
//!
//! A [`QueryIr`](ivmdb_proto::QueryIr) goes through the [`Optimizer`] and is
//! then compiled into a dataflow graph by [`compile_query`]. Expressions are
//! compiled once into closures by the [`evaluator`].

pub mod comparator;
pub mod evaluator;
mod compiler;
mod group_by;
mod joins;
mod optimizer;

pub use comparator::{compare_tuples, compare_values};
pub use compiler::{compile_query, CompiledQuery};
pub use evaluator::{compile_expression, compile_predicate, CompiledExpr};
pub use group_by::{replace_with_selected_refs, SINGLE_GROUP_KEY};
pub use joins::{analyze_join_expressions, expression_alias};
pub use optimizer::{
    and_all, extract_source_where_clauses, optimize_query, remove_redundant_subqueries,
    split_and, OptimizationResult, Optimizer,
};

/// Field under which a row carries its projection between the SELECT stage
/// and the output.
pub const SELECTED_FIELD: &str = "$selected";
