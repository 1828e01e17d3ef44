//! ivmdb core - incremental view maintenance.
//!
//! This crate keeps query results up to date as base rows change, without
//! recomputing them. A query IR is optimized (predicate pushdown), compiled
//! into a dataflow graph of multiset-delta operators, and driven by
//! transactions of base-row changes.
//!
//! # Modules
//!
//! - [`multiset`] - Signed-multiplicity deltas
//! - [`dataflow`] - Operator graph and the stateless operators
//! - [`join`] - Incremental inner/left/right/full join
//! - [`topk`] - Sorted windows with fractional indexes
//! - [`fractional`] - Fractional index generation
//! - [`query`] - Optimizer, expression evaluator and graph compiler
//! - [`live`] - Live queries with transactions and subscriptions

pub mod config;
pub mod dataflow;
pub mod error;
pub mod fractional;
pub mod join;
pub mod live;
pub mod multiset;
pub mod query;
pub mod topk;

pub use config::{EngineConfig, OptimizerConfig};
pub use dataflow::{Entry, Graph, NodeId, Operator, OutputHandle, RowKey};
pub use error::{Error, Result};
pub use fractional::{generate_key_between, generate_n_keys_between};
pub use join::{JoinKey, JoinOperator};
pub use live::{ChangeBatch, LiveQuery, ResultRow, SubscriptionHub};
pub use multiset::MultiSet;
pub use query::{compile_query, optimize_query, CompiledQuery, OptimizationResult, Optimizer};
pub use topk::{TopKOperator, Window, WindowHandle, WindowUpdate};

/// Re-export protocol types.
pub use ivmdb_proto as proto;
