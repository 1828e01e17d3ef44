//! ivmdb protocol types.
//!
//! This crate defines the data shared between the view-maintenance engine
//! and the code that feeds it: dynamic values, the query IR, and the change
//! records a storage layer emits.
//!
//! # Modules
//!
//! - [`value`] - Dynamic row values with a total order
//! - [`query`] - Query IR types (sources, joins, filters, ordering)
//! - [`change`] - Base-row mutation records
//! - [`error`] - Protocol error types
//!
//! # Serialization
//!
//! Every type derives `serde::Serialize` and `serde::Deserialize`; the query
//! IR round-trips through JSON apart from opaque row functions.
//!
//! ```ignore
//! use ivmdb_proto::{Expr, QueryIr};
//!
//! let query = QueryIr::from_collection("users", "u")
//!     .with_where(Expr::eq(Expr::col("u", "active"), Expr::val(true)));
//! let json = query.to_json()?;
//! assert_eq!(QueryIr::from_json(&json)?, query);
//! ```

pub mod change;
pub mod error;
pub mod query;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use change::{ChangeMessage, ChangeType};
pub use query::{
    CollectionRef, CompareOptions, Direction, Expr, JoinClause, JoinType, NullsOrder,
    OrderByClause, QueryIr, QueryRef, RowFn, SelectField, Source, StringSort, WhereClause,
};
pub use value::Value;
