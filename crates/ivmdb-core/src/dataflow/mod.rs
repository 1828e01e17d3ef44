//! Dataflow graph and the stateless operators.
//!
//! A [`Graph`] is an arena of boxed [`Operator`]s wired at build time and run
//! repeatedly afterwards. Every edge carries a [`MultiSet`] of [`Entry`]
//! values: a keyed row plus, once it has passed a top-K operator, its
//! fractional sort key.
//!
//! [`MultiSet`]: crate::multiset::MultiSet

mod distinct;
mod graph;
mod operators;
mod reduce;

use std::fmt;

use ivmdb_proto::Value;

pub use distinct::DistinctOperator;
pub use graph::{Graph, NodeId, Operator};
pub use operators::{
    ConsolidateOperator, FilterOperator, InputOperator, MapOperator, OutputHandle, OutputOperator,
};
pub use reduce::{Aggregate, AggregateKind, ReduceOperator, GROUP_KEY_FIELD};

/// Identity of a row flowing through the graph.
///
/// Base rows are identified by their collection key. Join results carry the
/// ordered pair of their inputs' keys, with `None` marking the padded side of
/// an unmatched outer-join row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    /// A plain key.
    Value(Value),
    /// Composite key of a join result.
    Joined {
        /// Key of the main-side row, absent when padded.
        left: Option<Box<RowKey>>,
        /// Key of the joined-side row, absent when padded.
        right: Option<Box<RowKey>>,
    },
}

impl RowKey {
    /// Composite key from the two sides of a join.
    pub fn joined(left: Option<RowKey>, right: Option<RowKey>) -> Self {
        RowKey::Joined {
            left: left.map(Box::new),
            right: right.map(Box::new),
        }
    }

    /// Render the key as a value: plain keys as themselves, composite keys
    /// as a two-element array with null for an absent side.
    pub fn to_value(&self) -> Value {
        match self {
            RowKey::Value(v) => v.clone(),
            RowKey::Joined { left, right } => Value::Array(vec![
                left.as_ref().map(|k| k.to_value()).unwrap_or(Value::Null),
                right.as_ref().map(|k| k.to_value()).unwrap_or(Value::Null),
            ]),
        }
    }
}

impl From<Value> for RowKey {
    fn from(v: Value) -> Self {
        RowKey::Value(v)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Value(v) => write!(f, "{v}"),
            RowKey::Joined { left, right } => {
                f.write_str("[")?;
                match left {
                    Some(k) => write!(f, "{k}")?,
                    None => f.write_str("undefined")?,
                }
                f.write_str(",")?;
                match right {
                    Some(k) => write!(f, "{k}")?,
                    None => f.write_str("undefined")?,
                }
                f.write_str("]")
            }
        }
    }
}

/// A keyed row on a graph edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Row identity.
    pub key: RowKey,
    /// Row payload.
    pub value: Value,
    /// Fractional sort key, set by the top-K operator.
    pub order: Option<String>,
}

impl Entry {
    /// Create an unordered entry.
    pub fn new(key: impl Into<RowKey>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            order: None,
        }
    }

    /// Attach a fractional sort key.
    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_key_display() {
        let key = RowKey::joined(Some(RowKey::from(Value::Int(1))), None);
        assert_eq!(key.to_string(), "[1,undefined]");
        assert_eq!(key.to_value(), Value::Array(vec![Value::Int(1), Value::Null]));
    }

    #[test]
    fn test_chained_key_display() {
        let inner = RowKey::joined(
            Some(RowKey::from(Value::from("a"))),
            Some(RowKey::from(Value::from("b"))),
        );
        let key = RowKey::joined(Some(inner), Some(RowKey::from(Value::Int(3))));
        assert_eq!(key.to_string(), "[[a,b],3]");
    }
}
