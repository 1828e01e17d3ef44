//! Deduplication on an extracted value.

use std::collections::HashMap;

use ivmdb_proto::Value;

use super::graph::Operator;
use super::{Entry, RowKey};
use crate::error::Result;
use crate::multiset::MultiSet;

/// Emits each distinct extracted value once, keyed by the value itself.
///
/// A value appears when its total multiplicity becomes positive and is
/// retracted when it drops back to zero.
pub struct DistinctOperator {
    extract: Box<dyn Fn(&Entry) -> Value + Send>,
    counts: HashMap<Value, i64>,
}

impl DistinctOperator {
    /// Create a distinct operator over an extracted value.
    pub fn new(extract: impl Fn(&Entry) -> Value + Send + 'static) -> Self {
        Self {
            extract: Box::new(extract),
            counts: HashMap::new(),
        }
    }
}

impl Operator for DistinctOperator {
    fn name(&self) -> &'static str {
        "distinct"
    }

    fn arity(&self) -> usize {
        1
    }

    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>> {
        let deltas: MultiSet<Value> = inputs
            .into_iter()
            .flatten()
            .map(|(entry, m)| ((self.extract)(&entry), m))
            .collect::<MultiSet<_>>()
            .consolidate();

        let mut output = MultiSet::new();
        for (value, m) in deltas {
            let before = self.counts.get(&value).copied().unwrap_or(0);
            let after = before + m;
            if after == 0 {
                self.counts.remove(&value);
            } else {
                self.counts.insert(value.clone(), after);
            }

            let entry = || Entry::new(RowKey::Value(value.clone()), value.clone());
            if before <= 0 && after > 0 {
                output.push(entry(), 1);
            } else if before > 0 && after <= 0 {
                output.push(entry(), -1);
            }
        }
        Ok(output)
    }
}
