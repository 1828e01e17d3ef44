//! Grouped aggregation.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use ivmdb_proto::Value;

use super::graph::Operator;
use super::{Entry, RowKey};
use crate::error::Result;
use crate::multiset::MultiSet;

/// Field of a reduce output row holding the group key.
pub const GROUP_KEY_FIELD: &str = "__key";

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    /// Number of non-null values.
    Count,
    /// Sum of numeric values.
    Sum,
    /// Mean of numeric values.
    Avg,
    /// Smallest non-null value.
    Min,
    /// Largest non-null value.
    Max,
}

impl AggregateKind {
    /// Parse an aggregate name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateKind::Count),
            "sum" => Some(AggregateKind::Sum),
            "avg" => Some(AggregateKind::Avg),
            "min" => Some(AggregateKind::Min),
            "max" => Some(AggregateKind::Max),
            _ => None,
        }
    }
}

/// One aggregate column of a reduce.
pub struct Aggregate {
    /// Output field name.
    pub alias: String,
    /// Aggregate function.
    pub kind: AggregateKind,
    /// Extracts the aggregated value from a row.
    pub arg: Box<dyn Fn(&Value) -> Value + Send>,
}

impl Aggregate {
    /// Create an aggregate column.
    pub fn new(
        alias: impl Into<String>,
        kind: AggregateKind,
        arg: impl Fn(&Value) -> Value + Send + 'static,
    ) -> Self {
        Self {
            alias: alias.into(),
            kind,
            arg: Box::new(arg),
        }
    }

    fn compute(&self, members: &HashMap<Entry, i64>) -> Value {
        let values = members
            .iter()
            .map(|(entry, m)| ((self.arg)(&entry.value), *m))
            .filter(|(v, _)| !v.is_null());

        match self.kind {
            AggregateKind::Count => Value::Int(values.map(|(_, m)| m).sum()),
            AggregateKind::Sum => sum(values).0,
            AggregateKind::Avg => {
                let (total, count) = sum(values);
                match total.as_f64() {
                    Some(t) if count > 0 => Value::Float(t / count as f64),
                    _ => Value::Null,
                }
            }
            AggregateKind::Min => values
                .map(|(v, _)| v)
                .min_by(compare_for_extremes)
                .unwrap_or(Value::Null),
            AggregateKind::Max => values
                .map(|(v, _)| v)
                .max_by(compare_for_extremes)
                .unwrap_or(Value::Null),
        }
    }
}

/// Integer totals fall back to the float total on overflow.
fn sum(values: impl Iterator<Item = (Value, i64)>) -> (Value, i64) {
    let mut int_total = Some(0i64);
    let mut float_total: f64 = 0.0;
    let mut all_int = true;
    let mut count = 0i64;

    for (value, m) in values {
        match value {
            Value::Int(i) => {
                int_total = int_total
                    .and_then(|total| i.checked_mul(m).and_then(|x| total.checked_add(x)));
                float_total += i as f64 * m as f64;
            }
            other => {
                all_int = false;
                float_total += other.as_f64().unwrap_or(0.0) * m as f64;
            }
        }
        count += m;
    }

    let total = match int_total {
        Some(t) if all_int => Value::Int(t),
        _ => Value::Float(float_total),
    };
    (total, count)
}

fn compare_for_extremes(a: &Value, b: &Value) -> Ordering {
    a.numeric_cmp(b).unwrap_or_else(|| a.cmp(b))
}

/// Maintains aggregates per group.
///
/// Each group keeps the multiset of its member rows; touched groups are
/// recomputed and only changed group rows are emitted (retraction of the
/// previous row plus the new one). Output rows are objects holding the group
/// key under [`GROUP_KEY_FIELD`] and one field per aggregate.
pub struct ReduceOperator {
    group_key: Box<dyn Fn(&Entry) -> Value + Send>,
    aggregates: Vec<Aggregate>,
    groups: HashMap<Value, HashMap<Entry, i64>>,
    emitted: HashMap<Value, Entry>,
}

impl ReduceOperator {
    /// Create a reduce with a group-key extractor and aggregate columns.
    pub fn new(
        group_key: impl Fn(&Entry) -> Value + Send + 'static,
        aggregates: Vec<Aggregate>,
    ) -> Self {
        Self {
            group_key: Box::new(group_key),
            aggregates,
            groups: HashMap::new(),
            emitted: HashMap::new(),
        }
    }

    fn group_row(&self, key: &Value) -> Option<Entry> {
        let members = self.groups.get(key)?;
        if members.values().sum::<i64>() <= 0 {
            return None;
        }

        let mut row = BTreeMap::new();
        row.insert(GROUP_KEY_FIELD.to_string(), key.clone());
        for aggregate in &self.aggregates {
            row.insert(aggregate.alias.clone(), aggregate.compute(members));
        }
        Some(Entry::new(RowKey::Value(key.clone()), Value::Object(row)))
    }
}

impl Operator for ReduceOperator {
    fn name(&self) -> &'static str {
        "reduce"
    }

    fn arity(&self) -> usize {
        1
    }

    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>> {
        let mut touched: Vec<Value> = Vec::new();
        let mut seen: HashSet<Value> = HashSet::new();
        for input in inputs {
            for (entry, m) in input {
                let key = (self.group_key)(&entry);
                let members = self.groups.entry(key.clone()).or_default();
                let count = members.entry(entry.clone()).or_insert(0);
                *count += m;
                if *count == 0 {
                    members.remove(&entry);
                }
                if seen.insert(key.clone()) {
                    touched.push(key);
                }
            }
        }

        let mut output = MultiSet::new();
        for key in touched {
            if self.groups.get(&key).is_some_and(HashMap::is_empty) {
                self.groups.remove(&key);
            }
            let new_row = self.group_row(&key);
            let old_row = self.emitted.get(&key);
            if old_row == new_row.as_ref() {
                continue;
            }
            if let Some(old) = self.emitted.remove(&key) {
                output.push(old, -1);
            }
            if let Some(row) = new_row {
                output.push(row.clone(), 1);
                self.emitted.insert(key, row);
            }
        }
        Ok(output)
    }
}
