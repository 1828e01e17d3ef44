//! Incremental relational join.
//!
//! The [`JoinOperator`] keeps one [`Index`] per side and turns a batch of
//! left and right deltas into the delta of the joined result:
//!
//! 1. Matched pairs: `ΔL ⋈ R + L ⋈ ΔR + ΔL ⋈ ΔR`, against the indexes as
//!    they were before the batch.
//! 2. Unmatched padding (outer joins): a delta row on the preserved side is
//!    padded when its key has no partner once the batch is applied; an
//!    existing row is padded or un-padded when its key's partner mass flips
//!    between zero and non-zero during the batch.
//! 3. The batch is appended to the indexes.
//!
//! Because both sides of a batch are processed together, several changes
//! committed in one transaction produce one consistent delta without
//! transient placeholder rows.

mod index;

use std::collections::BTreeMap;

use ivmdb_proto::{JoinType, Value};

pub use index::{Index, JoinKey};

use crate::dataflow::{Entry, Operator, RowKey};
use crate::error::Result;
use crate::multiset::MultiSet;

/// Key extractor for one side of a join.
pub type KeyExtractor = Box<dyn Fn(&Entry) -> JoinKey + Send>;

/// Combine the two sides of a join result.
///
/// Object rows are merged field by field (the namespaced rows of the two
/// sides never share an alias); any other shape becomes a two-element array
/// with null for an absent side.
pub fn merge_rows(left: Option<&Entry>, right: Option<&Entry>) -> Entry {
    let key = RowKey::joined(left.map(|e| e.key.clone()), right.map(|e| e.key.clone()));
    let left_value = left.map(|e| &e.value);
    let right_value = right.map(|e| &e.value);

    let value = match (left_value, right_value) {
        (Some(Value::Object(_)) | None, Some(Value::Object(_)) | None) => {
            let mut merged = BTreeMap::new();
            for side in [left_value, right_value].into_iter().flatten() {
                if let Value::Object(fields) = side {
                    merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Value::Object(merged)
        }
        _ => Value::Array(vec![
            left_value.cloned().unwrap_or(Value::Null),
            right_value.cloned().unwrap_or(Value::Null),
        ]),
    };

    Entry::new(key, value)
}

/// Two-input join operator.
///
/// Port 0 receives the main (left) side, port 1 the joined (right) side.
pub struct JoinOperator {
    join_type: JoinType,
    left_key: KeyExtractor,
    right_key: KeyExtractor,
    left: Index,
    right: Index,
}

impl JoinOperator {
    /// Create a join with the given key extractors.
    pub fn new(
        join_type: JoinType,
        left_key: impl Fn(&Entry) -> JoinKey + Send + 'static,
        right_key: impl Fn(&Entry) -> JoinKey + Send + 'static,
    ) -> Self {
        Self {
            join_type,
            left_key: Box::new(left_key),
            right_key: Box::new(right_key),
            left: Index::new(),
            right: Index::new(),
        }
    }

    /// Join type.
    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    /// Compute the output delta for one batch and fold the batch into the
    /// indexes.
    pub fn process(
        &mut self,
        left_delta: MultiSet<Entry>,
        right_delta: MultiSet<Entry>,
    ) -> MultiSet<Entry> {
        let delta_left = Index::from_entries(
            left_delta
                .into_iter()
                .map(|(e, m)| ((self.left_key)(&e), e, m)),
        );
        let delta_right = Index::from_entries(
            right_delta
                .into_iter()
                .map(|(e, m)| ((self.right_key)(&e), e, m)),
        );

        let mut output = MultiSet::new();

        for (l, r, m) in delta_left
            .join(&self.right)
            .into_iter()
            .chain(self.left.join(&delta_right))
            .chain(delta_left.join(&delta_right))
        {
            output.push(merge_rows(Some(&l), Some(&r)), m);
        }

        if self.join_type.keeps_unmatched_left() {
            pad_unmatched(
                &delta_left,
                &self.left,
                &self.right,
                &delta_right,
                Side::Left,
                &mut output,
            );
        }
        if self.join_type.keeps_unmatched_right() {
            pad_unmatched(
                &delta_right,
                &self.right,
                &self.left,
                &delta_left,
                Side::Right,
                &mut output,
            );
        }

        self.left.append(delta_left);
        self.right.append(delta_right);

        output.consolidate()
    }
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

fn padded(side: Side, entry: &Entry) -> Entry {
    match side {
        Side::Left => merge_rows(Some(entry), None),
        Side::Right => merge_rows(None, Some(entry)),
    }
}

/// Emit padding changes for the preserved side of an outer join.
///
/// `delta` and `state` belong to the preserved side; `partner` and
/// `partner_delta` to the other side.
fn pad_unmatched(
    delta: &Index,
    state: &Index,
    partner: &Index,
    partner_delta: &Index,
    side: Side,
    output: &mut MultiSet<Entry>,
) {
    // New or removed rows whose key has no partner after the batch.
    for (key, entry, m) in delta.iter() {
        let unmatched =
            !key.is_matchable() || partner.mass(key) + partner_delta.mass(key) == 0;
        if unmatched {
            output.push(padded(side, entry), m);
        }
    }

    // Existing rows whose key gains its first partner or loses its last.
    for key in partner_delta.keys() {
        if !key.is_matchable() {
            continue;
        }
        let before = partner.mass(key);
        let after = before + partner_delta.mass(key);
        if (before == 0) == (after == 0) {
            continue;
        }
        let becomes_matched = before == 0;
        for (entry, m) in state.get(key) {
            output.push(padded(side, entry), if becomes_matched { -m } else { m });
        }
    }
}

impl Operator for JoinOperator {
    fn name(&self) -> &'static str {
        "join"
    }

    fn arity(&self) -> usize {
        2
    }

    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>> {
        let mut inputs = inputs.into_iter();
        let left = inputs.next().unwrap_or_default();
        let right = inputs.next().unwrap_or_default();
        if left.is_empty() && right.is_empty() {
            return Ok(MultiSet::new());
        }
        let output = self.process(left, right);
        tracing::trace!(
            join_type = %self.join_type,
            emitted = output.len(),
            left_keys = self.left.len(),
            right_keys = self.right.len(),
            "join step"
        );
        Ok(output)
    }
}
