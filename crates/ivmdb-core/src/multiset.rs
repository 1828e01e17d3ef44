//! Delta multisets.
//!
//! A [`MultiSet`] is a bag of `(item, multiplicity)` pairs. Positive
//! multiplicities add occurrences, negative ones remove them. Every edge of
//! the dataflow graph carries multisets; the engine never exchanges full
//! snapshots.

use std::collections::HashMap;
use std::hash::Hash;

/// A bag of items with signed multiplicities.
///
/// Entries are kept in arrival order and may repeat until
/// [`consolidate`](MultiSet::consolidate) merges them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiSet<T> {
    inner: Vec<(T, i64)>,
}

impl<T> Default for MultiSet<T> {
    fn default() -> Self {
        Self { inner: Vec::new() }
    }
}

impl<T> MultiSet<T> {
    /// Create an empty multiset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing `(item, multiplicity)` pairs.
    pub fn from_vec(inner: Vec<(T, i64)>) -> Self {
        Self { inner }
    }

    /// Add an item with a multiplicity.
    pub fn push(&mut self, item: T, multiplicity: i64) {
        self.inner.push((item, multiplicity));
    }

    /// Number of stored entries (not the total multiplicity).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over entries.
    pub fn iter(&self) -> std::slice::Iter<'_, (T, i64)> {
        self.inner.iter()
    }

    /// Unwrap into the entry vector.
    pub fn into_inner(self) -> Vec<(T, i64)> {
        self.inner
    }

    /// Union: append another multiset's entries.
    pub fn extend(&mut self, other: MultiSet<T>) {
        self.inner.extend(other.inner);
    }

    /// Union of two multisets.
    pub fn concat(mut self, other: MultiSet<T>) -> Self {
        self.extend(other);
        self
    }

    /// Flip the sign of every multiplicity.
    pub fn negate(self) -> Self {
        Self {
            inner: self.inner.into_iter().map(|(t, m)| (t, -m)).collect(),
        }
    }

    /// Apply a function to every item.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> MultiSet<U> {
        MultiSet {
            inner: self.inner.into_iter().map(|(t, m)| (f(t), m)).collect(),
        }
    }

    /// Keep items satisfying a predicate.
    pub fn filter(self, mut f: impl FnMut(&T) -> bool) -> Self {
        Self {
            inner: self.inner.into_iter().filter(|(t, _)| f(t)).collect(),
        }
    }
}

impl<T: Hash + Eq> MultiSet<T> {
    /// Merge equal items and drop those whose multiplicities cancel.
    ///
    /// Items keep the position of their first occurrence.
    pub fn consolidate(self) -> Self {
        let mut positions: HashMap<&T, usize> = HashMap::new();
        let mut totals: Vec<i64> = Vec::new();
        let mut firsts: Vec<usize> = Vec::new();

        for (i, (item, m)) in self.inner.iter().enumerate() {
            match positions.get(item) {
                Some(&slot) => totals[slot] += m,
                None => {
                    positions.insert(item, totals.len());
                    totals.push(*m);
                    firsts.push(i);
                }
            }
        }
        drop(positions);

        let mut keep = vec![None; self.inner.len()];
        for (slot, &first) in firsts.iter().enumerate() {
            if totals[slot] != 0 {
                keep[first] = Some(totals[slot]);
            }
        }

        Self {
            inner: self
                .inner
                .into_iter()
                .zip(keep)
                .filter_map(|((item, _), total)| total.map(|m| (item, m)))
                .collect(),
        }
    }
}

impl<T> FromIterator<(T, i64)> for MultiSet<T> {
    fn from_iter<I: IntoIterator<Item = (T, i64)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for MultiSet<T> {
    type Item = (T, i64);
    type IntoIter = std::vec::IntoIter<(T, i64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a MultiSet<T> {
    type Item = &'a (T, i64);
    type IntoIter = std::slice::Iter<'a, (T, i64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
