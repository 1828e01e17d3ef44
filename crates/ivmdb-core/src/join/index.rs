//! Per-side join index.

use std::collections::HashMap;

use ivmdb_proto::Value;

use crate::dataflow::Entry;

/// Extracted join key.
///
/// `Absent` stands for a missing or null key. It is distinct from every real
/// value and never matches anything, including another absent key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinKey {
    /// No key value.
    Absent,
    /// A real key value.
    Value(Value),
}

impl JoinKey {
    /// Map null to `Absent`.
    pub fn from_value(value: Value) -> Self {
        if value.is_null() {
            JoinKey::Absent
        } else {
            JoinKey::Value(value)
        }
    }

    /// Whether this key can match rows on the other side.
    pub fn is_matchable(&self) -> bool {
        matches!(self, JoinKey::Value(_))
    }
}

/// Multiset of entries grouped by join key.
///
/// Tracks, per key, the entries with their multiplicities and the key's
/// total multiplicity ("mass"), which is what decides whether a key is
/// currently matched.
#[derive(Debug, Default, Clone)]
pub struct Index {
    rows: HashMap<JoinKey, HashMap<Entry, i64>>,
    mass: HashMap<JoinKey, i64>,
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from keyed entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (JoinKey, Entry, i64)>) -> Self {
        let mut index = Self::new();
        for (key, entry, m) in entries {
            index.add(key, entry, m);
        }
        index
    }

    /// Add an entry occurrence under a key.
    pub fn add(&mut self, key: JoinKey, entry: Entry, multiplicity: i64) {
        if multiplicity == 0 {
            return;
        }

        let rows = self.rows.entry(key.clone()).or_default();
        let count = rows.entry(entry.clone()).or_insert(0);
        *count += multiplicity;
        if *count == 0 {
            rows.remove(&entry);
        }
        if rows.is_empty() {
            self.rows.remove(&key);
        }

        let mass = self.mass.entry(key.clone()).or_insert(0);
        *mass += multiplicity;
        if *mass == 0 {
            self.mass.remove(&key);
        }
    }

    /// Merge another index into this one.
    pub fn append(&mut self, other: Index) {
        for (key, rows) in other.rows {
            for (entry, m) in rows {
                self.add(key.clone(), entry, m);
            }
        }
    }

    /// Total multiplicity stored under a key.
    pub fn mass(&self, key: &JoinKey) -> i64 {
        self.mass.get(key).copied().unwrap_or(0)
    }

    /// Entries stored under a key.
    pub fn get(&self, key: &JoinKey) -> impl Iterator<Item = (&Entry, i64)> {
        self.rows
            .get(key)
            .into_iter()
            .flat_map(|rows| rows.iter().map(|(e, m)| (e, *m)))
    }

    /// Keys with at least one stored entry.
    pub fn keys(&self) -> impl Iterator<Item = &JoinKey> {
        self.rows.keys()
    }

    /// Iterate over `(key, entry, multiplicity)`.
    pub fn iter(&self) -> impl Iterator<Item = (&JoinKey, &Entry, i64)> {
        self.rows
            .iter()
            .flat_map(|(k, rows)| rows.iter().map(move |(e, m)| (k, e, *m)))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the index holds nothing.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Inner join with another index: every pair of entries sharing a
    /// matchable key, with multiplicities multiplied.
    pub fn join(&self, other: &Index) -> Vec<(Entry, Entry, i64)> {
        let mut out = Vec::new();
        let (probe, build, swapped) = if self.len() <= other.len() {
            (self, other, false)
        } else {
            (other, self, true)
        };

        for (key, probe_rows) in &probe.rows {
            if !key.is_matchable() {
                continue;
            }
            let Some(build_rows) = build.rows.get(key) else {
                continue;
            };
            for (p, pm) in probe_rows {
                for (b, bm) in build_rows {
                    let (left, right) = if swapped { (b, p) } else { (p, b) };
                    out.push((left.clone(), right.clone(), pm * bm));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::RowKey;

    fn entry(id: i64) -> Entry {
        Entry::new(RowKey::from(Value::Int(id)), Value::Int(id))
    }

    fn key(v: i64) -> JoinKey {
        JoinKey::Value(Value::Int(v))
    }

    #[test]
    fn test_mass_tracks_multiplicity() {
        let mut index = Index::new();
        index.add(key(1), entry(10), 1);
        index.add(key(1), entry(11), 1);
        assert_eq!(index.mass(&key(1)), 2);

        index.add(key(1), entry(10), -1);
        assert_eq!(index.mass(&key(1)), 1);
        index.add(key(1), entry(11), -1);
        assert_eq!(index.mass(&key(1)), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_join_matches_keys_in_order() {
        let left = Index::from_entries(vec![(key(1), entry(10), 1), (key(2), entry(20), 1)]);
        let right = Index::from_entries(vec![
            (key(1), entry(100), 1),
            (key(1), entry(101), 1),
            (key(3), entry(300), 1),
        ]);

        let mut pairs: Vec<_> = left
            .join(&right)
            .into_iter()
            .map(|(l, r, m)| (l.value, r.value, m))
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                (Value::Int(10), Value::Int(100), 1),
                (Value::Int(10), Value::Int(101), 1),
            ]
        );

        // Swapping sides keeps left entries on the left.
        let reversed = right.join(&left);
        assert!(reversed.iter().all(|(l, _, _)| l.value.as_i64() >= Some(100)));
    }

    #[test]
    fn test_absent_keys_never_match() {
        let left = Index::from_entries(vec![(JoinKey::Absent, entry(1), 1)]);
        let right = Index::from_entries(vec![(JoinKey::Absent, entry(2), 1)]);
        assert!(left.join(&right).is_empty());
        assert_eq!(JoinKey::from_value(Value::Null), JoinKey::Absent);
    }
}
