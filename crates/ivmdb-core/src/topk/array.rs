//! Sorted candidate array with a visible window.

use std::cmp::Ordering;
use std::sync::Arc;

use ivmdb_proto::Value;

use crate::dataflow::Entry;
use crate::error::Result;
use crate::fractional::generate_key_between;

/// Row comparator supplied by the query.
pub type ValueComparator = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

/// The visible range `[offset, offset + limit)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Rank of the first visible element.
    pub offset: i64,
    /// Number of visible elements; `None` means unbounded.
    pub limit: Option<i64>,
}

impl Default for Window {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Window {
    /// Create a window.
    pub fn new(offset: i64, limit: Option<i64>) -> Self {
        Self { offset, limit }
    }

    /// Everything visible.
    pub fn unbounded() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }

    /// Half-open index range, unclipped. Negative offsets or limits give an
    /// empty range.
    pub fn bounds(&self) -> (usize, usize) {
        if self.offset < 0 || self.limit.is_some_and(|l| l < 0) {
            return (0, 0);
        }
        let start = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let end = match self.limit {
            Some(limit) => start.saturating_add(usize::try_from(limit).unwrap_or(usize::MAX)),
            None => usize::MAX,
        };
        (start, end)
    }
}

/// An element of the sorted array with its fractional index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// The row.
    pub entry: Entry,
    /// Fractional index assigned when the row entered the array.
    pub index: String,
}

impl Element {
    /// The row tagged with its fractional index.
    pub fn to_entry(&self) -> Entry {
        self.entry.clone().with_order(self.index.clone())
    }
}

/// Visibility changes caused by one insert or delete.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowChange {
    /// Element that became visible.
    pub move_in: Option<Element>,
    /// Element that stopped being visible.
    pub move_out: Option<Element>,
}

/// Visibility changes caused by moving the window.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowMove {
    /// Elements that became visible.
    pub move_ins: Vec<Element>,
    /// Elements that stopped being visible.
    pub move_outs: Vec<Element>,
}

/// Every candidate row in comparator order, each with a fractional index.
///
/// Rows that compare equal under the query comparator are ordered by key and
/// then by value, so the order is total and every row has one position.
/// Indexes are assigned on insertion from the current neighbors and never
/// rewritten afterwards.
pub struct TopKArray {
    elements: Vec<Element>,
    window: Window,
    comparator: ValueComparator,
}

impl TopKArray {
    /// Create an empty array.
    pub fn new(window: Window, comparator: ValueComparator) -> Self {
        Self {
            elements: Vec::new(),
            window,
            comparator,
        }
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if there are no candidates.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Current window.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Total order over rows.
    pub fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        (self.comparator)(&a.value, &b.value)
            .then_with(|| a.key.cmp(&b.key))
            .then_with(|| a.value.cmp(&b.value))
    }

    fn clipped(&self) -> (usize, usize) {
        let (start, end) = self.window.bounds();
        let len = self.elements.len();
        (start.min(len), end.min(len))
    }

    /// Currently visible elements, in order.
    pub fn visible(&self) -> &[Element] {
        let (start, end) = self.clipped();
        &self.elements[start..end]
    }

    /// Insert a row and report what entered and left the window.
    pub fn insert(&mut self, entry: Entry) -> Result<WindowChange> {
        let position = match self
            .elements
            .binary_search_by(|e| self.compare(&e.entry, &entry))
        {
            Ok(_) => return Ok(WindowChange::default()),
            Err(position) => position,
        };

        let before = position
            .checked_sub(1)
            .map(|i| self.elements[i].index.as_str());
        let after = self.elements.get(position).map(|e| e.index.as_str());
        let index = generate_key_between(before, after)?;
        self.elements.insert(position, Element { entry, index });

        let (start, end) = self.window.bounds();
        let mut change = WindowChange::default();
        if position < end {
            let entering = position.max(start);
            change.move_in = self.elements.get(entering).cloned();
            change.move_out = self.elements.get(end).cloned();
        }
        Ok(change)
    }

    /// Remove a row and report what entered and left the window.
    pub fn delete(&mut self, entry: &Entry) -> WindowChange {
        let position = match self
            .elements
            .binary_search_by(|e| self.compare(&e.entry, entry))
        {
            Ok(position) => position,
            Err(_) => return WindowChange::default(),
        };
        let removed = self.elements.remove(position);

        let (start, end) = self.window.bounds();
        let mut change = WindowChange::default();
        if position < end {
            change.move_out = if position >= start {
                Some(removed)
            } else {
                // Everything shifted left: the old first visible row leaves.
                start
                    .checked_sub(1)
                    .and_then(|i| self.elements.get(i))
                    .cloned()
            };
            change.move_in = end
                .checked_sub(1)
                .and_then(|i| self.elements.get(i))
                .cloned();
        }
        change
    }

    /// Move the window and report the elements whose visibility changed.
    pub fn set_window(&mut self, window: Window) -> WindowMove {
        let (old_start, old_end) = self.clipped();
        self.window = window;
        let (new_start, new_end) = self.clipped();

        let mut moves = WindowMove::default();
        let low = old_start.min(new_start);
        let high = old_end.max(new_end);
        for (i, element) in self.elements.iter().enumerate().take(high).skip(low) {
            let was_visible = (old_start..old_end).contains(&i);
            let is_visible = (new_start..new_end).contains(&i);
            match (was_visible, is_visible) {
                (false, true) => moves.move_ins.push(element.clone()),
                (true, false) => moves.move_outs.push(element.clone()),
                _ => {}
            }
        }
        moves
    }
}
