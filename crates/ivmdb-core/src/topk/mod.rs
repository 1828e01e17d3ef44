//! Windowed ordering with fractional indexes.
//!
//! The [`TopKOperator`] keeps every input row sorted and emits only the rows
//! inside the `[offset, offset + limit)` window, each tagged with a
//! fractional index ([`Entry::order`]) that sorts lexicographically in the
//! same order as the rows. A row keeps its index for as long as it stays in
//! the sorted set, including across window moves.
//!
//! The window can be moved after construction through a [`WindowHandle`];
//! the move is applied on the next graph run.

mod array;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

pub use array::{Element, TopKArray, ValueComparator, Window, WindowChange, WindowMove};

use crate::dataflow::{Entry, Operator};
use crate::error::Result;
use crate::multiset::MultiSet;

/// Limit part of a window update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Show at most this many rows.
    Bounded(i64),
    /// Show every row after the offset.
    Unbounded,
}

impl From<Option<i64>> for Limit {
    fn from(limit: Option<i64>) -> Self {
        match limit {
            Some(n) => Limit::Bounded(n),
            None => Limit::Unbounded,
        }
    }
}

/// A partial window update; missing parts keep their current value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    /// New offset.
    pub offset: Option<i64>,
    /// New limit.
    pub limit: Option<Limit>,
}

impl WindowUpdate {
    /// Update both offset and limit.
    pub fn new(offset: i64, limit: Option<i64>) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit.into()),
        }
    }

    /// Update only the offset.
    pub fn offset(offset: i64) -> Self {
        Self {
            offset: Some(offset),
            limit: None,
        }
    }

    /// Update only the limit.
    pub fn limit(limit: Option<i64>) -> Self {
        Self {
            offset: None,
            limit: Some(limit.into()),
        }
    }

    fn merge(self, later: WindowUpdate) -> Self {
        Self {
            offset: later.offset.or(self.offset),
            limit: later.limit.or(self.limit),
        }
    }

    fn apply(self, current: Window) -> Window {
        Window {
            offset: self.offset.unwrap_or(current.offset),
            limit: match self.limit {
                Some(Limit::Bounded(n)) => Some(n),
                Some(Limit::Unbounded) => None,
                None => current.limit,
            },
        }
    }
}

#[derive(Debug, Default)]
struct WindowState {
    current: Window,
    pending: Option<WindowUpdate>,
}

/// Shared handle for reading and moving a top-K window.
#[derive(Debug, Clone, Default)]
pub struct WindowHandle {
    state: Arc<Mutex<WindowState>>,
}

impl WindowHandle {
    fn new(window: Window) -> Self {
        Self {
            state: Arc::new(Mutex::new(WindowState {
                current: window,
                pending: None,
            })),
        }
    }

    /// Window currently applied by the operator.
    pub fn current(&self) -> Window {
        self.state.lock().current
    }

    /// Request a window change. Successive requests before the next run are
    /// merged, later parts winning.
    pub fn set(&self, update: WindowUpdate) {
        let mut state = self.state.lock();
        state.pending = Some(match state.pending.take() {
            Some(earlier) => earlier.merge(update),
            None => update,
        });
    }

    /// Whether a window change is waiting to be applied.
    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    fn take_pending(&self) -> Option<Window> {
        let mut state = self.state.lock();
        let update = state.pending.take()?;
        let window = update.apply(state.current);
        state.current = window;
        Some(window)
    }
}

/// Sorted, windowed view over its input.
pub struct TopKOperator {
    array: TopKArray,
    multiplicities: HashMap<Entry, i64>,
    handle: WindowHandle,
}

impl TopKOperator {
    /// Create a top-K operator with an initial window and a row comparator.
    pub fn new(window: Window, comparator: ValueComparator) -> Self {
        Self {
            array: TopKArray::new(window, comparator),
            multiplicities: HashMap::new(),
            handle: WindowHandle::new(window),
        }
    }

    /// Handle for moving the window later.
    pub fn window_handle(&self) -> WindowHandle {
        self.handle.clone()
    }

    fn emit_change(change: WindowChange, output: &mut MultiSet<Entry>) {
        if let Some(element) = change.move_out {
            output.push(element.to_entry(), -1);
        }
        if let Some(element) = change.move_in {
            output.push(element.to_entry(), 1);
        }
    }
}

impl Operator for TopKOperator {
    fn name(&self) -> &'static str {
        "topk"
    }

    fn arity(&self) -> usize {
        1
    }

    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>> {
        let mut output = MultiSet::new();

        if let Some(window) = self.handle.take_pending() {
            let moves = self.array.set_window(window);
            tracing::debug!(
                offset = window.offset,
                limit = ?window.limit,
                moved_in = moves.move_ins.len(),
                moved_out = moves.move_outs.len(),
                "topk window moved"
            );
            for element in moves.move_outs {
                output.push(element.to_entry(), -1);
            }
            for element in moves.move_ins {
                output.push(element.to_entry(), 1);
            }
        }

        let delta: MultiSet<Entry> = inputs
            .into_iter()
            .flatten()
            .map(|(mut entry, m)| {
                entry.order = None;
                (entry, m)
            })
            .collect();

        let mut removals = Vec::new();
        let mut insertions = Vec::new();
        for (entry, m) in delta.consolidate() {
            let before = self.multiplicities.get(&entry).copied().unwrap_or(0);
            let after = before + m;
            if after == 0 {
                self.multiplicities.remove(&entry);
            } else {
                self.multiplicities.insert(entry.clone(), after);
            }
            match (before > 0, after > 0) {
                (false, true) => insertions.push(entry),
                (true, false) => removals.push(entry),
                _ => {}
            }
        }

        removals.sort_by(|a, b| self.array.compare(a, b));
        insertions.sort_by(|a, b| self.array.compare(a, b));

        for entry in &removals {
            Self::emit_change(self.array.delete(entry), &mut output);
        }
        for entry in insertions {
            Self::emit_change(self.array.insert(entry)?, &mut output);
        }

        Ok(output.consolidate())
    }

    fn has_pending_work(&self) -> bool {
        self.handle.has_pending()
    }
}
