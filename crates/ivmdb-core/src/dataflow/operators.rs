//! Stateless operators and the output sink.

use std::sync::Arc;

use parking_lot::Mutex;

use super::graph::Operator;
use super::Entry;
use crate::error::Result;
use crate::multiset::MultiSet;

fn single(inputs: Vec<MultiSet<Entry>>) -> MultiSet<Entry> {
    inputs.into_iter().next().unwrap_or_default()
}

/// Forwards whatever is sent to an input node.
pub struct InputOperator;

impl Operator for InputOperator {
    fn name(&self) -> &'static str {
        "input"
    }

    fn arity(&self) -> usize {
        1
    }

    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>> {
        Ok(single(inputs))
    }
}

/// Applies a function to every entry.
pub struct MapOperator {
    f: Box<dyn FnMut(Entry) -> Entry + Send>,
}

impl MapOperator {
    /// Create a map operator.
    pub fn new(f: impl FnMut(Entry) -> Entry + Send + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl Operator for MapOperator {
    fn name(&self) -> &'static str {
        "map"
    }

    fn arity(&self) -> usize {
        1
    }

    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>> {
        Ok(single(inputs).map(&mut self.f))
    }
}

/// Keeps entries satisfying a predicate.
pub struct FilterOperator {
    f: Box<dyn Fn(&Entry) -> bool + Send>,
}

impl FilterOperator {
    /// Create a filter operator.
    pub fn new(f: impl Fn(&Entry) -> bool + Send + 'static) -> Self {
        Self { f: Box::new(f) }
    }
}

impl Operator for FilterOperator {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn arity(&self) -> usize {
        1
    }

    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>> {
        Ok(single(inputs).filter(|e| (self.f)(e)))
    }
}

/// Merges equal entries and drops cancelled ones.
pub struct ConsolidateOperator;

impl Operator for ConsolidateOperator {
    fn name(&self) -> &'static str {
        "consolidate"
    }

    fn arity(&self) -> usize {
        1
    }

    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>> {
        Ok(single(inputs).consolidate())
    }
}

/// Shared buffer of the batches that reached an output node.
#[derive(Clone, Default)]
pub struct OutputHandle {
    batches: Arc<Mutex<Vec<MultiSet<Entry>>>>,
}

impl OutputHandle {
    /// Create an empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every batch received so far.
    pub fn drain(&self) -> Vec<MultiSet<Entry>> {
        std::mem::take(&mut *self.batches.lock())
    }

    /// Take every batch received so far, merged and consolidated.
    pub fn drain_consolidated(&self) -> MultiSet<Entry> {
        self.drain()
            .into_iter()
            .fold(MultiSet::new(), MultiSet::concat)
            .consolidate()
    }
}

/// Terminal operator that records its input in an [`OutputHandle`].
pub struct OutputOperator {
    handle: OutputHandle,
}

impl OutputOperator {
    /// Create a sink writing to the given handle.
    pub fn new(handle: OutputHandle) -> Self {
        Self { handle }
    }
}

impl Operator for OutputOperator {
    fn name(&self) -> &'static str {
        "output"
    }

    fn arity(&self) -> usize {
        1
    }

    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>> {
        let batch = single(inputs);
        if !batch.is_empty() {
            self.handle.batches.lock().push(batch);
        }
        Ok(MultiSet::new())
    }
}
