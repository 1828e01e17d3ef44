//! Arena-backed dataflow graph.

use std::collections::VecDeque;

use super::operators::{
    ConsolidateOperator, FilterOperator, InputOperator, MapOperator, OutputHandle, OutputOperator,
};
use super::Entry;
use crate::error::{Error, Result};
use crate::multiset::MultiSet;

/// Index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A dataflow operator.
///
/// Each call to [`step`](Operator::step) receives the deltas accumulated on
/// every input port since the previous call (one multiset per port, possibly
/// empty) and returns the delta to forward downstream.
pub trait Operator: Send {
    /// Short operator name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Number of input ports.
    fn arity(&self) -> usize;

    /// Consume input deltas and produce an output delta.
    fn step(&mut self, inputs: Vec<MultiSet<Entry>>) -> Result<MultiSet<Entry>>;

    /// Whether the operator has work to do even without new input.
    fn has_pending_work(&self) -> bool {
        false
    }
}

struct Node {
    operator: Box<dyn Operator>,
    is_input: bool,
    inbox: Vec<MultiSet<Entry>>,
    consumers: Vec<(NodeId, usize)>,
}

impl Node {
    fn has_pending_input(&self) -> bool {
        self.inbox.iter().any(|port| !port.is_empty())
    }
}

/// A directed acyclic graph of operators.
///
/// Build the graph with [`add_input`](Graph::add_input) and
/// [`add_operator`](Graph::add_operator), call [`finalize`](Graph::finalize)
/// once, then feed inputs with [`send`](Graph::send) and propagate with
/// [`run`](Graph::run). The topological execution order is fixed at
/// finalization.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Node>,
    order: Vec<NodeId>,
    finalized: bool,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check if the graph has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Add an external input node.
    pub fn add_input(&mut self) -> Result<NodeId> {
        self.ensure_building()?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            operator: Box::new(InputOperator),
            is_input: true,
            inbox: vec![MultiSet::new()],
            consumers: Vec::new(),
        });
        Ok(id)
    }

    /// Add an operator fed by the given nodes, one per input port.
    pub fn add_operator(
        &mut self,
        operator: impl Operator + 'static,
        inputs: &[NodeId],
    ) -> Result<NodeId> {
        self.ensure_building()?;
        if inputs.len() != operator.arity() {
            return Err(Error::Graph(format!(
                "operator {} expects {} inputs, got {}",
                operator.name(),
                operator.arity(),
                inputs.len()
            )));
        }
        for input in inputs {
            self.node(*input)?;
        }

        let id = NodeId(self.nodes.len());
        for (port, input) in inputs.iter().enumerate() {
            self.nodes[input.0].consumers.push((id, port));
        }
        self.nodes.push(Node {
            inbox: vec![MultiSet::new(); operator.arity()],
            operator: Box::new(operator),
            is_input: false,
            consumers: Vec::new(),
        });
        Ok(id)
    }

    /// Add a map node.
    pub fn map(
        &mut self,
        input: NodeId,
        f: impl FnMut(Entry) -> Entry + Send + 'static,
    ) -> Result<NodeId> {
        self.add_operator(MapOperator::new(f), &[input])
    }

    /// Add a filter node.
    pub fn filter(
        &mut self,
        input: NodeId,
        f: impl Fn(&Entry) -> bool + Send + 'static,
    ) -> Result<NodeId> {
        self.add_operator(FilterOperator::new(f), &[input])
    }

    /// Add a consolidate node.
    pub fn consolidate(&mut self, input: NodeId) -> Result<NodeId> {
        self.add_operator(ConsolidateOperator, &[input])
    }

    /// Add an output sink and return a handle to read what reaches it.
    pub fn output(&mut self, input: NodeId) -> Result<(NodeId, OutputHandle)> {
        let handle = OutputHandle::new();
        let id = self.add_operator(OutputOperator::new(handle.clone()), &[input])?;
        Ok((id, handle))
    }

    /// Freeze the wiring and compute the execution order.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }

        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        for node in &self.nodes {
            for (consumer, _) in &node.consumers {
                in_degree[consumer.0] += 1;
            }
        }

        let mut ready: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_front() {
            order.push(NodeId(i));
            for (consumer, _) in &self.nodes[i].consumers {
                in_degree[consumer.0] -= 1;
                if in_degree[consumer.0] == 0 {
                    ready.push_back(consumer.0);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::Graph("graph contains a cycle".into()));
        }

        tracing::debug!(nodes = order.len(), "dataflow graph finalized");
        self.order = order;
        self.finalized = true;
        Ok(())
    }

    /// Queue a delta on an input node.
    pub fn send(&mut self, input: NodeId, data: MultiSet<Entry>) -> Result<()> {
        let node = self.node_mut(input)?;
        if !node.is_input {
            return Err(Error::Graph(format!("node {} is not an input", input.0)));
        }
        node.inbox[0].extend(data);
        Ok(())
    }

    /// Whether any node has queued input or internal pending work.
    pub fn has_pending_work(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.has_pending_input() || n.operator.has_pending_work())
    }

    /// Propagate all pending deltas until the graph is quiescent.
    pub fn run(&mut self) -> Result<()> {
        if !self.finalized {
            return Err(Error::Graph("graph must be finalized before running".into()));
        }

        let mut passes = 0usize;
        while self.has_pending_work() {
            self.run_pass()?;
            passes += 1;
        }
        tracing::trace!(passes, "dataflow run complete");
        Ok(())
    }

    fn run_pass(&mut self) -> Result<()> {
        for position in 0..self.order.len() {
            let id = self.order[position];
            let node = &mut self.nodes[id.0];
            if !node.has_pending_input() && !node.operator.has_pending_work() {
                continue;
            }

            let arity = node.inbox.len();
            let inputs = std::mem::replace(&mut node.inbox, vec![MultiSet::new(); arity]);
            let output = node.operator.step(inputs)?;
            if output.is_empty() {
                continue;
            }

            tracing::trace!(
                node = id.0,
                operator = node.operator.name(),
                entries = output.len(),
                "operator emitted"
            );

            let consumers = node.consumers.clone();
            if let Some(((last, last_port), rest)) = consumers.split_last() {
                for (consumer, port) in rest {
                    self.nodes[consumer.0].inbox[*port].extend(output.clone());
                }
                self.nodes[last.0].inbox[*last_port].extend(output);
            }
        }
        Ok(())
    }

    fn ensure_building(&self) -> Result<()> {
        if self.finalized {
            return Err(Error::Graph("graph is already finalized".into()));
        }
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(Error::UnknownNode(id))
    }
}
