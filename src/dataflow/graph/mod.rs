//! The logical dataflow graph: operators plus the partitioning scheme
//! attached to each outgoing edge.
//!
//! Grounded on Ray Streaming's `Environment`/`ExecutionGraph.build_graph`,
//! which walks the graph with
//! `networkx.topological_sort`), reimplemented here with Kahn's algorithm
//! in place of a graph library: this module carries its own adjacency
//! lists and a `VecDeque`-based topological sort instead of depending on
//! one.
use std::collections::{HashMap, HashSet, VecDeque};

use crate::dataflow::operator::{OperatorId, OperatorKind, OperatorMetadata};
use crate::errors::CompileError;
use crate::partition::PartitionScheme;

/// One outgoing edge of the logical graph: which operator it leads to, and
/// the partitioning scheme chosen for it.
#[derive(Clone, Debug)]
pub struct Edge {
    pub from: OperatorId,
    pub to: OperatorId,
    pub scheme: PartitionScheme,
}

/// The full logical dataflow: operators plus partitioned edges between them.
/// Built incrementally by `dataflow::builder::DataStream` and frozen into a
/// `node::physical::PhysicalGraph` by the compiler.
#[derive(Debug, Default)]
pub struct LogicalGraph {
    operators: HashMap<OperatorId, OperatorMetadata>,
    edges: Vec<Edge>,
    next_id: OperatorId,
}

impl LogicalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints the next monotonic operator id. Never reused within a job.
    pub fn next_operator_id(&mut self) -> OperatorId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn insert_operator(&mut self, metadata: OperatorMetadata) {
        self.operators.insert(metadata.id, metadata);
    }

    pub fn insert_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn operator(&self, id: OperatorId) -> Option<&OperatorMetadata> {
        self.operators.get(&id)
    }

    pub fn operator_mut(&mut self, id: OperatorId) -> Option<&mut OperatorMetadata> {
        self.operators.get_mut(&id)
    }

    pub fn operators(&self) -> impl Iterator<Item = &OperatorMetadata> {
        self.operators.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut Edge> {
        self.edges.iter_mut()
    }

    pub fn outgoing(&self, id: OperatorId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    pub fn incoming(&self, id: OperatorId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Kahn's algorithm: returns operator ids in a valid topological order,
    /// or `CompileError::Cycle` if the graph isn't a DAG.
    pub fn topological_order(&self) -> Result<Vec<OperatorId>, CompileError> {
        let mut in_degree: HashMap<OperatorId, usize> =
            self.operators.keys().map(|&id| (id, 0)).collect();
        for edge in &self.edges {
            *in_degree.entry(edge.to).or_insert(0) += 1;
        }

        let mut initial: Vec<OperatorId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        // Deterministic iteration order regardless of HashMap bucket layout.
        initial.sort_unstable();
        let mut queue: VecDeque<OperatorId> = initial.into();

        let mut order = Vec::with_capacity(self.operators.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let mut newly_free: Vec<OperatorId> = Vec::new();
            for edge in self.outgoing(id) {
                let deg = in_degree.get_mut(&edge.to).expect("edge target must be a known operator");
                *deg -= 1;
                if *deg == 0 {
                    newly_free.push(edge.to);
                }
            }
            newly_free.sort_unstable();
            for id in newly_free {
                queue.push_back(id);
            }
        }

        if order.len() != self.operators.len() {
            return Err(CompileError::Cycle);
        }
        Ok(order)
    }

    /// Validates the graph is ready to compile: acyclic, every non-source
    /// operator reachable from some source, and no zero-parallelism
    /// operator. Does not check operator-kind support; that's the
    /// compiler's job since the builder is allowed to construct
    /// `TimeWindow`/`WindowJoin` nodes that only fail at compile time.
    pub fn validate(&self) -> Result<(), CompileError> {
        let order = self.topological_order()?;

        for &id in &order {
            let meta = self.operator(id).expect("topological order only contains known ids");
            if meta.parallelism == 0 {
                return Err(CompileError::ZeroParallelism { op_id: id });
            }
        }

        let mut reachable: HashSet<OperatorId> = HashSet::new();
        let mut frontier: VecDeque<OperatorId> = self
            .operators
            .values()
            .filter(|m| m.kind.is_source())
            .map(|m| m.id)
            .collect();
        while let Some(id) = frontier.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            for edge in self.outgoing(id) {
                frontier.push_back(edge.to);
            }
        }

        for &id in &order {
            if !reachable.contains(&id) {
                return Err(CompileError::DisconnectedOperator { op_id: id });
            }
        }

        Ok(())
    }

    /// Kinds the compiler will refuse, surfaced ahead of physical
    /// compilation so the builder's own `validate()` / `execute()` entry
    /// point can report the precise operator.
    pub fn unsupported_operators(&self) -> Vec<(OperatorId, OperatorKind)> {
        self.operators
            .values()
            .filter(|m| !m.kind.is_compiler_supported())
            .map(|m| (m.id, m.kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::operator::OperatorLogic;
    use crate::partition::PartitionScheme;

    fn source(id: OperatorId) -> OperatorMetadata {
        OperatorMetadata {
            id,
            kind: OperatorKind::Source,
            name: format!("source-{}", id),
            parallelism: 1,
            logic: OperatorLogic::Unsupported,
            state_hook: None,
        }
    }

    fn map(id: OperatorId) -> OperatorMetadata {
        OperatorMetadata {
            id,
            kind: OperatorKind::Map,
            name: format!("map-{}", id),
            parallelism: 1,
            logic: OperatorLogic::Unsupported,
            state_hook: None,
        }
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut g = LogicalGraph::new();
        g.insert_operator(source(0));
        g.insert_operator(map(1));
        g.insert_operator(map(2));
        g.insert_edge(Edge { from: 0, to: 1, scheme: PartitionScheme::forward() });
        g.insert_edge(Edge { from: 1, to: 2, scheme: PartitionScheme::forward() });

        let order = g.topological_order().unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut g = LogicalGraph::new();
        g.insert_operator(map(0));
        g.insert_operator(map(1));
        g.insert_edge(Edge { from: 0, to: 1, scheme: PartitionScheme::forward() });
        g.insert_edge(Edge { from: 1, to: 0, scheme: PartitionScheme::forward() });

        assert_eq!(g.topological_order(), Err(CompileError::Cycle));
    }

    #[test]
    fn disconnected_operator_is_rejected() {
        let mut g = LogicalGraph::new();
        g.insert_operator(source(0));
        g.insert_operator(map(1));
        // no edge from 0 to 1: 1 is unreachable from any source
        assert_eq!(g.validate(), Err(CompileError::DisconnectedOperator { op_id: 1 }));
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let mut g = LogicalGraph::new();
        let mut src = source(0);
        src.parallelism = 0;
        g.insert_operator(src);
        assert_eq!(g.validate(), Err(CompileError::ZeroParallelism { op_id: 0 }));
    }

    #[test]
    fn unsupported_operator_kinds_are_reported() {
        let mut g = LogicalGraph::new();
        g.insert_operator(source(0));
        let mut window = map(1);
        window.kind = OperatorKind::TimeWindow;
        g.insert_operator(window);
        g.insert_edge(Edge { from: 0, to: 1, scheme: PartitionScheme::forward() });

        assert_eq!(g.unsupported_operators(), vec![(1, OperatorKind::TimeWindow)]);
    }
}
