//! The physical graph compiler: expands a validated
//! [`LogicalGraph`](crate::dataflow::graph::LogicalGraph) into concrete task
//! instances and the channels between them.
//!
//! Grounded on Ray Streaming's `ExecutionGraph.build_graph`/
//! `_generate_channels`, which walks the
//! logical graph in topological order, materializes one execution vertex
//! per `(operator, instance_index)` pair, and wires an input/output queue
//! per edge between instance groups.
use std::collections::HashMap;

use tracing::warn;

use crate::communication::channel::{data_channel, ChannelReceiver, ChannelSender};
use crate::dataflow::graph::LogicalGraph;
use crate::dataflow::operator::{OperatorId, OperatorKind, OperatorMetadata};
use crate::dataflow::record::Record;
use crate::errors::CompileError;
use crate::partition::{build_partitioner, PartitionScheme, Partitioner};

/// Dense, zero-based identifier for one physical task instance. Assigned in
/// topological order so that `task_id` ordering reflects a valid execution
/// order, forming a dense prefix of the natural numbers (see DESIGN.md:
/// this is why the core doesn't use UUIDs here).
pub type TaskId = u64;

/// One instance of an operator: `index` is this instance's position among
/// its operator's `parallelism` siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_id: TaskId,
    pub operator_id: OperatorId,
    pub kind: OperatorKind,
    pub index: usize,
    pub parallelism: usize,
}

/// One compiled output group: the partitioning strategy for an edge, plus
/// the senders for each task instance in the downstream operator. `Forward`
/// groups always have exactly one sender; all others fan out across every
/// downstream instance (or, for `Rescale`, a narrowed contiguous range -
/// see [`compile`]).
#[derive(Debug, PartialEq)]
pub struct OutputGroup {
    pub scheme: PartitionScheme,
    pub senders: Vec<ChannelSender<Record>>,
}

/// The materialized result of compiling one task: its identity, its
/// receivers (one per upstream output group addressed to it), and its
/// outgoing groups (one per logical edge leaving its operator).
#[derive(Debug, PartialEq)]
pub struct PhysicalTask {
    pub task: Task,
    pub inputs: Vec<ChannelReceiver<Record>>,
    pub outputs: Vec<OutputGroup>,
}

/// The compiled physical graph: every task instance plus its wired
/// channels, ready to be handed to `node::worker` run loops.
#[derive(Debug, PartialEq)]
pub struct PhysicalGraph {
    pub tasks: Vec<PhysicalTask>,
}

/// Compiles a validated [`LogicalGraph`] into a [`PhysicalGraph`].
///
/// Algorithm:
/// 1. Reject any operator kind the compiler doesn't support.
/// 2. Assign dense task ids to every `(operator, instance)` pair in
///    topological order.
/// 3. For each logical edge, materialize the channel(s) implied by its
///    partitioning scheme between the producing and consuming instance
///    groups.
pub fn compile(graph: &LogicalGraph, channel_capacity: usize) -> Result<PhysicalGraph, CompileError> {
    graph.validate()?;
    for (op_id, kind) in graph.unsupported_operators() {
        return Err(CompileError::UnsupportedOperatorKind { op_id, kind });
    }

    let order = graph.topological_order()?;

    // instance_groups[op_id] = the dense task ids assigned to that operator,
    // in instance-index order.
    let mut instance_groups: HashMap<OperatorId, Vec<TaskId>> = HashMap::new();
    let mut task_meta: HashMap<TaskId, Task> = HashMap::new();
    let mut next_task_id: TaskId = 0;

    for &op_id in &order {
        let meta: &OperatorMetadata = graph.operator(op_id).expect("topological order only contains known ids");
        let mut ids = Vec::with_capacity(meta.parallelism);
        for index in 0..meta.parallelism {
            let task_id = next_task_id;
            next_task_id += 1;
            task_meta.insert(
                task_id,
                Task {
                    task_id,
                    operator_id: op_id,
                    kind: meta.kind,
                    index,
                    parallelism: meta.parallelism,
                },
            );
            ids.push(task_id);
        }
        instance_groups.insert(op_id, ids);
    }

    // senders[task_id] accumulates the per-instance ChannelSender for every
    // logical edge whose OutputGroup must address this task.
    let mut inputs: HashMap<TaskId, Vec<ChannelReceiver<Record>>> =
        task_meta.keys().map(|&id| (id, Vec::new())).collect();
    let mut outputs: HashMap<TaskId, Vec<OutputGroup>> =
        task_meta.keys().map(|&id| (id, Vec::new())).collect();

    for edge in graph.edges() {
        let upstream_ids = instance_groups
            .get(&edge.from)
            .expect("edge source must be a known operator");
        let downstream_ids = instance_groups
            .get(&edge.to)
            .expect("edge target must be a known operator");

        match &edge.scheme.strategy {
            crate::partition::PartitionStrategy::Forward => {
                if downstream_ids.len() > upstream_ids.len() {
                    warn!(
                        from = edge.from,
                        to = edge.to,
                        upstream_instances = upstream_ids.len(),
                        downstream_instances = downstream_ids.len(),
                        "Forward edge has mismatched parallelism; some downstream instances will receive no input"
                    );
                }
                // N_up channels, one per upstream instance; channel i wired
                // to downstream instance i mod M so every upstream instance
                // keeps an output even when N_up > M.
                for (i, &up) in upstream_ids.iter().enumerate() {
                    let down = downstream_ids[i % downstream_ids.len()];
                    wire_one_to_one(up, down, &edge.scheme, channel_capacity, &mut inputs, &mut outputs);
                }
            }
            crate::partition::PartitionStrategy::Rescale => {
                // Narrow each upstream instance's fan-out to a contiguous,
                // roughly even slice of the downstream group, so a local
                // round-robin partitioner reproduces global rescale
                // behavior without knowing the full downstream size.
                let n_up = upstream_ids.len();
                let n_down = downstream_ids.len();
                for (i, &up) in upstream_ids.iter().enumerate() {
                    let lo = i * n_down / n_up;
                    let hi = ((i + 1) * n_down / n_up).max(lo + 1).min(n_down);
                    let targets = &downstream_ids[lo..hi];
                    wire_fan_out(up, targets, &edge.scheme, channel_capacity, &mut inputs, &mut outputs);
                }
            }
            _ => {
                // Shuffle / ShuffleByKey / Broadcast / RoundRobin / Custom
                // all address the full downstream instance group.
                for &up in upstream_ids {
                    wire_fan_out(up, downstream_ids, &edge.scheme, channel_capacity, &mut inputs, &mut outputs);
                }
            }
        }
    }

    let mut tasks: Vec<PhysicalTask> = Vec::with_capacity(task_meta.len());
    let mut task_ids: Vec<TaskId> = task_meta.keys().copied().collect();
    task_ids.sort_unstable();
    for task_id in task_ids {
        tasks.push(PhysicalTask {
            task: task_meta.remove(&task_id).expect("task_id was just collected from this map"),
            inputs: inputs.remove(&task_id).unwrap_or_default(),
            outputs: outputs.remove(&task_id).unwrap_or_default(),
        });
    }

    Ok(PhysicalGraph { tasks })
}

fn wire_one_to_one(
    up: TaskId,
    down: TaskId,
    scheme: &PartitionScheme,
    capacity: usize,
    inputs: &mut HashMap<TaskId, Vec<ChannelReceiver<Record>>>,
    outputs: &mut HashMap<TaskId, Vec<OutputGroup>>,
) {
    let (tx, rx) = data_channel::<Record>(capacity);
    inputs.entry(down).or_default().push(rx);
    outputs
        .entry(up)
        .or_default()
        .push(OutputGroup { scheme: scheme.clone(), senders: vec![tx] });
}

fn wire_fan_out(
    up: TaskId,
    downstream: &[TaskId],
    scheme: &PartitionScheme,
    capacity: usize,
    inputs: &mut HashMap<TaskId, Vec<ChannelReceiver<Record>>>,
    outputs: &mut HashMap<TaskId, Vec<OutputGroup>>,
) {
    let mut senders = Vec::with_capacity(downstream.len());
    for &down in downstream {
        let (tx, rx) = data_channel::<Record>(capacity);
        inputs.entry(down).or_default().push(rx);
        senders.push(tx);
    }
    outputs
        .entry(up)
        .or_default()
        .push(OutputGroup { scheme: scheme.clone(), senders });
}

/// Builds a fresh runtime [`Partitioner`] for every `OutputGroup` a task
/// owns. Called once at worker init, not per record.
pub fn build_partitioners(task: &PhysicalTask) -> Vec<Box<dyn Partitioner>> {
    task.outputs.iter().map(|g| build_partitioner(&g.scheme)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::graph::{Edge, LogicalGraph};
    use crate::dataflow::operator::{OperatorLogic, OperatorMetadata};
    use crate::partition::PartitionScheme;

    fn meta(id: OperatorId, kind: OperatorKind, parallelism: usize) -> OperatorMetadata {
        OperatorMetadata {
            id,
            kind,
            name: format!("op-{}", id),
            parallelism,
            logic: OperatorLogic::Unsupported,
            state_hook: None,
        }
    }

    #[test]
    fn forward_wires_one_to_one_when_parallelism_matches() {
        let mut g = LogicalGraph::new();
        g.insert_operator(meta(0, OperatorKind::Source, 2));
        g.insert_operator(meta(1, OperatorKind::Map, 2));
        g.insert_edge(Edge { from: 0, to: 1, scheme: PartitionScheme::forward() });

        let physical = compile(&g, 8).unwrap();
        assert_eq!(physical.tasks.len(), 4);
        // Each of the 2 source instances has exactly one forward output.
        let sources: Vec<_> = physical.tasks.iter().filter(|t| t.task.operator_id == 0).collect();
        for t in &sources {
            assert_eq!(t.outputs.len(), 1);
            assert_eq!(t.outputs[0].senders.len(), 1);
        }
    }

    #[test]
    fn shuffle_fans_out_to_every_downstream_instance() {
        let mut g = LogicalGraph::new();
        g.insert_operator(meta(0, OperatorKind::Source, 1));
        g.insert_operator(meta(1, OperatorKind::Map, 3));
        g.insert_edge(Edge { from: 0, to: 1, scheme: PartitionScheme::shuffle() });

        let physical = compile(&g, 8).unwrap();
        let source_task = physical.tasks.iter().find(|t| t.task.operator_id == 0).unwrap();
        assert_eq!(source_task.outputs[0].senders.len(), 3);
    }

    #[test]
    fn unsupported_kind_is_rejected_before_wiring() {
        let mut g = LogicalGraph::new();
        g.insert_operator(meta(0, OperatorKind::Source, 1));
        g.insert_operator(meta(1, OperatorKind::TimeWindow, 1));
        g.insert_edge(Edge { from: 0, to: 1, scheme: PartitionScheme::forward() });

        assert_eq!(
            compile(&g, 8),
            Err(CompileError::UnsupportedOperatorKind { op_id: 1, kind: OperatorKind::TimeWindow })
        );
    }

    #[test]
    fn task_ids_are_dense_from_zero() {
        let mut g = LogicalGraph::new();
        g.insert_operator(meta(0, OperatorKind::Source, 2));
        g.insert_operator(meta(1, OperatorKind::Sink, 3));
        g.insert_edge(Edge { from: 0, to: 1, scheme: PartitionScheme::shuffle() });

        let physical = compile(&g, 8).unwrap();
        let mut ids: Vec<TaskId> = physical.tasks.iter().map(|t| t.task.task_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..5).collect::<Vec<_>>());
    }
}
