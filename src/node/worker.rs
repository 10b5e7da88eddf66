//! The worker run loop: drives one [`PhysicalTask`] to completion.
//!
//! Grounded on erdos's `worker_node.rs` (the same `tokio::select!`-based
//! main loop shape), using a sum type with
//! per-variant data plus a single `step()` method in place of one Rust
//! type per operator kind - realized here as [`OperatorRuntime::step`]
//! dispatching over [`OperatorLogic`].
use std::collections::{HashMap, VecDeque};

use futures::stream::{select_all, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use crate::dataflow::operator::{OperatorLogic, RuntimeContext};
use crate::dataflow::record::Record;
use crate::errors::{JobError, RoutingError, UserError};
use crate::node::physical::{OutputGroup, PhysicalTask, TaskId};
use crate::partition::{build_partitioner, Partitioner};

/// Kind-agnostic dispatch over one operator's user logic. Built once at
/// worker init; `step` is called once per input record.
pub struct OperatorRuntime {
    logic: OperatorLogic,
    /// `Reduce`/`Sum` accumulator state, keyed by the record's key hash.
    accumulators: HashMap<u64, Record>,
    /// Lines pending emission for a `ReadTextFile` source, lazily loaded on
    /// the first poll. `None` before the file has been read.
    text_file_lines: Option<VecDeque<String>>,
}

impl OperatorRuntime {
    pub fn new(logic: OperatorLogic) -> Self {
        OperatorRuntime { logic, accumulators: HashMap::new(), text_file_lines: None }
    }

    /// Runs one input record through this operator's logic, producing zero
    /// or more output records. Not called for `Source`; see
    /// [`OperatorRuntime::poll_source`].
    pub fn step(&mut self, record: &Record, ctx: &RuntimeContext) -> Result<Vec<Record>, UserError> {
        match &self.logic {
            OperatorLogic::Map(f) | OperatorLogic::FlatMap(f) | OperatorLogic::Filter(f) => {
                f.call(record, ctx)
            }
            OperatorLogic::Inspect(f) => f.call(record, ctx),
            OperatorLogic::KeyBy(f) => Ok(vec![f.call(record, ctx)?]),
            OperatorLogic::Reduce(f) => {
                let key_hash = record.key_hash().unwrap_or_else(|| record.payload_hash());
                let prev = self.accumulators.get(&key_hash).cloned();
                let folded = f.call(prev.as_ref(), record, ctx)?;
                let next = record.rekeyed_like(folded);
                self.accumulators.insert(key_hash, next.clone());
                Ok(vec![next])
            }
            OperatorLogic::Sum { field } => {
                let key_hash = record.key_hash().unwrap_or_else(|| record.payload_hash());
                let projected = field.call(record, ctx)?;
                let summed = match self.accumulators.get(&key_hash) {
                    Some(prev) => sum_i64(prev, &projected, ctx.task_id)?,
                    None => projected,
                };
                let next = record.rekeyed_like(summed);
                self.accumulators.insert(key_hash, next.clone());
                Ok(vec![next])
            }
            OperatorLogic::Sink(f) => {
                f.call(record, ctx)?;
                Ok(vec![])
            }
            OperatorLogic::Source(_) | OperatorLogic::ReadTextFile { .. } | OperatorLogic::Unsupported => {
                unreachable!("Source/Unsupported operators are driven by poll_source, not step")
            }
        }
    }

    /// Polls a `Source`/`ReadTextFile` operator for its next record.
    /// Returns `Ok(None)` on EOS.
    pub async fn poll_source(&mut self, ctx: &RuntimeContext) -> Result<Option<Record>, UserError> {
        match &self.logic {
            OperatorLogic::Source(f) => {
                let mut guard = f.lock().expect("source callback mutex should never be poisoned");
                guard.call(ctx)
            }
            OperatorLogic::ReadTextFile { path } => {
                if self.text_file_lines.is_none() {
                    let contents = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| UserError {
                        task_id: ctx.task_id,
                        record_debug: format!("ReadTextFile({})", path),
                        message: format!("failed to read {}: {}", path, e),
                    })?;
                    self.text_file_lines =
                        Some(contents.lines().map(|line| line.to_string()).collect());
                }
                let lines = self.text_file_lines.as_mut().expect("just populated above");
                Ok(lines.pop_front().map(Record::new))
            }
            _ => unreachable!("poll_source called on non-source logic"),
        }
    }
}

/// `sum()` only supports `i64` projections: word-count-style aggregation
/// never needs floating point, and floats are excluded from the crate-wide
/// `Data` bound anyway (see DESIGN.md: `Data` requires `Hash`, which `f64`
/// does not implement).
fn sum_i64(prev: &Record, incoming: &Record, task_id: TaskId) -> Result<Record, UserError> {
    let (Some(&a), Some(&b)) = (prev.downcast_ref::<i64>(), incoming.downcast_ref::<i64>()) else {
        return Err(UserError {
            task_id,
            record_debug: format!("{:?}", incoming),
            message: "sum() requires an i64 projection".to_string(),
        });
    };
    Ok(Record::new(a + b))
}

/// Routes one produced record to every target implied by its output
/// group's partitioner, sending it down each selected channel.
async fn route(
    record: Record,
    group: &mut OutputGroup,
    partitioner: &mut dyn Partitioner,
    task_id: TaskId,
) -> Result<(), RoutingError> {
    let targets = partitioner
        .partition(&record, group.senders.len())
        .map_err(|e| crate::partition::attribute_to_task(e, task_id))?;
    for idx in targets {
        let sender = group
            .senders
            .get_mut(idx)
            .expect("partitioner must only return indices within [0, num_partitions)");
        if sender.send(record.clone()).await.is_err() {
            return Err(RoutingError { task_id, reason: "downstream channel disconnected".to_string() });
        }
    }
    Ok(())
}

async fn emit(
    records: Vec<Record>,
    outputs: &mut [OutputGroup],
    partitioners: &mut [Box<dyn Partitioner>],
    task_id: TaskId,
) -> Result<(), JobError> {
    for record in records {
        for (group, partitioner) in outputs.iter_mut().zip(partitioners.iter_mut()) {
            route(record.clone(), group, partitioner.as_mut(), task_id)
                .await
                .map_err(|e| JobError::new(task_id, e))?;
        }
    }
    Ok(())
}

/// Drives one task instance from its input channels (or, for a source, an
/// internal poll loop) to completion: forwards every output record through
/// its partitioners and propagates EOS to every owned output channel
/// exactly once.
pub async fn run_task(
    mut task: PhysicalTask,
    logic: OperatorLogic,
    state_hook: Option<std::sync::Arc<dyn crate::dataflow::operator::StateHook>>,
) -> Result<(), JobError> {
    let task_id = task.task.task_id;
    let ctx = RuntimeContext {
        task_id,
        task_index: task.task.index,
        parallelism: task.task.parallelism,
    };
    if let Some(hook) = &state_hook {
        hook.register(crate::dataflow::operator::WorkerHandle {
            task_id,
            operator_id: task.task.operator_id,
            task_index: task.task.index,
            parallelism: task.task.parallelism,
        });
    }
    let mut runtime = OperatorRuntime::new(logic);
    let mut partitioners = task
        .outputs
        .iter()
        .map(|g| build_partitioner(&g.scheme))
        .collect::<Vec<_>>();

    if task.task.kind.is_source() {
        loop {
            match runtime.poll_source(&ctx).await {
                Ok(Some(record)) => {
                    emit(vec![record], &mut task.outputs, &mut partitioners, task_id).await?;
                }
                Ok(None) => break,
                Err(e) => return Err(JobError::new(task_id, e)),
            }
        }
    } else {
        let streams = task
            .inputs
            .into_iter()
            .map(|rx| ReceiverStream::new(into_plain_receiver(rx)));
        let mut merged = select_all(streams);
        while let Some(record) = merged.next().await {
            let outputs = runtime.step(&record, &ctx).map_err(|e| JobError::new(task_id, e))?;
            emit(outputs, &mut task.outputs, &mut partitioners, task_id).await?;
        }
    }

    for group in &mut task.outputs {
        for sender in &mut group.senders {
            let _ = sender.send_eos().await;
        }
    }
    Ok(())
}

/// Bridges a [`crate::communication::channel::ChannelReceiver`] (which
/// already hides the EOS sentinel behind `recv() -> Option<T>`) into a
/// plain `tokio::sync::mpsc::Receiver` so it can be wrapped in a
/// [`ReceiverStream`] and merged fairly via `select_all`.
fn into_plain_receiver(
    mut rx: crate::communication::channel::ChannelReceiver<Record>,
) -> tokio::sync::mpsc::Receiver<Record> {
    let (tx, plain_rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if tx.send(record).await.is_err() {
                break;
            }
        }
    });
    plain_rx
}
