//! Operator metadata and the boxed user-function capability traits.
//!
//! Grounded on erdos's `dataflow::graph::AbstractOperator` (whose
//! `OperatorRunner` is a boxed, cloneable closure held behind an `Arc`) and
//! on Ray Streaming's `context.py` (`RuntimeContext`/`RuntimeContextImpl`)
//! for the fields exposed to a running task.
use std::fmt;
use std::sync::Arc;

use crate::dataflow::record::Record;
use crate::errors::UserError;

/// Monotonically assigned at build time; never reused within a job.
pub type OperatorId = u64;

/// The kind of transform an operator performs. `TimeWindow` and `WindowJoin`
/// are accepted by the builder but rejected by the physical graph compiler
/// (see DESIGN.md, Open Question decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Source,
    ReadTextFile,
    Map,
    FlatMap,
    Filter,
    KeyBy,
    Reduce,
    Sum,
    TimeWindow,
    Inspect,
    Sink,
    WindowJoin,
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl OperatorKind {
    /// `Source`-kind operators are the only ones the physical compiler may
    /// place with no upstream input channel.
    pub fn is_source(&self) -> bool {
        matches!(self, OperatorKind::Source | OperatorKind::ReadTextFile)
    }

    /// Kinds the compiler refuses to place into a physical graph: accepted
    /// by the builder, rejected at compile time (see DESIGN.md).
    pub fn is_compiler_supported(&self) -> bool {
        !matches!(self, OperatorKind::TimeWindow | OperatorKind::WindowJoin)
    }
}

/// The context a running task instance sees: its own id, its index within
/// its operator's parallel instances, and the total instance count.
/// Mirrors `original_source/streaming/python/context.py`'s `RuntimeContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeContext {
    pub task_id: crate::node::physical::TaskId,
    pub task_index: usize,
    pub parallelism: usize,
}

/// A per-operator user callback invoked once per input record, producing
/// zero or more output records. Covers `Map`/`FlatMap`/`Filter`/`Inspect`:
/// a `Filter` returns 0 or 1 records, a `FlatMap` returns any number, a
/// plain `Map`/`Inspect` returns exactly 1.
pub trait RecordFn: Send + Sync {
    fn call(&self, record: &Record, ctx: &RuntimeContext) -> Result<Vec<Record>, UserError>;
}

impl<F> RecordFn for F
where
    F: Fn(&Record, &RuntimeContext) -> Result<Vec<Record>, UserError> + Send + Sync,
{
    fn call(&self, record: &Record, ctx: &RuntimeContext) -> Result<Vec<Record>, UserError> {
        self(record, ctx)
    }
}

/// The projection used by `key_by`: extracts a `Keyed<K, V>`-shaped output
/// record from a plain input record.
pub trait KeySelectorFn: Send + Sync {
    fn call(&self, record: &Record, ctx: &RuntimeContext) -> Result<Record, UserError>;
}

impl<F> KeySelectorFn for F
where
    F: Fn(&Record, &RuntimeContext) -> Result<Record, UserError> + Send + Sync,
{
    fn call(&self, record: &Record, ctx: &RuntimeContext) -> Result<Record, UserError> {
        self(record, ctx)
    }
}

/// A stateful fold applied per key: `reduce`/`sum` both use this shape, with
/// `sum` built as a `ReduceFn` closure over a selected numeric field.
/// Receives the current accumulator (`None` before the first record for a
/// key) and the incoming record, and returns the new accumulator.
pub trait ReduceFn: Send + Sync {
    fn call(
        &self,
        accumulator: Option<&Record>,
        record: &Record,
        ctx: &RuntimeContext,
    ) -> Result<Record, UserError>;
}

impl<F> ReduceFn for F
where
    F: Fn(Option<&Record>, &Record, &RuntimeContext) -> Result<Record, UserError> + Send + Sync,
{
    fn call(
        &self,
        accumulator: Option<&Record>,
        record: &Record,
        ctx: &RuntimeContext,
    ) -> Result<Record, UserError> {
        self(accumulator, record, ctx)
    }
}

/// Terminal callback for a `Sink` operator. Takes a record and performs a
/// side effect; produces no downstream output.
pub trait SinkFn: Send + Sync {
    fn call(&self, record: &Record, ctx: &RuntimeContext) -> Result<(), UserError>;
}

impl<F> SinkFn for F
where
    F: Fn(&Record, &RuntimeContext) -> Result<(), UserError> + Send + Sync,
{
    fn call(&self, record: &Record, ctx: &RuntimeContext) -> Result<(), UserError> {
        self(record, ctx)
    }
}

/// Generator callback for a `Source` operator: called repeatedly by the
/// worker loop until it returns `Ok(None)`, signalling EOS.
pub trait SourceFn: Send + Sync {
    fn call(&mut self, ctx: &RuntimeContext) -> Result<Option<Record>, UserError>;
}

/// The identity of one running task instance, handed to a [`StateHook`] at
/// worker init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHandle {
    pub task_id: crate::node::physical::TaskId,
    pub operator_id: OperatorId,
    pub task_index: usize,
    pub parallelism: usize,
}

/// An optional external collaborator attached to a `Sum` operator. No
/// checkpoint algorithm is specified here - this is a hook point only: the
/// worker calls `register` once, at init, before the task starts consuming
/// input, and never again.
pub trait StateHook: Send + Sync {
    fn register(&self, handle: WorkerHandle);
}

impl<F> StateHook for F
where
    F: Fn(WorkerHandle) + Send + Sync,
{
    fn register(&self, handle: WorkerHandle) {
        self(handle)
    }
}

/// The user-supplied behavior of one operator, boxed behind `Arc` so the
/// logical graph (and its clones, taken during compilation) can share a
/// single instance of each callback. Mirrors erdos's own boxed-closure
/// `OperatorRunner` stored on `AbstractOperator`.
#[derive(Clone)]
pub enum OperatorLogic {
    Source(Arc<std::sync::Mutex<dyn SourceFn>>),
    ReadTextFile { path: Arc<str> },
    Map(Arc<dyn RecordFn>),
    FlatMap(Arc<dyn RecordFn>),
    Filter(Arc<dyn RecordFn>),
    KeyBy(Arc<dyn KeySelectorFn>),
    Reduce(Arc<dyn ReduceFn>),
    Sum { field: Arc<dyn KeySelectorFn> },
    Inspect(Arc<dyn RecordFn>),
    Sink(Arc<dyn SinkFn>),
    /// Carried so the builder can represent, and the compiler can reject,
    /// windowed operators without needing a second enum.
    Unsupported,
}

impl fmt::Debug for OperatorLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperatorLogic::Source(_) => "Source",
            OperatorLogic::ReadTextFile { .. } => "ReadTextFile",
            OperatorLogic::Map(_) => "Map",
            OperatorLogic::FlatMap(_) => "FlatMap",
            OperatorLogic::Filter(_) => "Filter",
            OperatorLogic::KeyBy(_) => "KeyBy",
            OperatorLogic::Reduce(_) => "Reduce",
            OperatorLogic::Sum { .. } => "Sum",
            OperatorLogic::Inspect(_) => "Inspect",
            OperatorLogic::Sink(_) => "Sink",
            OperatorLogic::Unsupported => "Unsupported",
        };
        write!(f, "OperatorLogic::{}", label)
    }
}

/// Static description of one logical operator: identity, kind, requested
/// parallelism, and the user logic to run. Stored in the
/// [`crate::dataflow::graph::LogicalGraph`] and cloned into the
/// [`crate::node::physical::PhysicalGraph`] at compile time.
#[derive(Clone)]
pub struct OperatorMetadata {
    pub id: OperatorId,
    pub kind: OperatorKind,
    pub name: String,
    pub parallelism: usize,
    pub logic: OperatorLogic,
    /// External collaborator for a `Sum` operator's accumulator state; see
    /// [`StateHook`]. `None` for every other operator kind.
    pub state_hook: Option<Arc<dyn StateHook>>,
}

impl fmt::Debug for OperatorMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorMetadata")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("parallelism", &self.parallelism)
            .field("logic", &self.logic)
            .field("state_hook", &self.state_hook.is_some())
            .finish()
    }
}
