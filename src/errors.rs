//! The error taxonomy of the dataflow runtime.
//!
//! Each stage of a job's life owns its own error type, mirroring the stage at
//! which the failure was detected: malformed builder chains fail
//! synchronously with a [`BuilderError`], a bad [`crate::dataflow::graph::LogicalGraph`]
//! fails compilation with a [`CompileError`], and failures discovered only
//! once a job is running are reported to the coordinator as a [`JobError`].
use std::{error::Error, fmt};

use crate::dataflow::operator::{OperatorId, OperatorKind};
use crate::node::physical::TaskId;

/// Raised synchronously by the stream builder when a chain of calls is
/// malformed. The [`LogicalGraph`](crate::dataflow::graph::LogicalGraph) is
/// left untouched when this error is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// A partitioning selector (`shuffle()`, `broadcast()`, ...) was applied
    /// to a stream that already carries a pending scheme.
    AlreadyPartitioned { stream_id: u64 },
    /// A transform was applied to a stream whose source operator no longer
    /// exists (e.g. it was already consumed by a previous `__register`-style
    /// call and should have produced a fresh stream instead).
    DanglingStream { stream_id: u64 },
    /// `set_parallelism` was called with `0`.
    ZeroParallelism { stream_id: u64 },
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderError::AlreadyPartitioned { stream_id } => write!(
                f,
                "stream {} already has a pending partitioning scheme",
                stream_id
            ),
            BuilderError::DanglingStream { stream_id } => {
                write!(f, "stream {} does not point at a live operator", stream_id)
            }
            BuilderError::ZeroParallelism { stream_id } => write!(
                f,
                "set_parallelism(0) requested for the operator producing stream {}",
                stream_id
            ),
        }
    }
}

impl Error for BuilderError {}

/// Raised by [`crate::node::environment::Environment::execute`] before any
/// worker is deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The graph contains an operator kind the compiler refuses to run.
    UnsupportedOperatorKind { op_id: OperatorId, kind: OperatorKind },
    /// An operator was configured with `num_instances == 0`.
    ZeroParallelism { op_id: OperatorId },
    /// A Sink operator (or any non-source operator) is not reachable from
    /// any Source.
    DisconnectedOperator { op_id: OperatorId },
    /// The logical graph contains a cycle.
    Cycle,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnsupportedOperatorKind { op_id, kind } => write!(
                f,
                "operator {:?} (id {}) is not supported by the compiler",
                kind, op_id
            ),
            CompileError::ZeroParallelism { op_id } => {
                write!(f, "operator {} has zero parallelism", op_id)
            }
            CompileError::DisconnectedOperator { op_id } => write!(
                f,
                "operator {} is not reachable from any source",
                op_id
            ),
            CompileError::Cycle => write!(f, "the logical graph contains a cycle"),
        }
    }
}

impl Error for CompileError {}

/// Raised at runtime when a partitioner misbehaves: returns an empty
/// partition set, or an index outside `[0, N)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingError {
    pub task_id: TaskId,
    pub reason: String,
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} failed to route a record: {}",
            self.task_id, self.reason
        )
    }
}

impl Error for RoutingError {}

/// Raised when a user-supplied callback panics or returns an error.
#[derive(Debug, Clone)]
pub struct UserError {
    pub task_id: TaskId,
    pub record_debug: String,
    pub message: String,
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} user function failed on record {}: {}",
            self.task_id, self.record_debug, self.message
        )
    }
}

impl Error for UserError {}

/// Raised by [`crate::communication::channel::DataChannel`] on misuse
/// (sending after EOS) or by an external
/// [`crate::communication::transport::QueueTransport`] collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A send was attempted after the channel already emitted EOS.
    Closed,
    /// The paired endpoint was dropped without an orderly EOS.
    Disconnected,
    /// The external transport collaborator reported a failure.
    Transport(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "channel is closed"),
            ChannelError::Disconnected => write!(f, "channel endpoint disconnected"),
            ChannelError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl Error for ChannelError {}

/// The error reported by the coordinator when a job fails after `start()`.
/// Aggregates the failing task and the underlying cause.
#[derive(Debug)]
pub struct JobError {
    pub task_id: TaskId,
    pub cause: Box<dyn Error + Send + Sync>,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job failed at task {}: {}", self.task_id, self.cause)
    }
}

impl Error for JobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

impl JobError {
    pub fn new(task_id: TaskId, cause: impl Error + Send + Sync + 'static) -> Self {
        Self {
            task_id,
            cause: Box::new(cause),
        }
    }
}
