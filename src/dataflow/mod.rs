//! Functions and structures for building a streaming dataflow job:
//! the logical graph, its operators, its records, and the fluent
//! `DataStream` builder layered on top of all three.

pub mod builder;
pub mod graph;
pub mod operator;
pub mod record;

pub use builder::{Builder, DataStream};
pub use operator::{OperatorId, OperatorKind, RuntimeContext, StateHook, WorkerHandle};
pub use record::{Data, Keyed, Record};
