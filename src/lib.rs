//! The core of a distributed streaming dataflow runtime: a logical-graph
//! builder, a physical-graph compiler, and the worker execution model that
//! runs the compiled graph on top of in-process, backpressured channels.
//!
//! Layout follows the job's own lifecycle:
//! - [`dataflow`] - `DataStream`/`Builder` (the fluent logical-graph API),
//!   `LogicalGraph`, `Record`, and operator metadata.
//! - [`partition`] - the partitioning strategies routing records across an
//!   edge's downstream instances.
//! - [`communication`] - the in-process `DataChannel` and the external
//!   queue-transport contract.
//! - [`node`] - the physical-graph compiler and the worker/coordinator
//!   runtime built on top of it.
//! - [`config`] / [`logging`] / [`errors`] - the ambient stack shared by
//!   every stage above.

pub mod communication;
pub mod config;
pub mod dataflow;
pub mod errors;
pub mod logging;
pub mod node;
pub mod partition;

pub use config::Configuration;
pub use dataflow::{Builder, Data, DataStream, Keyed, Record, StateHook, WorkerHandle};
pub use errors::{BuilderError, ChannelError, CompileError, JobError, RoutingError, UserError};
pub use node::environment::{Environment, JobHandle};
