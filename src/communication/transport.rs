//! The external queue-transport contract: traits an out-of-core
//! transport implementation must satisfy to plug a job's input/output into
//! something other than this crate's own in-process [`crate::communication::channel::DataChannel`].
//!
//! Grounded verbatim on Ray Streaming's `queue_interface.py`
//! (`QueueProducer`, `QueueConsumer`, `OperatorType`, `ReliabilityLevel`,
//! `QueueItem`/`QueueMessage`). `async-trait` is already used this way in
//! erdos's `stream_manager.rs`, so these traits are expressed the same way
//! rather than as a hand-rolled boxed-future interface.
use async_trait::async_trait;

use crate::errors::ChannelError;

/// Where an operator instance sits in the pipeline, as seen by the
/// transport layer: a `Source` only produces, a `Sink` only consumes, a
/// `Transform` does both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorType {
    Source,
    Transform,
    Sink,
}

/// Delivery guarantee requested of the transport. The core itself makes no
/// promises about these beyond passing the request through; honoring them
/// is the transport implementation's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReliabilityLevel {
    AtLeastOnce,
    ExactlyOnce,
    ExactlySame,
}

/// One message handed to a [`QueueProducer`]: an opaque byte payload plus
/// the timestamp it was produced at (transport-assigned sequencing, not a
/// dataflow watermark).
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub body: Vec<u8>,
    pub timestamp: u64,
}

/// One message delivered by a [`QueueConsumer`]: the payload plus the id of
/// the queue (i.e. the upstream channel) it arrived on.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub queue_id: String,
    pub body: Vec<u8>,
}

/// The producing half of an external transport channel.
#[async_trait]
pub trait QueueProducer: Send + Sync {
    async fn produce(&mut self, queue_id: &str, item: QueueItem) -> Result<(), ChannelError>;
    async fn stop(&mut self) -> Result<(), ChannelError>;
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// The consuming half of an external transport channel.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Pulls the next message, waiting up to `timeout_millis`. Returns
    /// `Ok(None)` on timeout, not an error: a transport with nothing ready
    /// is not a failure.
    async fn pull(&mut self, timeout_millis: u64) -> Result<Option<QueueMessage>, ChannelError>;
    async fn stop(&mut self) -> Result<(), ChannelError>;
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Constructs the producer/consumer pair for one task instance. A host
/// process wires a concrete implementation of this trait into
/// [`crate::node::environment::Environment`] in place of the built-in
/// in-process channels when it needs cross-host delivery.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn make_producer(
        &self,
        operator_type: OperatorType,
        reliability: ReliabilityLevel,
    ) -> Result<Box<dyn QueueProducer>, ChannelError>;

    async fn make_consumer(
        &self,
        operator_type: OperatorType,
        reliability: ReliabilityLevel,
    ) -> Result<Box<dyn QueueConsumer>, ChannelError>;
}
