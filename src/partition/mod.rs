//! Partitioning strategies: the routing function `(record, N) -> [usize]`.
//!
//! Grounded on Ray Streaming's `partition.py` (`BroadcastPartition`,
//! `KeyPartition`, `RoundRobinPartition`, `SimplePartition`,
//! `load_partition`), translated into owned, thread-confined Rust values
//! instead of Python objects shared by reference.
use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::dataflow::record::Record;
use crate::errors::RoutingError;
use crate::node::physical::TaskId;

/// A user-supplied custom routing function: `(record, N) -> partition indices`.
pub trait CustomPartitionFn: Send + Sync {
    fn call(&self, record: &Record, num_partitions: usize) -> Vec<usize>;
}

impl<F> CustomPartitionFn for F
where
    F: Fn(&Record, usize) -> Vec<usize> + Send + Sync,
{
    fn call(&self, record: &Record, num_partitions: usize) -> Vec<usize> {
        self(record, num_partitions)
    }
}

/// The partitioning strategy chosen for a logical edge. Carries the optional
/// user closure for `Custom`.
#[derive(Clone)]
pub enum PartitionStrategy {
    Forward,
    Shuffle,
    ShuffleByKey,
    Broadcast,
    Rescale,
    RoundRobin,
    Custom(Arc<dyn CustomPartitionFn>),
}

impl PartialEq for PartitionStrategy {
    /// Mirrors the `Debug` impl below: two `Custom` variants compare equal
    /// regardless of the wrapped closure, since closures have no value
    /// equality of their own.
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Debug for PartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStrategy::Forward => write!(f, "Forward"),
            PartitionStrategy::Shuffle => write!(f, "Shuffle"),
            PartitionStrategy::ShuffleByKey => write!(f, "ShuffleByKey"),
            PartitionStrategy::Broadcast => write!(f, "Broadcast"),
            PartitionStrategy::Rescale => write!(f, "Rescale"),
            PartitionStrategy::RoundRobin => write!(f, "RoundRobin"),
            PartitionStrategy::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// `(strategy, optional user_fn)` attached to a logical edge. The user_fn is
/// folded into `PartitionStrategy::Custom` itself; this wrapper exists so the
/// builder and compiler have a single named type to pass around.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionScheme {
    pub strategy: PartitionStrategy,
}

impl PartitionScheme {
    pub fn forward() -> Self {
        PartitionScheme { strategy: PartitionStrategy::Forward }
    }
    pub fn shuffle() -> Self {
        PartitionScheme { strategy: PartitionStrategy::Shuffle }
    }
    pub fn shuffle_by_key() -> Self {
        PartitionScheme { strategy: PartitionStrategy::ShuffleByKey }
    }
    pub fn broadcast() -> Self {
        PartitionScheme { strategy: PartitionStrategy::Broadcast }
    }
    pub fn rescale() -> Self {
        PartitionScheme { strategy: PartitionStrategy::Rescale }
    }
    pub fn round_robin() -> Self {
        PartitionScheme { strategy: PartitionStrategy::RoundRobin }
    }
    pub fn custom(f: impl CustomPartitionFn + 'static) -> Self {
        PartitionScheme { strategy: PartitionStrategy::Custom(Arc::new(f)) }
    }
}

/// A stateful, thread-confined routing instance. The physical graph compiler
/// constructs one `Partitioner` per upstream task instance per outgoing
/// edge, so `RoundRobin`'s counter and `Broadcast`'s memoized vector are
/// never shared between two tasks.
pub trait Partitioner: Send {
    /// Routes `record` to a (non-empty) subset of `[0, num_partitions)`.
    fn partition(&mut self, record: &Record, num_partitions: usize) -> Result<Vec<usize>, RoutingError>;
}

/// Builds the runtime [`Partitioner`] for a given scheme. One instance is
/// built per (task, outgoing edge) pair at worker init.
pub fn build_partitioner(scheme: &PartitionScheme) -> Box<dyn Partitioner> {
    match &scheme.strategy {
        PartitionStrategy::Forward => Box::new(ForwardPartitioner),
        PartitionStrategy::Shuffle => Box::new(ShufflePartitioner),
        PartitionStrategy::ShuffleByKey => Box::new(ShuffleByKeyPartitioner),
        PartitionStrategy::Broadcast => Box::new(BroadcastPartitioner::default()),
        PartitionStrategy::Rescale => Box::new(RoundRobinPartitioner::default()),
        PartitionStrategy::RoundRobin => Box::new(RoundRobinPartitioner::default()),
        PartitionStrategy::Custom(f) => Box::new(CustomPartitioner { f: Arc::clone(f) }),
    }
}

/// Forward always addresses the single channel materialized for it by the
/// compiler: wiring is decided once at channel-construction time, not
/// re-evaluated per record.
struct ForwardPartitioner;
impl Partitioner for ForwardPartitioner {
    fn partition(&mut self, _record: &Record, num_partitions: usize) -> Result<Vec<usize>, RoutingError> {
        debug_assert!(num_partitions <= 1, "a Forward output group must have exactly one channel");
        Ok(vec![0])
    }
}

struct ShufflePartitioner;
impl Partitioner for ShufflePartitioner {
    fn partition(&mut self, record: &Record, num_partitions: usize) -> Result<Vec<usize>, RoutingError> {
        Ok(vec![(record.payload_hash() as usize) % num_partitions])
    }
}

struct ShuffleByKeyPartitioner;
impl Partitioner for ShuffleByKeyPartitioner {
    fn partition(&mut self, record: &Record, num_partitions: usize) -> Result<Vec<usize>, RoutingError> {
        let hash = record.key_hash().ok_or_else(|| RoutingError {
            task_id: 0,
            reason: "ShuffleByKey requires a KeyedRecord, got a plain record".to_string(),
        })?;
        Ok(vec![(hash as usize) % num_partitions])
    }
}

#[derive(Default)]
struct BroadcastPartitioner {
    memo: Vec<usize>,
}
impl Partitioner for BroadcastPartitioner {
    fn partition(&mut self, _record: &Record, num_partitions: usize) -> Result<Vec<usize>, RoutingError> {
        if self.memo.len() != num_partitions {
            self.memo = (0..num_partitions).collect();
        }
        Ok(self.memo.clone())
    }
}

/// Also used for `Rescale`: the compiler already narrows the output group's
/// channel list down to the upstream instance's assigned contiguous range,
/// so round-robin over the local group size reproduces "round-robin within
/// the group" without the partitioner needing to know about the global
/// downstream parallelism.
#[derive(Default)]
struct RoundRobinPartitioner {
    counter: usize,
}
impl Partitioner for RoundRobinPartitioner {
    fn partition(&mut self, _record: &Record, num_partitions: usize) -> Result<Vec<usize>, RoutingError> {
        let idx = self.counter % num_partitions;
        self.counter = self.counter.wrapping_add(1);
        Ok(vec![idx])
    }
}

struct CustomPartitioner {
    f: Arc<dyn CustomPartitionFn>,
}
impl Partitioner for CustomPartitioner {
    fn partition(&mut self, record: &Record, num_partitions: usize) -> Result<Vec<usize>, RoutingError> {
        let indices = self.f.call(record, num_partitions);
        if indices.is_empty() {
            return Err(RoutingError {
                task_id: 0,
                reason: "custom partitioner returned no partitions".to_string(),
            });
        }
        if let Some(bad) = indices.iter().find(|&&i| i >= num_partitions) {
            return Err(RoutingError {
                task_id: 0,
                reason: format!(
                    "custom partitioner returned out-of-range index {} (num_partitions = {})",
                    bad, num_partitions
                ),
            });
        }
        Ok(indices)
    }
}

/// Stamps a [`RoutingError`] produced by a [`Partitioner`] with the task that
/// observed it, since partitioners themselves don't know their own task id.
pub fn attribute_to_task(mut err: RoutingError, task_id: TaskId) -> RoutingError {
    err.task_id = task_id;
    err
}

/// The wire format for a partitioner: exactly one of
/// `blob`, `class`, `function` is set. `blob` carries an inline serialized
/// closure (opaque to this crate - resolved by a caller-supplied decoder);
/// `class`/`function` name a symbol resolved through a [`PartitionerRegistry`]
/// since Rust has no `importlib.import_module` equivalent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartitionerSpec {
    pub blob: Option<Vec<u8>>,
    pub module: Option<String>,
    pub class: Option<String>,
    pub function: Option<String>,
}

/// Resolves `(module, symbol)` references from a [`PartitionerSpec`] into a
/// constructed [`PartitionScheme`]. Populated by the host process ahead of
/// time; this is the Rust-native analogue of Python's `importlib`.
pub trait PartitionerRegistry: Send + Sync {
    /// Resolves a zero-argument class constructor registered under
    /// `module.class`, producing a ready-made, stateful scheme (e.g. a
    /// bespoke `Broadcast`-like strategy).
    fn resolve_class(&self, module: &str, class: &str) -> Option<PartitionScheme>;
    /// Resolves a plain routing function registered under
    /// `module.function`, wrapped as `PartitionStrategy::Custom`.
    fn resolve_function(&self, module: &str, function: &str) -> Option<Arc<dyn CustomPartitionFn>>;
    /// Decodes an inline serialized closure blob into a routing function.
    fn decode_blob(&self, blob: &[u8]) -> Option<Arc<dyn CustomPartitionFn>>;
}

/// Errors produced while decoding a [`PartitionerSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// None, or more than one, of `blob`/`class`/`function` was set.
    AmbiguousSpec,
    /// The named symbol wasn't found in the registry.
    UnknownSymbol(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::AmbiguousSpec => {
                write!(f, "exactly one of blob/class/function must be set")
            }
            DecodeError::UnknownSymbol(sym) => write!(f, "unknown partitioner symbol: {}", sym),
        }
    }
}
impl std::error::Error for DecodeError {}

/// Decode rule: blob takes priority, then class (zero-arg constructor),
/// then function (wrapped as Custom).
pub fn decode_partitioner_spec(
    spec: &PartitionerSpec,
    registry: &dyn PartitionerRegistry,
) -> Result<PartitionScheme, DecodeError> {
    let set_count = [spec.blob.is_some(), spec.class.is_some(), spec.function.is_some()]
        .iter()
        .filter(|x| **x)
        .count();
    if set_count != 1 {
        return Err(DecodeError::AmbiguousSpec);
    }

    if let Some(blob) = &spec.blob {
        let f = registry
            .decode_blob(blob)
            .ok_or_else(|| DecodeError::UnknownSymbol("<blob>".to_string()))?;
        return Ok(PartitionScheme { strategy: PartitionStrategy::Custom(f) });
    }

    let module = spec.module.clone().unwrap_or_default();
    if let Some(class) = &spec.class {
        return registry
            .resolve_class(&module, class)
            .ok_or_else(|| DecodeError::UnknownSymbol(format!("{}.{}", module, class)));
    }

    let function = spec.function.as_ref().expect("exactly one of blob/class/function is set");
    let f = registry
        .resolve_function(&module, function)
        .ok_or_else(|| DecodeError::UnknownSymbol(format!("{}.{}", module, function)))?;
    Ok(PartitionScheme { strategy: PartitionStrategy::Custom(f) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::record::Record;

    #[test]
    fn broadcast_yields_full_permutation_and_is_memoized() {
        let mut p = BroadcastPartitioner::default();
        let record = Record::new(1i64);
        let first = p.partition(&record, 3).unwrap();
        assert_eq!(first, vec![0, 1, 2]);
        let second = p.partition(&record, 3).unwrap();
        assert_eq!(second, vec![0, 1, 2]);
    }

    #[test]
    fn round_robin_advances_deterministically_from_zero() {
        let mut p = RoundRobinPartitioner::default();
        let record = Record::new(1i64);
        let seq: Vec<usize> = (0..8)
            .map(|_| p.partition(&record, 4).unwrap()[0])
            .collect();
        assert_eq!(seq, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn shuffle_by_key_is_deterministic_for_same_key_and_n() {
        let mut p1 = ShuffleByKeyPartitioner;
        let mut p2 = ShuffleByKeyPartitioner;
        let record = Record::keyed("hello".to_string(), 1i64);
        assert_eq!(
            p1.partition(&record, 7).unwrap(),
            p2.partition(&record, 7).unwrap()
        );
    }

    #[test]
    fn shuffle_by_key_rejects_unkeyed_records() {
        let mut p = ShuffleByKeyPartitioner;
        let record = Record::new(1i64);
        assert!(p.partition(&record, 4).is_err());
    }

    #[test]
    fn custom_rejects_empty_and_out_of_range() {
        let mut empty = CustomPartitioner { f: Arc::new(|_: &Record, _: usize| vec![]) };
        let mut oob = CustomPartitioner { f: Arc::new(|_: &Record, n: usize| vec![n]) };
        let record = Record::new(1i64);
        assert!(empty.partition(&record, 4).is_err());
        assert!(oob.partition(&record, 4).is_err());
    }

    #[test]
    fn decode_spec_requires_exactly_one_field() {
        struct EmptyRegistry;
        impl PartitionerRegistry for EmptyRegistry {
            fn resolve_class(&self, _: &str, _: &str) -> Option<PartitionScheme> { None }
            fn resolve_function(&self, _: &str, _: &str) -> Option<Arc<dyn CustomPartitionFn>> { None }
            fn decode_blob(&self, _: &[u8]) -> Option<Arc<dyn CustomPartitionFn>> { None }
        }
        let spec = PartitionerSpec::default();
        assert_eq!(
            decode_partitioner_spec(&spec, &EmptyRegistry),
            Err(DecodeError::AmbiguousSpec)
        );
    }
}
