//! The fluent `DataStream` builder API.
//!
//! Grounded on Ray Streaming's `DataStream.__register`/`__partition`/
//! `__expand`: a partitioning selector (`shuffle()`, `broadcast()`, ...)
//! doesn't mutate an edge that already exists - it sets a *pending* scheme
//! on the stream handle, which the next transform call consumes when it
//! registers the edge leading to its new downstream operator. The
//! doc-comment voice follows erdos's `ingest_stream.rs`.
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::config::Configuration;
use crate::dataflow::graph::{Edge, LogicalGraph};
use crate::dataflow::operator::{
    KeySelectorFn, OperatorId, OperatorKind, OperatorLogic, OperatorMetadata, ReduceFn, RuntimeContext,
    SinkFn, SourceFn,
};
use crate::dataflow::record::{Data, Keyed, Record};
use crate::errors::{BuilderError, UserError};
use crate::node::environment::Environment;
use crate::partition::PartitionScheme;

/// A handle to one operator's output. Every transform method consumes
/// `self` and returns a new `DataStream` over the freshly-registered
/// downstream operator, mirroring erdos's own `OperatorStream<D>`
/// handles.
pub struct DataStream<T> {
    operator_id: OperatorId,
    /// Set by `shuffle()`/`broadcast()`/... and consumed by the next
    /// transform call's `register()`. `None` means "use this operator
    /// kind's own default" (`Forward` for most, `ShuffleByKey` for the
    /// edge leaving a `KeyBy`).
    pending_scheme: Option<PartitionScheme>,
    _marker: PhantomData<T>,
}

impl<T> Clone for DataStream<T> {
    fn clone(&self) -> Self {
        DataStream {
            operator_id: self.operator_id,
            pending_scheme: self.pending_scheme.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> DataStream<T> {
    fn fresh(operator_id: OperatorId) -> Self {
        DataStream { operator_id, pending_scheme: None, _marker: PhantomData }
    }
}

/// The driver-facing coordinator: accumulates a [`LogicalGraph`] through
/// [`DataStream`] calls, then compiles and deploys it with
/// [`Environment::execute`].
pub struct Builder {
    graph: LogicalGraph,
    config: Configuration,
}

impl Builder {
    pub fn new(config: Configuration) -> Self {
        Builder { graph: LogicalGraph::new(), config }
    }

    /// Registers a `Source` operator driven by a polling callback, one
    /// instance per the builder's default parallelism.
    pub fn source<T: Data>(&mut self, name: &str, generator: impl SourceFn + 'static) -> DataStream<T> {
        let id = self.graph.next_operator_id();
        self.graph.insert_operator(OperatorMetadata {
            id,
            kind: OperatorKind::Source,
            name: name.to_string(),
            parallelism: self.config.default_parallelism,
            logic: OperatorLogic::Source(Arc::new(Mutex::new(generator))),
            state_hook: None,
        });
        DataStream::fresh(id)
    }

    /// Registers a `ReadTextFile` source that emits one `String` record per
    /// line of the named file.
    pub fn read_text_file(&mut self, path: impl Into<String>) -> DataStream<String> {
        let id = self.graph.next_operator_id();
        self.graph.insert_operator(OperatorMetadata {
            id,
            kind: OperatorKind::ReadTextFile,
            name: "read_text_file".to_string(),
            parallelism: 1,
            logic: OperatorLogic::ReadTextFile { path: path.into().into() },
            state_hook: None,
        });
        DataStream::fresh(id)
    }

    pub fn graph(&self) -> &LogicalGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut LogicalGraph {
        &mut self.graph
    }

    /// Compiles and deploys the accumulated graph.
    pub async fn execute(self) -> Result<crate::node::environment::JobHandle, crate::errors::CompileError> {
        let mut env = Environment::new(self.config);
        env.graph = self.graph;
        env.execute().await
    }
}

impl<T: Data> DataStream<T> {
    /// Registers a new downstream operator and the edge leading to it,
    /// consuming `self`'s pending scheme if one was set, else falling back
    /// to `default_scheme` (the operator kind's own natural default).
    fn register(
        self,
        builder: &mut Builder,
        kind: OperatorKind,
        name: &str,
        logic: OperatorLogic,
        default_scheme: PartitionScheme,
    ) -> Result<OperatorId, BuilderError> {
        self.register_with_hook(builder, kind, name, logic, default_scheme, None)
    }

    /// Like [`DataStream::register`], but also attaches an optional
    /// [`StateHook`] to the new operator's metadata. Only `sum()` exposes
    /// this to callers today, but the field lives on every operator kind
    /// per the data model.
    fn register_with_hook(
        self,
        builder: &mut Builder,
        kind: OperatorKind,
        name: &str,
        logic: OperatorLogic,
        default_scheme: PartitionScheme,
        state_hook: Option<Arc<dyn crate::dataflow::operator::StateHook>>,
    ) -> Result<OperatorId, BuilderError> {
        if builder.graph.operator(self.operator_id).is_none() {
            return Err(BuilderError::DanglingStream { stream_id: self.operator_id });
        }
        let scheme = self.pending_scheme.unwrap_or(default_scheme);
        let id = builder.graph.next_operator_id();
        builder.graph.insert_operator(OperatorMetadata {
            id,
            kind,
            name: name.to_string(),
            parallelism: builder.config.default_parallelism,
            logic,
            state_hook,
        });
        builder.graph.insert_edge(Edge { from: self.operator_id, to: id, scheme });
        Ok(id)
    }

    pub fn map<U: Data>(
        self,
        builder: &mut Builder,
        name: &str,
        f: impl Fn(&Record, &RuntimeContext) -> Result<Vec<Record>, UserError> + Send + Sync + 'static,
    ) -> Result<DataStream<U>, BuilderError> {
        let id = self.register(builder, OperatorKind::Map, name, OperatorLogic::Map(Arc::new(f)), PartitionScheme::forward())?;
        Ok(DataStream::fresh(id))
    }

    pub fn flat_map<U: Data>(
        self,
        builder: &mut Builder,
        name: &str,
        f: impl Fn(&Record, &RuntimeContext) -> Result<Vec<Record>, UserError> + Send + Sync + 'static,
    ) -> Result<DataStream<U>, BuilderError> {
        let id = self.register(
            builder,
            OperatorKind::FlatMap,
            name,
            OperatorLogic::FlatMap(Arc::new(f)),
            PartitionScheme::forward(),
        )?;
        Ok(DataStream::fresh(id))
    }

    pub fn filter(
        self,
        builder: &mut Builder,
        name: &str,
        f: impl Fn(&Record, &RuntimeContext) -> Result<Vec<Record>, UserError> + Send + Sync + 'static,
    ) -> Result<DataStream<T>, BuilderError> {
        let id = self.register(
            builder,
            OperatorKind::Filter,
            name,
            OperatorLogic::Filter(Arc::new(f)),
            PartitionScheme::forward(),
        )?;
        Ok(DataStream::fresh(id))
    }

    pub fn inspect(
        self,
        builder: &mut Builder,
        name: &str,
        f: impl Fn(&Record, &RuntimeContext) -> Result<Vec<Record>, UserError> + Send + Sync + 'static,
    ) -> Result<DataStream<T>, BuilderError> {
        let id = self.register(
            builder,
            OperatorKind::Inspect,
            name,
            OperatorLogic::Inspect(Arc::new(f)),
            PartitionScheme::forward(),
        )?;
        Ok(DataStream::fresh(id))
    }

    /// Partitions the stream by a projected key. The outgoing edge from
    /// this operator defaults to `ShuffleByKey`, matching
    /// `DataStream.key_by`'s effective default in the original system: a
    /// keyed stream is, by construction, meant to colocate equal keys.
    pub fn key_by<K: Data>(
        self,
        builder: &mut Builder,
        name: &str,
        selector: impl KeySelectorFn + 'static,
    ) -> Result<DataStream<Keyed<K, T>>, BuilderError> {
        let id = self.register(
            builder,
            OperatorKind::KeyBy,
            name,
            OperatorLogic::KeyBy(Arc::new(selector)),
            PartitionScheme::shuffle_by_key(),
        )?;
        Ok(DataStream::fresh(id))
    }

    pub fn reduce(
        self,
        builder: &mut Builder,
        name: &str,
        f: impl ReduceFn + 'static,
    ) -> Result<DataStream<T>, BuilderError> {
        let id = self.register(
            builder,
            OperatorKind::Reduce,
            name,
            OperatorLogic::Reduce(Arc::new(f)),
            PartitionScheme::forward(),
        )?;
        Ok(DataStream::fresh(id))
    }

    /// `state_hook`, if given, is registered with the worker handle at task
    /// init (see [`crate::dataflow::operator::StateHook`]); no checkpoint
    /// algorithm is implemented here, this is a hook point only.
    pub fn sum(
        self,
        builder: &mut Builder,
        name: &str,
        field: impl KeySelectorFn + 'static,
        state_hook: Option<Arc<dyn crate::dataflow::operator::StateHook>>,
    ) -> Result<DataStream<T>, BuilderError> {
        let id = self.register_with_hook(
            builder,
            OperatorKind::Sum,
            name,
            OperatorLogic::Sum { field: Arc::new(field) },
            PartitionScheme::forward(),
            state_hook,
        )?;
        Ok(DataStream::fresh(id))
    }

    /// Registers a terminal `Sink` operator. Returns the operator id rather
    /// than a further `DataStream`, since a sink has no outgoing edge.
    pub fn sink(
        self,
        builder: &mut Builder,
        name: &str,
        f: impl SinkFn + 'static,
    ) -> Result<OperatorId, BuilderError> {
        self.register(builder, OperatorKind::Sink, name, OperatorLogic::Sink(Arc::new(f)), PartitionScheme::forward())
    }

    /// Sets the scheme the *next* transform's incoming edge will use.
    /// Exactly one pending scheme may be set between two transform calls;
    /// a second call before the next `map`/`key_by`/`sink`/... is a
    /// [`BuilderError::AlreadyPartitioned`].
    fn with_pending_scheme(mut self, scheme: PartitionScheme) -> Result<Self, BuilderError> {
        if self.pending_scheme.is_some() {
            return Err(BuilderError::AlreadyPartitioned { stream_id: self.operator_id });
        }
        self.pending_scheme = Some(scheme);
        Ok(self)
    }

    pub fn shuffle(self) -> Result<Self, BuilderError> {
        self.with_pending_scheme(PartitionScheme::shuffle())
    }

    /// Routes by the record's key hash rather than its payload hash.
    /// `key_by` already attaches this to its own outgoing edge by default;
    /// this selector exists for attaching it explicitly to any other edge
    /// (e.g. re-partitioning a `Keyed` stream before a plain `map`).
    pub fn shuffle_by_key(self) -> Result<Self, BuilderError> {
        self.with_pending_scheme(PartitionScheme::shuffle_by_key())
    }

    pub fn broadcast(self) -> Result<Self, BuilderError> {
        self.with_pending_scheme(PartitionScheme::broadcast())
    }

    pub fn rescale(self) -> Result<Self, BuilderError> {
        self.with_pending_scheme(PartitionScheme::rescale())
    }

    pub fn round_robin(self) -> Result<Self, BuilderError> {
        self.with_pending_scheme(PartitionScheme::round_robin())
    }

    pub fn partition(self, strategy: impl crate::partition::CustomPartitionFn + 'static) -> Result<Self, BuilderError> {
        self.with_pending_scheme(PartitionScheme::custom(strategy))
    }

    pub fn set_parallelism(self, builder: &mut Builder, parallelism: usize) -> Result<Self, BuilderError> {
        if parallelism == 0 {
            return Err(BuilderError::ZeroParallelism { stream_id: self.operator_id });
        }
        if let Some(meta) = builder.graph.operator_mut(self.operator_id) {
            meta.parallelism = parallelism;
        }
        Ok(self)
    }
}
