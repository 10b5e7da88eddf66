//! The coordinator: turns a frozen [`LogicalGraph`] into a running job.
//!
//! Grounded on Ray Streaming's `Environment.execute` (builds the execution
//! graph, then submits every actor before returning) and erdos's
//! `WorkerHandle::register`/`submit` register-then-submit two-phase
//! rollout, generalized here into the same shape: `init` awaits every
//! task's ack before any task is allowed to observe input, `start` then
//! hands back live execution handles.
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Configuration;
use crate::dataflow::graph::LogicalGraph;
use crate::errors::{CompileError, JobError};
use crate::node::physical::{compile, PhysicalGraph};
use crate::node::worker::run_task;

/// A running job: one [`JoinHandle`] per physical task, each resolving to
/// `Ok(())` on clean EOS shutdown or `Err(JobError)` on task failure.
pub struct JobHandle {
    pub task_handles: Vec<JoinHandle<Result<(), JobError>>>,
}

impl JobHandle {
    /// Awaits every task, returning the first failure observed (if any).
    /// Mirrors erdos's `WorkerHandle::shutdown` join-all behavior.
    pub async fn join(self) -> Result<(), JobError> {
        let mut first_error = None;
        for handle in self.task_handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(join_err) => {
                    first_error.get_or_insert(JobError::new(
                        0,
                        std::io::Error::other(join_err.to_string()),
                    ));
                }
            };
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Owns the [`LogicalGraph`] under construction and drives compilation and
/// deployment. One `Environment` per job, matching erdos's
/// one-leader-per-job model.
pub struct Environment {
    pub(crate) graph: LogicalGraph,
    config: Configuration,
}

impl Environment {
    /// Does not install a `tracing` subscriber: that choice is left to the
    /// embedding application. Call [`crate::logging::init_tracing`]
    /// yourself first if you want one installed from `config.logging_level`.
    pub fn new(config: Configuration) -> Self {
        Environment { graph: LogicalGraph::new(), config }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Compiles the accumulated logical graph and deploys every physical
    /// task as a tokio task.
    ///
    /// Two-phase rollout:
    /// - **init**: every task instance is spawned and acknowledges it has
    ///   taken ownership of its channels before any task is allowed to
    ///   start consuming input.
    /// - **start**: the coordinator releases every task to run and returns
    ///   their join handles.
    pub async fn execute(self) -> Result<JobHandle, CompileError> {
        let physical: PhysicalGraph = compile(&self.graph, self.config.channel_capacity)?;
        info!(tasks = physical.tasks.len(), "compiled physical graph");

        let mut ack_receivers = Vec::with_capacity(physical.tasks.len());
        let mut release_senders = Vec::with_capacity(physical.tasks.len());
        let mut task_handles = Vec::with_capacity(physical.tasks.len());

        for physical_task in physical.tasks {
            let op_id = physical_task.task.operator_id;
            let op_meta = self
                .graph
                .operator(op_id)
                .expect("physical task must reference a known logical operator");
            let logic = op_meta.logic.clone();
            let state_hook = op_meta.state_hook.clone();

            let (ack_tx, ack_rx) = oneshot::channel::<()>();
            let (release_tx, release_rx) = oneshot::channel::<()>();
            ack_receivers.push(ack_rx);
            release_senders.push(release_tx);

            let handle = tokio::spawn(async move {
                let _ = ack_tx.send(());
                let _ = release_rx.await;
                run_task(physical_task, logic, state_hook).await
            });
            task_handles.push(handle);
        }

        // init: wait for every task to register before releasing any of them.
        for ack in ack_receivers {
            let _ = ack.await;
        }
        info!("all tasks registered; starting job");

        // start: release every task to begin consuming input.
        for release in release_senders {
            let _ = release.send(());
        }

        Ok(JobHandle { task_handles })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::dataflow::operator::{KeySelectorFn, OperatorKind, OperatorLogic, OperatorMetadata, RecordFn};
    use crate::dataflow::record::Record;
    use crate::partition::PartitionScheme;

    struct OnceSource(Option<i64>);
    impl crate::dataflow::operator::SourceFn for OnceSource {
        fn call(
            &mut self,
            _ctx: &crate::dataflow::operator::RuntimeContext,
        ) -> Result<Option<Record>, crate::errors::UserError> {
            Ok(self.0.take().map(Record::new))
        }
    }

    fn double() -> impl RecordFn {
        |record: &Record, _ctx: &crate::dataflow::operator::RuntimeContext| {
            let value = *record.downcast_ref::<i64>().unwrap();
            Ok(vec![Record::new(value * 2)])
        }
    }

    fn double_field() -> impl KeySelectorFn {
        |record: &Record, _ctx: &crate::dataflow::operator::RuntimeContext| {
            let value = *record.downcast_ref::<i64>().unwrap();
            Ok(Record::new(value * 2))
        }
    }

    #[tokio::test]
    async fn a_source_and_a_map_run_to_completion() {
        let mut env = Environment::new(Configuration::new());
        let source_id = env.graph.next_operator_id();
        let map_id = env.graph.next_operator_id();

        env.graph.insert_operator(OperatorMetadata {
            id: source_id,
            kind: OperatorKind::Source,
            name: "source".to_string(),
            parallelism: 1,
            logic: OperatorLogic::Source(std::sync::Arc::new(std::sync::Mutex::new(OnceSource(Some(21))))),
            state_hook: None,
        });
        env.graph.insert_operator(OperatorMetadata {
            id: map_id,
            kind: OperatorKind::Map,
            name: "double".to_string(),
            parallelism: 1,
            logic: OperatorLogic::Map(std::sync::Arc::new(double())),
            state_hook: None,
        });
        env.graph.insert_edge(crate::dataflow::graph::Edge {
            from: source_id,
            to: map_id,
            scheme: PartitionScheme::forward(),
        });

        let job = env.execute().await.unwrap();
        job.join().await.unwrap();
    }

    #[tokio::test]
    async fn state_hook_is_registered_once_at_init() {
        use crate::dataflow::operator::{StateHook, WorkerHandle};

        let registered: Arc<Mutex<Vec<WorkerHandle>>> = Arc::new(Mutex::new(Vec::new()));
        let registered_for_hook = Arc::clone(&registered);
        let hook: Arc<dyn StateHook> = Arc::new(move |handle: WorkerHandle| {
            registered_for_hook.lock().unwrap().push(handle);
        });

        let mut env = Environment::new(Configuration::new());
        let source_id = env.graph.next_operator_id();
        let sum_id = env.graph.next_operator_id();

        env.graph.insert_operator(OperatorMetadata {
            id: source_id,
            kind: OperatorKind::Source,
            name: "source".to_string(),
            parallelism: 1,
            logic: OperatorLogic::Source(std::sync::Arc::new(std::sync::Mutex::new(OnceSource(Some(21))))),
            state_hook: None,
        });
        env.graph.insert_operator(OperatorMetadata {
            id: sum_id,
            kind: OperatorKind::Sum,
            name: "sum".to_string(),
            parallelism: 1,
            logic: OperatorLogic::Sum { field: std::sync::Arc::new(double_field()) },
            state_hook: Some(hook),
        });
        env.graph.insert_edge(crate::dataflow::graph::Edge {
            from: source_id,
            to: sum_id,
            scheme: PartitionScheme::forward(),
        });

        let job = env.execute().await.unwrap();
        job.join().await.unwrap();

        let calls = registered.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operator_id, sum_id);
        assert_eq!(calls[0].task_index, 0);
        assert_eq!(calls[0].parallelism, 1);
    }
}
