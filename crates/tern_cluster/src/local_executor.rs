//! In-process execution of tasks whose placements live on this node.
//!
//! The goal is to skip the network round-trip a node would otherwise make to
//! itself: tasks that target local shards are re-parsed from their query
//! text and handed straight to the single-node engine. Remote tasks, and the
//! remote copies of replicated writes, are returned to the caller for the
//! distributed executor. Local tasks run one at a time, in input order.

use tern_common::config::{LocalExecutionConfig, LoggingConfig};
use tern_common::datum::{OwnedRow, ParamList};
use tern_common::error::{ExecutionError, TernResult};
use tern_common::node::NodeRegistry;
use tern_common::plan::{DistributedPlan, Task};
use tern_common::redaction::redact_command;
use tern_common::types::DataType;
use tern_common::TernError;
use tern_txn::TxnExecutionContext;

use crate::guard::LocalExecutionGuard;
use crate::locality::{TaskLocalityClassifier, TaskSplit};

/// Destination for result rows, shared between local and remote execution
/// so the caller sees one merged stream.
pub trait TupleSink {
    fn push(&mut self, row: OwnedRow) -> TernResult<()>;
}

/// In-memory tuple store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleStore {
    rows: Vec<OwnedRow>,
}

impl TupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[OwnedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<OwnedRow> {
        self.rows
    }
}

impl TupleSink for TupleStore {
    fn push(&mut self, row: OwnedRow) -> TernResult<()> {
        self.rows.push(row);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Select,
    Insert,
    Update,
    Delete,
}

/// The single-node query engine, as seen by the local executor.
///
/// Planning goes through the engine's own planner so node-local policy
/// (hooks, optimizer settings) applies to shard queries as well.
pub trait LocalQueryEngine {
    type Plan;

    /// Parse and plan `query` with the statement's parameter types.
    fn plan(&self, query: &str, param_types: &[Option<DataType>]) -> TernResult<Self::Plan>;

    fn command_type(&self, plan: &Self::Plan) -> CommandType;

    /// Run `plan` to completion, writing any returned rows to `sink`.
    /// Returns the number of rows the command processed.
    fn execute(
        &self,
        plan: Self::Plan,
        params: &ParamList,
        sink: &mut dyn TupleSink,
    ) -> TernResult<u64>;
}

/// Outcome of [`LocalExecutor::execute_local_tasks`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalExecutionOutcome {
    pub executed_any: bool,
    /// Rows affected by modifying local tasks; reads contribute nothing.
    pub rows_processed: u64,
    /// Tasks left for the distributed executor.
    pub remote_tasks: Vec<Task>,
}

/// Split executor: classifies a plan's tasks and runs the local half here.
pub struct LocalExecutor<'a, E: LocalQueryEngine> {
    engine: &'a E,
    registry: &'a dyn NodeRegistry,
    config: &'a LocalExecutionConfig,
    logging: &'a LoggingConfig,
}

impl<'a, E: LocalQueryEngine> LocalExecutor<'a, E> {
    pub fn new(
        engine: &'a E,
        registry: &'a dyn NodeRegistry,
        config: &'a LocalExecutionConfig,
        logging: &'a LoggingConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            config,
            logging,
        }
    }

    pub fn classifier(&self) -> TaskLocalityClassifier {
        TaskLocalityClassifier::new(self.registry.local_group_id())
    }

    pub fn guard(&self) -> LocalExecutionGuard<'a> {
        LocalExecutionGuard::new(self.config, self.registry.local_group_id())
    }

    pub fn should_execute_locally(&self, ctx: &TxnExecutionContext, plan: &DistributedPlan) -> bool {
        self.guard().should_execute_locally(ctx, plan)
    }

    pub fn classify_tasks(&self, tasks: &[Task], read_only: bool) -> TernResult<TaskSplit> {
        self.classifier().classify(tasks, read_only)
    }

    /// Execute every local task of `plan` and hand back the remote ones.
    pub fn execute_local_tasks(
        &self,
        ctx: &mut TxnExecutionContext,
        plan: &DistributedPlan,
        params: &ParamList,
        sink: &mut dyn TupleSink,
    ) -> TernResult<LocalExecutionOutcome> {
        let split = self.classify_tasks(&plan.task_list, plan.is_read_only())?;
        tern_observability::record_task_split(split.local_tasks.len(), split.remote_tasks.len());

        let rows_processed = self.run_local_tasks(ctx, &split.local_tasks, params, sink)?;

        Ok(LocalExecutionOutcome {
            executed_any: split.has_local(),
            rows_processed,
            remote_tasks: split.remote_tasks,
        })
    }

    /// Run `tasks` sequentially through the single-node engine.
    ///
    /// Any planning or execution failure aborts the whole batch; the error is
    /// propagated as-is and nothing is retried here.
    pub fn run_local_tasks(
        &self,
        ctx: &mut TxnExecutionContext,
        tasks: &[Task],
        params: &ParamList,
        sink: &mut dyn TupleSink,
    ) -> TernResult<u64> {
        if tasks.is_empty() {
            return Ok(0);
        }

        ctx.ensure_local_execution_allowed()?;
        ctx.mark_local_execution(tasks.len());

        let param_types = params.param_types();
        let mut total_rows_processed = 0u64;

        for task in tasks {
            let plan = self
                .engine
                .plan(&task.query_string, &param_types)
                .map_err(|e| planning_error(task, e))?;

            self.log_local_command(&task.query_string);

            let command = self.engine.command_type(&plan);
            let processed = self
                .engine
                .execute(plan, params, sink)
                .inspect_err(|e| {
                    tracing::debug!(task_id = task.task_id.0, error = %e, "local task failed");
                })?;

            // Rows returned by reads already went to the sink.
            if command != CommandType::Select {
                total_rows_processed += processed;
            }
        }

        tern_observability::record_local_tasks(tasks.len(), total_rows_processed);
        Ok(total_rows_processed)
    }

    fn log_local_command(&self, command: &str) {
        if !self.config.should_log_local_commands() {
            return;
        }
        tracing::info!(
            "executing the command locally: {}",
            redact_command(command, self.logging.redact_literals)
        );
    }
}

fn planning_error(task: &Task, err: TernError) -> TernError {
    match err {
        TernError::Execution(ExecutionError::Engine {
            sqlstate, message, ..
        }) => ExecutionError::Planning {
            task_id: task.task_id,
            query: task.query_string.clone(),
            sqlstate,
            message,
        }
        .into(),
        other => other,
    }
}
