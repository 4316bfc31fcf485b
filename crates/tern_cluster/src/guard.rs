//! Per-transaction decision on whether a plan should use local execution.

use tern_common::config::LocalExecutionConfig;
use tern_common::plan::DistributedPlan;
use tern_common::types::NodeGroupId;
use tern_txn::TxnExecutionContext;

use crate::locality::TaskLocalityClassifier;

/// Why local execution was or was not chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalExecutionDecision {
    /// Disabled by configuration or for the current transaction.
    Disabled,
    /// The coordinator holds no shard data.
    Coordinator,
    /// Tasks already ran locally in this transaction; later statements must
    /// keep using the session's own connection.
    ContinueLocal,
    /// Single task with a local placement and no prior remote access.
    SingleLocalTask,
    /// Single local task, but a connection already touched placements in this
    /// transaction; switching to local now would break visibility.
    RemoteAlreadyAccessed,
    /// Single task without a local placement.
    NoLocalPlacement,
    /// Multi-task plans keep their parallelism on the remote path.
    MultiTask,
}

impl LocalExecutionDecision {
    pub fn is_local(self) -> bool {
        matches!(
            self,
            LocalExecutionDecision::ContinueLocal | LocalExecutionDecision::SingleLocalTask
        )
    }
}

/// Advisory only: a positive answer means the caller should route the plan
/// through the split executor, which still derives the actual partition.
#[derive(Debug, Clone, Copy)]
pub struct LocalExecutionGuard<'a> {
    config: &'a LocalExecutionConfig,
    local_group_id: NodeGroupId,
}

impl<'a> LocalExecutionGuard<'a> {
    pub fn new(config: &'a LocalExecutionConfig, local_group_id: NodeGroupId) -> Self {
        Self {
            config,
            local_group_id,
        }
    }

    pub fn decide(&self, ctx: &TxnExecutionContext, plan: &DistributedPlan) -> LocalExecutionDecision {
        if !self.config.enable_local_execution || ctx.local_execution_disabled() {
            return LocalExecutionDecision::Disabled;
        }

        if self.local_group_id.is_coordinator() {
            return LocalExecutionDecision::Coordinator;
        }

        if ctx.local_execution_happened() {
            return LocalExecutionDecision::ContinueLocal;
        }

        match plan.task_list.as_slice() {
            [task] => {
                let classifier = TaskLocalityClassifier::new(self.local_group_id);
                if !classifier.task_accesses_local_node(task) {
                    LocalExecutionDecision::NoLocalPlacement
                } else if ctx.any_connection_accessed_placements() {
                    LocalExecutionDecision::RemoteAlreadyAccessed
                } else {
                    LocalExecutionDecision::SingleLocalTask
                }
            }
            _ => LocalExecutionDecision::MultiTask,
        }
    }

    pub fn should_execute_locally(&self, ctx: &TxnExecutionContext, plan: &DistributedPlan) -> bool {
        let decision = self.decide(ctx, plan);
        tracing::trace!(plan_id = plan.plan_id.0, ?decision, "local execution decision");
        tern_observability::record_local_execution_decision(decision.is_local());
        decision.is_local()
    }
}
