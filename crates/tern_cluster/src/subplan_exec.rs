//! Materializes the subplans of a distributed plan before its top-level
//! tasks run.
//!
//! Each subplan's output is written to the nodes whose tasks read it and, on
//! the coordinator, to a local file the coordinator can read back. Nested
//! subplans are materialized before the subplan that contains them.

use std::cell::Cell;
use std::collections::BTreeSet;

use tern_common::config::IntermediateResultConfig;
use tern_common::error::{ExecutionError, TernResult};
use tern_common::node::{resolve_nodes, NodeRegistry};
use tern_common::plan::{DistributedPlan, DistributedSubPlan};
use tern_common::types::{DistributedTxnId, NodeId, PlanId};
use tern_txn::{TxnExecutionContext, TxnSummary};

use crate::local_executor::TupleSink;
use crate::placement_tracker::IntermediateResultPlacements;
use crate::result_dest::{
    DestinationStats, IntermediateResultDestination, LocalResultStore, ResultTransport,
};

/// Runs a plan and streams its result rows into a sink. Implemented by the
/// distributed executor, which may in turn use the local executor.
pub trait SubPlanRunner {
    fn execute_plan_into(
        &self,
        plan: &DistributedPlan,
        ctx: &mut TxnExecutionContext,
        dest: &mut dyn TupleSink,
    ) -> TernResult<()>;
}

pub struct SubplanExecutor<'a> {
    registry: &'a dyn NodeRegistry,
    transport: &'a dyn ResultTransport,
    local_store: &'a dyn LocalResultStore,
    config: &'a IntermediateResultConfig,
    depth: Cell<u32>,
}

/// Decrements the nesting depth when a level is left, including on error.
struct DepthGuard<'c> {
    depth: &'c Cell<u32>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl<'a> SubplanExecutor<'a> {
    pub fn new(
        registry: &'a dyn NodeRegistry,
        transport: &'a dyn ResultTransport,
        local_store: &'a dyn LocalResultStore,
        config: &'a IntermediateResultConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            local_store,
            config,
            depth: Cell::new(0),
        }
    }

    /// Current nesting depth. Zero outside `execute_sub_plans`.
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    /// Execute every subplan of `plan`, in planner order, writing each result
    /// to its consumers. Any failure aborts the remaining subplans.
    pub fn execute_sub_plans(
        &self,
        ctx: &mut TxnExecutionContext,
        plan: &DistributedPlan,
        runner: &dyn SubPlanRunner,
    ) -> TernResult<()> {
        if plan.sub_plans.is_empty() {
            return Ok(());
        }

        let placements = IntermediateResultPlacements::for_plan_tree(plan);
        // Results are stored under the distributed transaction id.
        let txn = ctx.begin_or_continue_coordinated();

        self.execute_level(ctx, plan, &placements, txn, runner)
    }

    /// Remove the local copies written for a finished transaction. A
    /// transaction that never materialized a subplan has nothing to remove.
    pub fn release_results(&self, summary: &TxnSummary) -> TernResult<()> {
        match summary.distributed_txn_id {
            Some(txn) => {
                tracing::debug!(txn = %txn, "removing intermediate results");
                self.local_store.remove_transaction(txn)
            }
            None => Ok(()),
        }
    }

    fn enter(&self) -> TernResult<DepthGuard<'_>> {
        let depth = self.depth.get() + 1;
        if depth > self.config.max_subplan_depth {
            return Err(ExecutionError::SubPlanDepthExceeded {
                depth,
                max_depth: self.config.max_subplan_depth,
            }
            .into());
        }
        self.depth.set(depth);
        Ok(DepthGuard { depth: &self.depth })
    }

    fn execute_level(
        &self,
        ctx: &mut TxnExecutionContext,
        plan: &DistributedPlan,
        placements: &IntermediateResultPlacements,
        txn: DistributedTxnId,
        runner: &dyn SubPlanRunner,
    ) -> TernResult<()> {
        let _level = self.enter()?;

        for sub_plan in &plan.sub_plans {
            if !sub_plan.plan.sub_plans.is_empty() {
                self.execute_level(ctx, &sub_plan.plan, placements, txn, runner)?;
            }
            self.materialize(ctx, plan.plan_id, sub_plan, placements, txn, runner)?;
        }
        Ok(())
    }

    fn materialize(
        &self,
        ctx: &mut TxnExecutionContext,
        parent_plan_id: PlanId,
        sub_plan: &DistributedSubPlan,
        placements: &IntermediateResultPlacements,
        txn: DistributedTxnId,
        runner: &dyn SubPlanRunner,
    ) -> TernResult<DestinationStats> {
        let result_id = sub_plan.result_id(parent_plan_id);

        let mut node_ids: BTreeSet<NodeId> = placements.nodes_for(&result_id).clone();
        if let Some(targets) = &sub_plan.target_nodes {
            node_ids.extend(targets.iter().copied());
        }
        let nodes = resolve_nodes(self.registry, &node_ids);
        let write_local_file = self.registry.is_coordinator();

        tracing::debug!(
            result_id = %result_id,
            depth = self.depth.get(),
            nodes = nodes.len(),
            write_local_file,
            "materializing subplan"
        );

        let mut dest = IntermediateResultDestination::open(
            txn,
            result_id.clone(),
            &nodes,
            write_local_file,
            self.transport,
            self.local_store,
            self.config,
        )?;
        runner.execute_plan_into(&sub_plan.plan, ctx, &mut dest)?;
        let stats = dest.finish()?;

        tern_observability::record_subplan_materialized(
            stats.bytes,
            stats.remote_nodes.len(),
            stats.wrote_local_file,
        );
        tracing::debug!(
            result_id = %result_id,
            rows = stats.rows,
            bytes = stats.bytes,
            "subplan materialized"
        );
        Ok(stats)
    }
}
