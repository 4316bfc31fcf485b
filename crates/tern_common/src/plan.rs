//! Distributed plan model handed over by the planner.
//!
//! Everything here is owned by the planner and read-only to the executor.
//! The only derived values the executor produces are task copies with a
//! restricted placement list (see [`Task::with_placements`]).

use serde::{Deserialize, Serialize};

use crate::types::{NodeGroupId, NodeId, PlacementId, PlanId, ResultId, ShardId, SubPlanId, TaskId};

/// Where a shard (or a copy of an intermediate result) physically resides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub placement_id: PlacementId,
    pub shard_id: ShardId,
    pub group_id: NodeGroupId,
    pub node_id: NodeId,
}

impl Placement {
    pub fn new(
        placement_id: PlacementId,
        shard_id: ShardId,
        group_id: NodeGroupId,
        node_id: NodeId,
    ) -> Self {
        Self {
            placement_id,
            shard_id,
            group_id,
            node_id,
        }
    }

    pub fn is_on_group(&self, group_id: NodeGroupId) -> bool {
        self.group_id == group_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModifyLevel {
    #[default]
    ReadOnly,
    Modify,
}

/// One shard-scoped unit of query execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub query_string: String,
    /// More than one entry only for replicated objects (reference tables)
    /// and intermediate results.
    pub placements: Vec<Placement>,
    pub modify_level: ModifyLevel,
}

impl Task {
    pub fn new(
        task_id: TaskId,
        query_string: impl Into<String>,
        placements: Vec<Placement>,
        modify_level: ModifyLevel,
    ) -> Self {
        Self {
            task_id,
            query_string: query_string.into(),
            placements,
            modify_level,
        }
    }

    pub fn modifies_data(&self) -> bool {
        self.modify_level == ModifyLevel::Modify
    }

    /// Copy of this task restricted to `placements`. The original is untouched.
    pub fn with_placements(&self, placements: Vec<Placement>) -> Task {
        Task {
            task_id: self.task_id,
            query_string: self.query_string.clone(),
            placements,
            modify_level: self.modify_level,
        }
    }
}

/// Top-level or nested distributed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedPlan {
    pub plan_id: PlanId,
    pub modify_level: ModifyLevel,
    /// The worker job.
    pub task_list: Vec<Task>,
    /// Already ordered by dependency: a later subplan may read an earlier one.
    pub sub_plans: Vec<DistributedSubPlan>,
    /// Intermediate results referenced by this plan's own query tree.
    pub used_result_ids: Vec<ResultId>,
}

impl DistributedPlan {
    pub fn new(plan_id: PlanId, modify_level: ModifyLevel, task_list: Vec<Task>) -> Self {
        Self {
            plan_id,
            modify_level,
            task_list,
            sub_plans: Vec::new(),
            used_result_ids: Vec::new(),
        }
    }

    pub fn with_sub_plans(mut self, sub_plans: Vec<DistributedSubPlan>) -> Self {
        self.sub_plans = sub_plans;
        self
    }

    pub fn with_used_results(mut self, used_result_ids: Vec<ResultId>) -> Self {
        self.used_result_ids = used_result_ids;
        self
    }

    /// A plan is read-only when neither its modify level nor any of its
    /// tasks modifies data.
    pub fn is_read_only(&self) -> bool {
        self.modify_level == ModifyLevel::ReadOnly && !self.task_list.iter().any(Task::modifies_data)
    }
}

/// A nested plan whose output is materialized as a named intermediate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedSubPlan {
    pub sub_plan_id: SubPlanId,
    pub plan: DistributedPlan,
    /// Nodes the planner explicitly wants the result shipped to, if any.
    pub target_nodes: Option<Vec<NodeId>>,
}

impl DistributedSubPlan {
    pub fn new(sub_plan_id: SubPlanId, plan: DistributedPlan) -> Self {
        Self {
            sub_plan_id,
            plan,
            target_nodes: None,
        }
    }

    pub fn with_target_nodes(mut self, nodes: Vec<NodeId>) -> Self {
        self.target_nodes = Some(nodes);
        self
    }

    /// Name under which this subplan's output is stored, given its parent plan.
    pub fn result_id(&self, parent_plan_id: PlanId) -> ResultId {
        ResultId::generate(parent_plan_id, self.sub_plan_id)
    }
}

/// The closed set of node kinds found in a distributed plan tree.
#[derive(Debug, Clone, Copy)]
pub enum PlanNode<'a> {
    TopLevel(&'a DistributedPlan),
    SubPlan {
        parent_plan_id: PlanId,
        sub_plan: &'a DistributedSubPlan,
    },
}

impl<'a> PlanNode<'a> {
    /// The plan whose task list and result references this node carries.
    pub fn plan(&self) -> &'a DistributedPlan {
        match self {
            PlanNode::TopLevel(plan) => plan,
            PlanNode::SubPlan { sub_plan, .. } => &sub_plan.plan,
        }
    }

    /// Result this node materializes, if it is a subplan.
    pub fn produced_result(&self) -> Option<ResultId> {
        match self {
            PlanNode::TopLevel(_) => None,
            PlanNode::SubPlan {
                parent_plan_id,
                sub_plan,
            } => Some(sub_plan.result_id(*parent_plan_id)),
        }
    }
}

pub trait PlanVisitor {
    fn visit(&mut self, node: PlanNode<'_>);
}

/// Visit `plan` and every subplan beneath it, transitively, parents first.
pub fn walk_plan_tree<V: PlanVisitor + ?Sized>(plan: &DistributedPlan, visitor: &mut V) {
    visitor.visit(PlanNode::TopLevel(plan));
    walk_sub_plans(plan, visitor);
}

fn walk_sub_plans<V: PlanVisitor + ?Sized>(plan: &DistributedPlan, visitor: &mut V) {
    for sub_plan in &plan.sub_plans {
        visitor.visit(PlanNode::SubPlan {
            parent_plan_id: plan.plan_id,
            sub_plan,
        });
        walk_sub_plans(&sub_plan.plan, visitor);
    }
}
