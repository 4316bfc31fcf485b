//! Computes, for every intermediate result in a plan tree, the set of nodes
//! whose tasks read it, so each result is shipped only where it is consumed.

use std::collections::{BTreeSet, HashMap};

use tern_common::plan::{walk_plan_tree, DistributedPlan, PlanNode, PlanVisitor};
use tern_common::types::{NodeId, ResultId};

static NO_NODES: BTreeSet<NodeId> = BTreeSet::new();

/// `result id -> consumer nodes`. Contributions are unioned, so rebuilding
/// from the same plan tree is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntermediateResultPlacements {
    entries: HashMap<ResultId, BTreeSet<NodeId>>,
}

impl IntermediateResultPlacements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `plan` and every nested subplan.
    pub fn for_plan_tree(plan: &DistributedPlan) -> Self {
        let mut placements = Self::new();
        placements.record_plan_tree(plan);
        placements
    }

    /// Union the consumers found in `plan`'s tree into this map.
    pub fn record_plan_tree(&mut self, plan: &DistributedPlan) {
        walk_plan_tree(plan, &mut ConsumerCollector { placements: self });
    }

    /// Nodes that read `result_id`. Empty means: materialize locally only.
    pub fn nodes_for(&self, result_id: &ResultId) -> &BTreeSet<NodeId> {
        self.entries.get(result_id).unwrap_or(&NO_NODES)
    }

    pub fn contains(&self, result_id: &ResultId) -> bool {
        self.entries.contains_key(result_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResultId, &BTreeSet<NodeId>)> {
        self.entries.iter()
    }

    fn register(&mut self, result_id: ResultId) {
        self.entries.entry(result_id).or_default();
    }

    fn add_consumers<I>(&mut self, result_id: &ResultId, nodes: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        self.entries
            .entry(result_id.clone())
            .or_default()
            .extend(nodes);
    }
}

struct ConsumerCollector<'m> {
    placements: &'m mut IntermediateResultPlacements,
}

impl PlanVisitor for ConsumerCollector<'_> {
    fn visit(&mut self, node: PlanNode<'_>) {
        // Every produced result gets an entry, even if nothing reads it.
        if let Some(produced) = node.produced_result() {
            self.placements.register(produced);
        }

        let plan = node.plan();
        if plan.used_result_ids.is_empty() {
            return;
        }

        let consumers: BTreeSet<NodeId> = plan
            .task_list
            .iter()
            .flat_map(|task| task.placements.iter().map(|p| p.node_id))
            .collect();

        for result_id in &plan.used_result_ids {
            self.placements
                .add_consumers(result_id, consumers.iter().copied());
            tracing::trace!(
                plan_id = plan.plan_id.0,
                result_id = %result_id,
                consumers = consumers.len(),
                "recorded intermediate result consumers"
            );
        }
    }
}
