//! End-to-end locality test
//!
//! Scenario A — Split by locality:
//!   1. Read-only plan {T1: local, T2: remote} → T1 local, T2 remote
//!   2. Replicated write {T3: local + remote} → local copy and remote copy
//!
//! Scenario B — Guard and sticky transaction state:
//!   1. Fresh transaction, single local task → local
//!   2. Same plan after a remote connection → remote
//!   3. After local execution every later plan stays local until commit
//!
//! Scenario C — Subplans on the coordinator:
//!   1. Results reach exactly the consuming nodes
//!   2. An unconsumed result still gets a local file
//!   3. Oversized results abort the statement
//!
//! Run: cargo test -p tern_cluster --test locality_e2e

use std::cell::RefCell;

use tern_cluster::{
    CommandType, DirectoryResultStore, IntermediateResultPlacements, LocalExecutor,
    LocalQueryEngine, MemoryResultStore, SubPlanRunner, SubplanExecutor, TaskLocalityClassifier,
    TupleSink, TupleStore,
};
use tern_common::config::TernConfig;
use tern_common::datum::{Datum, OwnedRow, ParamList};
use tern_common::error::{ExecutionError, TernResult};
use tern_common::node::{NodeDescriptor, StaticNodeRegistry};
use tern_common::plan::{DistributedPlan, DistributedSubPlan, ModifyLevel, Placement, Task};
use tern_common::types::*;
use tern_txn::{ConnectionMode, TxnCoordinator, TxnExecutionContext};

// ── Helpers ──────────────────────────────────────────────────────────────────

const WORKER_CONFIG: &str = r#"
[node]
local_group_id = 1

[local_execution]
enable_local_execution = true
log_local_commands = true

[intermediate_results]
max_intermediate_result_kb = 1
"#;

fn cluster(local: NodeGroupId) -> StaticNodeRegistry {
    StaticNodeRegistry::with_nodes(
        local,
        (1..=3).map(|i| NodeDescriptor::new(NodeId(i), NodeGroupId(i as i32), format!("worker-{i}"), 5432)),
    )
}

fn task(id: u32, query: &str, groups: &[i32], level: ModifyLevel) -> Task {
    let placements = groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            Placement::new(
                PlacementId(u64::from(id) * 100 + i as u64),
                ShardId(u64::from(id)),
                NodeGroupId(*g),
                NodeId(*g as u32),
            )
        })
        .collect();
    Task::new(TaskId(id), query, placements, level)
}

fn placement_ids(tasks: &[Task]) -> Vec<PlacementId> {
    let mut ids: Vec<_> = tasks
        .iter()
        .flat_map(|t| t.placements.iter().map(|p| p.placement_id))
        .collect();
    ids.sort();
    ids
}

/// Single-node engine stand-in: every statement processes one row.
#[derive(Default)]
struct OneRowEngine {
    statements: RefCell<Vec<String>>,
}

impl LocalQueryEngine for OneRowEngine {
    type Plan = String;

    fn plan(&self, query: &str, _param_types: &[Option<DataType>]) -> TernResult<String> {
        Ok(query.to_string())
    }

    fn command_type(&self, plan: &String) -> CommandType {
        if plan.starts_with("SELECT") {
            CommandType::Select
        } else {
            CommandType::Insert
        }
    }

    fn execute(&self, plan: String, _params: &ParamList, sink: &mut dyn TupleSink) -> TernResult<u64> {
        if plan.starts_with("SELECT") {
            sink.push(OwnedRow::new(vec![Datum::Text(plan.clone())]))?;
        }
        self.statements.borrow_mut().push(plan);
        Ok(1)
    }
}

/// Produces `rows` rows of `width` bytes for every subplan.
struct FixedRowsRunner {
    rows: usize,
    width: usize,
}

impl SubPlanRunner for FixedRowsRunner {
    fn execute_plan_into(
        &self,
        _plan: &DistributedPlan,
        _ctx: &mut TxnExecutionContext,
        dest: &mut dyn TupleSink,
    ) -> TernResult<()> {
        for _ in 0..self.rows {
            dest.push(OwnedRow::new(vec![Datum::Text("x".repeat(self.width))]))?;
        }
        Ok(())
    }
}

// ── Scenario A ───────────────────────────────────────────────────────────────

#[test]
fn test_read_only_plan_splits_by_locality() {
    let classifier = TaskLocalityClassifier::new(NodeGroupId(1));
    let tasks = vec![
        task(1, "SELECT 1", &[1], ModifyLevel::ReadOnly),
        task(2, "SELECT 2", &[2], ModifyLevel::ReadOnly),
    ];
    let split = classifier.classify(&tasks, true).unwrap();
    assert_eq!(split.local_tasks, vec![tasks[0].clone()]);
    assert_eq!(split.remote_tasks, vec![tasks[1].clone()]);
}

#[test]
fn test_replicated_write_gets_local_and_remote_copies() {
    let classifier = TaskLocalityClassifier::new(NodeGroupId(1));
    let tasks = vec![task(3, "INSERT 3", &[1, 2], ModifyLevel::Modify)];
    let split = classifier.classify(&tasks, false).unwrap();

    assert_eq!(split.local_tasks.len(), 1);
    assert_eq!(split.remote_tasks.len(), 1);
    assert_eq!(split.local_tasks[0].placements[0].group_id, NodeGroupId(1));
    assert_eq!(split.remote_tasks[0].placements[0].group_id, NodeGroupId(2));

    let mut out = split.local_tasks.clone();
    out.extend(split.remote_tasks.clone());
    assert_eq!(placement_ids(&out), placement_ids(&tasks));
}

#[test]
fn test_reference_table_read_stays_local() {
    let classifier = TaskLocalityClassifier::new(NodeGroupId(1));
    let tasks = vec![task(4, "SELECT 4", &[1, 2, 3], ModifyLevel::ReadOnly)];
    let split = classifier.classify(&tasks, true).unwrap();
    assert_eq!(split.local_tasks.len(), 1);
    assert!(split.remote_tasks.is_empty());
    assert_eq!(placement_ids(&split.local_tasks).len(), 1);
}

// ── Scenario B ───────────────────────────────────────────────────────────────

#[test]
fn test_worker_transaction_flow() {
    let config = TernConfig::from_toml_str(WORKER_CONFIG).unwrap();
    config.validate().unwrap();
    let registry = cluster(config.node.local_group_id());
    let engine = OneRowEngine::default();
    let executor = LocalExecutor::new(&engine, &registry, &config.local_execution, &config.logging);
    let coordinator = TxnCoordinator::new(config.node.local_group_id());

    let single_local = DistributedPlan::new(
        PlanId(1),
        ModifyLevel::ReadOnly,
        vec![task(1, "SELECT 1", &[1], ModifyLevel::ReadOnly)],
    );
    let multi = DistributedPlan::new(
        PlanId(2),
        ModifyLevel::Modify,
        vec![
            task(1, "INSERT 1", &[1], ModifyLevel::Modify),
            task(2, "INSERT 2", &[2], ModifyLevel::Modify),
        ],
    );

    // A remote round-trip already happened: stay remote.
    let mut ctx = coordinator.begin();
    ctx.record_connection_access(NodeGroupId(2), ConnectionMode::Sequential)
        .unwrap();
    assert!(!executor.should_execute_locally(&ctx, &single_local));
    coordinator.abort(ctx, "client rollback");

    let mut ctx = coordinator.begin();
    assert!(executor.should_execute_locally(&ctx, &single_local));
    assert!(!executor.should_execute_locally(&ctx, &multi));

    let mut rows = TupleStore::new();
    let outcome = executor
        .execute_local_tasks(&mut ctx, &single_local, &ParamList::empty(), &mut rows)
        .unwrap();
    assert!(outcome.executed_any);
    assert!(outcome.remote_tasks.is_empty());
    assert_eq!(rows.len(), 1);

    // Sticky: the multi-task write is now local too.
    assert!(executor.should_execute_locally(&ctx, &multi));
    let outcome = executor
        .execute_local_tasks(&mut ctx, &multi, &ParamList::empty(), &mut rows)
        .unwrap();
    assert_eq!(outcome.rows_processed, 1);
    assert_eq!(outcome.remote_tasks.len(), 1);
    assert_eq!(*engine.statements.borrow(), vec!["SELECT 1".to_string(), "INSERT 1".into()]);

    let summary = coordinator.commit(ctx);
    assert_eq!(summary.local_tasks_executed, 2);

    let stats = coordinator.stats();
    assert_eq!(stats.total_begun, 2);
    assert_eq!(stats.total_committed, 1);
    assert_eq!(stats.total_aborted, 1);

    let ctx = coordinator.begin();
    assert!(!executor.should_execute_locally(&ctx, &multi));
}

// ── Scenario C ───────────────────────────────────────────────────────────────

fn statement_with_sub_plans() -> (DistributedPlan, ResultId, ResultId) {
    let consumed = ResultId::generate(PlanId(10), SubPlanId(1));
    let unconsumed = ResultId::generate(PlanId(10), SubPlanId(2));

    // Two consumers of 10_1: the top-level plan on {1,2} and a later
    // subplan on {2,3}.
    let reader = DistributedPlan::new(
        PlanId(12),
        ModifyLevel::ReadOnly,
        vec![
            task(5, "SELECT 5", &[2], ModifyLevel::ReadOnly),
            task(6, "SELECT 6", &[3], ModifyLevel::ReadOnly),
        ],
    )
    .with_used_results(vec![consumed.clone()]);
    let producer = DistributedPlan::new(
        PlanId(11),
        ModifyLevel::ReadOnly,
        vec![task(4, "SELECT 4", &[3], ModifyLevel::ReadOnly)],
    );

    let top = DistributedPlan::new(
        PlanId(10),
        ModifyLevel::ReadOnly,
        vec![
            task(1, "SELECT 1", &[1], ModifyLevel::ReadOnly),
            task(2, "SELECT 2", &[2], ModifyLevel::ReadOnly),
        ],
    )
    .with_used_results(vec![consumed.clone()])
    .with_sub_plans(vec![
        DistributedSubPlan::new(SubPlanId(1), producer),
        DistributedSubPlan::new(SubPlanId(2), reader),
    ]);
    (top, consumed, unconsumed)
}

#[test]
fn test_placement_tracker_is_union_and_idempotent() {
    let (top, consumed, unconsumed) = statement_with_sub_plans();
    let placements = IntermediateResultPlacements::for_plan_tree(&top);

    let expected = [NodeId(1), NodeId(2), NodeId(3)].into_iter().collect();
    assert_eq!(placements.nodes_for(&consumed), &expected);
    assert!(placements.nodes_for(&unconsumed).is_empty());

    let mut again = placements.clone();
    again.record_plan_tree(&top);
    assert_eq!(again, placements);
}

#[test]
fn test_coordinator_materializes_to_consumers_and_local_file() {
    let registry = cluster(NodeGroupId::COORDINATOR);
    let transport = MemoryResultStore::new();
    let dir = tempfile::tempdir().unwrap();
    let mut config = TernConfig::default();
    config.intermediate_results.result_dir = dir.path().display().to_string();
    let files = DirectoryResultStore::new(&config.intermediate_results.result_dir);

    let executor = SubplanExecutor::new(&registry, &transport, &files, &config.intermediate_results);
    let coordinator = TxnCoordinator::new(NodeGroupId::COORDINATOR);
    let mut ctx = coordinator.begin();

    let (top, consumed, unconsumed) = statement_with_sub_plans();
    executor
        .execute_sub_plans(&mut ctx, &top, &FixedRowsRunner { rows: 3, width: 8 })
        .unwrap();

    let txn = ctx.distributed_txn_id().unwrap();
    assert_eq!(
        transport.nodes_holding(&consumed),
        [NodeId(1), NodeId(2), NodeId(3)].into_iter().collect()
    );
    assert!(transport.nodes_holding(&unconsumed).is_empty());

    // Both results have a local copy, including the one nobody reads.
    assert_eq!(files.read_result(txn, &consumed).unwrap().len(), 3);
    assert_eq!(files.read_result(txn, &unconsumed).unwrap().len(), 3);

    let summary = coordinator.commit(ctx);
    assert_eq!(summary.distributed_txn_id, Some(txn));
    executor.release_results(&summary).unwrap();
    assert!(!files.transaction_dir(txn).exists());
}

#[test]
fn test_oversized_result_aborts_statement() {
    let config = TernConfig::from_toml_str(WORKER_CONFIG).unwrap();
    let registry = cluster(NodeGroupId::COORDINATOR);
    let store = MemoryResultStore::new();
    let executor = SubplanExecutor::new(&registry, &store, &store, &config.intermediate_results);
    let mut ctx = TxnCoordinator::new(NodeGroupId::COORDINATOR).begin();

    let (top, _, _) = statement_with_sub_plans();
    let err = executor
        .execute_sub_plans(&mut ctx, &top, &FixedRowsRunner { rows: 4, width: 300 })
        .unwrap_err();

    assert!(matches!(
        err,
        tern_common::TernError::Execution(ExecutionError::ResultSizeExceeded { limit_kb: 1, .. })
    ));
    assert_eq!(store.result_count(), 0);
}
