use std::sync::atomic::{AtomicU64, Ordering};

use tern_common::types::{DistributedTxnId, NodeGroupId, TxnId};

use crate::context::TxnExecutionContext;

/// Outcome of a completed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOutcome {
    Committed,
    Aborted(String),
}

/// What a finished transaction did, returned when its context is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnSummary {
    pub txn_id: TxnId,
    pub outcome: TxnOutcome,
    pub local_execution_happened: bool,
    pub local_tasks_executed: u64,
    pub distributed_txn_id: Option<DistributedTxnId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnStatsSnapshot {
    pub total_begun: u64,
    pub total_committed: u64,
    pub total_aborted: u64,
    pub with_local_execution: u64,
}

/// Owns the lifecycle of transaction execution contexts on one node.
pub struct TxnCoordinator {
    local_group_id: NodeGroupId,
    next_txn_id: AtomicU64,
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    with_local_execution: AtomicU64,
}

impl TxnCoordinator {
    pub fn new(local_group_id: NodeGroupId) -> Self {
        Self {
            local_group_id,
            next_txn_id: AtomicU64::new(1),
            begun: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            with_local_execution: AtomicU64::new(0),
        }
    }

    pub fn local_group_id(&self) -> NodeGroupId {
        self.local_group_id
    }

    /// Start a transaction with a clear local execution state.
    pub fn begin(&self) -> TxnExecutionContext {
        let txn_id = TxnId(self.next_txn_id.fetch_add(1, Ordering::Relaxed));
        self.begun.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(txn_id = txn_id.0, "begin");
        TxnExecutionContext::new(txn_id, self.local_group_id)
    }

    pub fn commit(&self, ctx: TxnExecutionContext) -> TxnSummary {
        self.committed.fetch_add(1, Ordering::Relaxed);
        self.finish(ctx, TxnOutcome::Committed)
    }

    pub fn abort(&self, ctx: TxnExecutionContext, reason: impl Into<String>) -> TxnSummary {
        self.aborted.fetch_add(1, Ordering::Relaxed);
        self.finish(ctx, TxnOutcome::Aborted(reason.into()))
    }

    fn finish(&self, ctx: TxnExecutionContext, outcome: TxnOutcome) -> TxnSummary {
        if ctx.local_execution_happened() {
            self.with_local_execution.fetch_add(1, Ordering::Relaxed);
        }
        let summary = TxnSummary {
            txn_id: ctx.txn_id(),
            outcome,
            local_execution_happened: ctx.local_execution_happened(),
            local_tasks_executed: ctx.local_tasks_executed(),
            distributed_txn_id: ctx.distributed_txn_id(),
        };
        tracing::trace!(
            txn_id = summary.txn_id.0,
            outcome = ?summary.outcome,
            local = summary.local_execution_happened,
            "end"
        );
        summary
    }

    pub fn stats(&self) -> TxnStatsSnapshot {
        TxnStatsSnapshot {
            total_begun: self.begun.load(Ordering::Relaxed),
            total_committed: self.committed.load(Ordering::Relaxed),
            total_aborted: self.aborted.load(Ordering::Relaxed),
            with_local_execution: self.with_local_execution.load(Ordering::Relaxed),
        }
    }
}
