//! Transaction-scoped execution state.
//!
//! A `TxnExecutionContext` is created by [`crate::TxnCoordinator::begin`] and
//! consumed by `commit`/`abort`. It is the only place that remembers whether
//! any task ran in-process during the transaction, so the "clear exactly once
//! per transaction" rule falls out of ownership: nothing can reset the state
//! without giving up the context.

use std::collections::BTreeMap;

use tern_common::error::TernResult;
use tern_common::types::{DistributedTxnId, NodeGroupId, TxnId};
use tern_common::TernError;

/// Whether local execution happened in this transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalExecutionState {
    #[default]
    Clear,
    LocalExecuted,
}

/// How the distributed executor reached a node group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionMode {
    /// One connection per node, commands issued one at a time.
    Sequential,
    /// Several connections to the same node used concurrently.
    Parallel,
}

const SEQUENTIAL_HINT: &str =
    "Try re-running the transaction with \"SET LOCAL multi_shard_modify_mode TO 'sequential';\"";
const DISABLE_LOCAL_HINT: &str =
    "Try re-running the transaction with \"SET LOCAL enable_local_execution TO OFF;\"";

#[derive(Debug)]
pub struct TxnExecutionContext {
    txn_id: TxnId,
    local_group_id: NodeGroupId,
    local_state: LocalExecutionState,
    local_execution_disabled: bool,
    distributed_txn_id: Option<DistributedTxnId>,
    /// Strongest mode used per node group.
    connection_access: BTreeMap<NodeGroupId, ConnectionMode>,
    local_tasks_executed: u64,
}

impl TxnExecutionContext {
    pub(crate) fn new(txn_id: TxnId, local_group_id: NodeGroupId) -> Self {
        Self {
            txn_id,
            local_group_id,
            local_state: LocalExecutionState::Clear,
            local_execution_disabled: false,
            distributed_txn_id: None,
            connection_access: BTreeMap::new(),
            local_tasks_executed: 0,
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn local_group_id(&self) -> NodeGroupId {
        self.local_group_id
    }

    pub fn local_state(&self) -> LocalExecutionState {
        self.local_state
    }

    pub fn local_execution_happened(&self) -> bool {
        self.local_state == LocalExecutionState::LocalExecuted
    }

    /// `Clear -> LocalExecuted`. Idempotent; there is no way back short of
    /// ending the transaction.
    pub fn mark_local_execution(&mut self, task_count: usize) {
        if self.local_state == LocalExecutionState::Clear {
            tracing::debug!(txn_id = self.txn_id.0, "local execution started in transaction");
        }
        self.local_state = LocalExecutionState::LocalExecuted;
        self.local_tasks_executed += task_count as u64;
    }

    pub fn local_tasks_executed(&self) -> u64 {
        self.local_tasks_executed
    }

    /// Transaction-local equivalent of `SET LOCAL enable_local_execution TO off`.
    pub fn disable_local_execution(&mut self) {
        self.local_execution_disabled = true;
    }

    pub fn local_execution_disabled(&self) -> bool {
        self.local_execution_disabled
    }

    /// Record that the distributed executor opened or reused a connection to
    /// `group_id`. Once tasks have run locally, the transaction is bound to a
    /// single connection per node, so a parallel access is a conflict.
    pub fn record_connection_access(
        &mut self,
        group_id: NodeGroupId,
        mode: ConnectionMode,
    ) -> TernResult<()> {
        if mode == ConnectionMode::Parallel {
            self.error_if_local_execution_happened()?;
        }
        let entry = self.connection_access.entry(group_id).or_insert(mode);
        if mode > *entry {
            *entry = mode;
        }
        Ok(())
    }

    /// True once any shard placement was reached over a connection in this
    /// transaction.
    pub fn any_connection_accessed_placements(&self) -> bool {
        !self.connection_access.is_empty()
    }

    pub fn connection_mode(&self, group_id: NodeGroupId) -> Option<ConnectionMode> {
        self.connection_access.get(&group_id).copied()
    }

    /// Fails for commands that cannot run after a local execution in the same
    /// transaction.
    pub fn error_if_local_execution_happened(&self) -> TernResult<()> {
        if self.local_execution_happened() {
            return Err(TernError::mode_conflict(
                "cannot execute command because a local execution has already been done in the transaction",
                "Some parallel commands cannot be executed if a previous command has already been executed locally",
                DISABLE_LOCAL_HINT,
            ));
        }
        Ok(())
    }

    /// Local execution shares one connection with the session; it cannot
    /// follow a parallel multi-connection access to the same node.
    pub fn ensure_local_execution_allowed(&self) -> TernResult<()> {
        if self.connection_mode(self.local_group_id) == Some(ConnectionMode::Parallel) {
            return Err(TernError::mode_conflict(
                "cannot execute tasks locally because a parallel command has already accessed this node in the transaction",
                format!(
                    "{} was reached over multiple connections earlier in {}",
                    self.local_group_id, self.txn_id
                ),
                SEQUENTIAL_HINT,
            ));
        }
        Ok(())
    }

    /// Assign a distributed transaction id on first use and return the same id
    /// for the rest of the transaction.
    pub fn begin_or_continue_coordinated(&mut self) -> DistributedTxnId {
        let (initiator, txn_number) = (self.local_group_id, self.txn_id.0);
        *self.distributed_txn_id.get_or_insert_with(|| {
            tracing::debug!(txn_id = txn_number, "beginning coordinated transaction");
            DistributedTxnId {
                initiator,
                txn_number,
            }
        })
    }

    pub fn distributed_txn_id(&self) -> Option<DistributedTxnId> {
        self.distributed_txn_id
    }
}
