pub mod context;
pub mod coordinator;


pub use context::{ConnectionMode, LocalExecutionState, TxnExecutionContext};
pub use coordinator::{TxnCoordinator, TxnOutcome, TxnStatsSnapshot, TxnSummary};
