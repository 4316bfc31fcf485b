//! Locality-aware execution for distributed plans.
//!
//! Tasks whose shard placements live on this node run in-process through the
//! single-node engine; everything else is handed back to the distributed
//! executor. Subplans are materialized first and shipped only to the nodes
//! that read them.

pub mod guard;
pub mod local_executor;
pub mod locality;
pub mod placement_tracker;
pub mod result_dest;
pub mod subplan_exec;


pub use guard::{LocalExecutionDecision, LocalExecutionGuard};
pub use local_executor::{
    CommandType, LocalExecutionOutcome, LocalExecutor, LocalQueryEngine, TupleSink, TupleStore,
};
pub use locality::{TaskLocalityClassifier, TaskSplit};
pub use placement_tracker::IntermediateResultPlacements;
pub use result_dest::{
    DestinationStats, DirectoryResultStore, IntermediateResultDestination, LocalResultStore,
    MemoryResultStore, ResultLocation, ResultStream, ResultTransport,
};
pub use subplan_exec::{SubPlanRunner, SubplanExecutor};
