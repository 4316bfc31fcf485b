//! Task locality classification: which (task, placement) obligations can be
//! served on this node and which must go over the network.

use tern_common::error::TernResult;
use tern_common::plan::{Placement, Task};
use tern_common::types::NodeGroupId;
use tern_common::TernError;

/// Result of splitting a task list by locality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSplit {
    pub local_tasks: Vec<Task>,
    pub remote_tasks: Vec<Task>,
}

impl TaskSplit {
    pub fn has_local(&self) -> bool {
        !self.local_tasks.is_empty()
    }

    pub fn has_remote(&self) -> bool {
        !self.remote_tasks.is_empty()
    }
}

/// Splits task lists relative to the group this process belongs to.
#[derive(Debug, Clone, Copy)]
pub struct TaskLocalityClassifier {
    local_group_id: NodeGroupId,
}

impl TaskLocalityClassifier {
    pub fn new(local_group_id: NodeGroupId) -> Self {
        Self { local_group_id }
    }

    pub fn local_group_id(&self) -> NodeGroupId {
        self.local_group_id
    }

    /// Partition `tasks` into local and remote lists.
    ///
    /// A task whose placements are all local (or all remote) moves as-is. A
    /// task with placements on both sides (reference tables, intermediate
    /// results) is copied: the local copy always runs here; the remote copy
    /// is kept only for plans that modify data, since every replica must see
    /// the write while a single local read is enough.
    pub fn classify(&self, tasks: &[Task], read_only: bool) -> TernResult<TaskSplit> {
        let mut split = TaskSplit::default();

        for task in tasks {
            if task.placements.is_empty() {
                return Err(TernError::internal_bug(
                    "E-LOCALITY-001",
                    format!("{} has no placements", task.task_id),
                    format!("query={}", task.query_string),
                ));
            }

            let (local, remote) = self.split_placements(&task.placements);
            if local.len() + remote.len() != task.placements.len() {
                return Err(TernError::internal_bug(
                    "E-LOCALITY-002",
                    format!("{} lost placements during classification", task.task_id),
                    format!(
                        "input={} local={} remote={}",
                        task.placements.len(),
                        local.len(),
                        remote.len()
                    ),
                ));
            }

            match (local.is_empty(), remote.is_empty()) {
                (false, true) => split.local_tasks.push(task.clone()),
                (true, false) => split.remote_tasks.push(task.clone()),
                _ => {
                    split.local_tasks.push(task.with_placements(local));
                    if !read_only {
                        split.remote_tasks.push(task.with_placements(remote));
                    }
                }
            }
        }

        tracing::trace!(
            local = split.local_tasks.len(),
            remote = split.remote_tasks.len(),
            read_only,
            "split tasks by locality"
        );
        Ok(split)
    }

    fn split_placements(&self, placements: &[Placement]) -> (Vec<Placement>, Vec<Placement>) {
        placements
            .iter()
            .cloned()
            .partition(|p| p.is_on_group(self.local_group_id))
    }

    /// True if any placement of `task` resides on this node.
    pub fn task_accesses_local_node(&self, task: &Task) -> bool {
        task.placements
            .iter()
            .any(|p| p.is_on_group(self.local_group_id))
    }

    /// True if any task in the list has a placement on another node.
    pub fn any_task_accesses_remote_node(&self, tasks: &[Task]) -> bool {
        tasks.iter().any(|task| {
            task.placements
                .iter()
                .any(|p| !p.is_on_group(self.local_group_id))
        })
    }
}
