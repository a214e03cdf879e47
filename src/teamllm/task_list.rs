//! Shared Task List
//!
//! An ordered, concurrent-safe collection of work items shared by every
//! member of a team. Tasks carry status, an owner, and dependency edges;
//! [`TaskList::claim`] is the single atomic serialization point through which
//! ownership is taken — topologies only *propose* assignments, and a claim
//! that races another claim loses cleanly.
//!
//! All operations go through one `RwLock`; mutations take the exclusive
//! lock, reads the shared one. Nothing here performs I/O.
//!
//! # Example
//!
//! ```rust
//! use teamllm::teamllm::task_list::{TaskList, TaskStatus};
//!
//! let list = TaskList::new();
//! let task = list.create("Write report", "Summarize Q3 numbers");
//! assert_eq!(task.status, TaskStatus::Pending);
//!
//! list.claim(&task.id, "alice").unwrap();
//! let claimed = list.get(&task.id).unwrap();
//! assert_eq!(claimed.status, TaskStatus::InProgress);
//! assert_eq!(claimed.owner, "alice");
//! ```

use crate::teamllm::ident;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::RwLock;

/// Lifecycle states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Deleted,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => f.write_str("pending"),
            TaskStatus::InProgress => f.write_str("in_progress"),
            TaskStatus::Completed => f.write_str("completed"),
            TaskStatus::Deleted => f.write_str("deleted"),
        }
    }
}

impl TaskStatus {
    /// Parse the snake_case form produced by [`Display`](fmt::Display).
    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "deleted" => Some(TaskStatus::Deleted),
            _ => None,
        }
    }
}

/// A unit of work in the shared list.
///
/// Tasks are value-like: [`TaskList`] hands out clones, and all mutation goes
/// back through the list under its lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, `task_` prefixed.
    pub id: String,
    /// Short imperative summary.
    pub subject: String,
    /// Longer free-form description.
    pub description: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Owning member's name; empty while unassigned.
    pub owner: String,
    /// IDs of tasks that must complete before this one can be claimed.
    pub blocked_by: Vec<String>,
    /// Reverse edges of `blocked_by`; informational only.
    pub blocks: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Optional per-field overrides applied by [`TaskList::update`].
///
/// `None` fields are left untouched; `blocked_by` / `blocks` entries are
/// appended, never replaced.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub owner: Option<String>,
    pub blocked_by: Vec<String>,
    pub blocks: Vec<String>,
}

/// Optional filters applied by [`TaskList::list`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub owner: Option<String>,
}

/// Errors produced by task list operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// No task with the given ID exists.
    NotFound(String),
    /// Claim attempted on a task that is not Pending.
    NotPending(String),
    /// Claim attempted on a task that already has an owner.
    AlreadyOwned { task_id: String, owner: String },
    /// Claim attempted while a dependency is incomplete; names the blocker.
    Blocked { task_id: String, blocker: String },
    /// A status string could not be parsed.
    InvalidStatus(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::NotFound(id) => write!(f, "Task not found: {}", id),
            TaskError::NotPending(id) => write!(f, "Task is not pending: {}", id),
            TaskError::AlreadyOwned { task_id, owner } => {
                write!(f, "Task {} is already owned by {}", task_id, owner)
            }
            TaskError::Blocked { task_id, blocker } => {
                write!(f, "Task {} is blocked by incomplete task {}", task_id, blocker)
            }
            TaskError::InvalidStatus(s) => write!(f, "Invalid status: {}", s),
        }
    }
}

impl Error for TaskError {}

struct TaskListState {
    tasks: HashMap<String, Task>,
    /// Task IDs in insertion order; drives all iteration.
    order: Vec<String>,
}

/// The concurrent-safe, insertion-ordered task collection.
#[derive(Default)]
pub struct TaskList {
    state: RwLock<TaskListState>,
}

impl Default for TaskListState {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl TaskList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new Pending, unowned task and return a copy of it.
    pub fn create(&self, subject: impl Into<String>, description: impl Into<String>) -> Task {
        let now = Utc::now();
        let task = Task {
            id: ident::new_id(ident::TASK_PREFIX),
            subject: subject.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            owner: String::new(),
            blocked_by: Vec::new(),
            blocks: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state.write().expect("task list lock");
        state.order.push(task.id.clone());
        state.tasks.insert(task.id.clone(), task.clone());
        task
    }

    /// Fetch a task by ID.
    pub fn get(&self, id: &str) -> Result<Task, TaskError> {
        let state = self.state.read().expect("task list lock");
        state
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Apply a patch to a task, refreshing `updated_at`.
    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, TaskError> {
        let mut state = self.state.write().expect("task list lock");
        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;

        if let Some(subject) = patch.subject {
            task.subject = subject;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(owner) = patch.owner {
            task.owner = owner;
        }
        task.blocked_by.extend(patch.blocked_by);
        task.blocks.extend(patch.blocks);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// Atomically take ownership of a Pending, unowned, unblocked task.
    ///
    /// On success the task transitions to InProgress with `owner` set.
    /// Failure modes name the exact obstacle: [`TaskError::NotFound`],
    /// [`TaskError::NotPending`], [`TaskError::AlreadyOwned`], or
    /// [`TaskError::Blocked`] (with the first incomplete blocker).
    ///
    /// Dependencies referencing IDs that no longer exist are ignored — a
    /// deleted-and-forgotten blocker never wedges its dependents forever.
    pub fn claim(&self, id: &str, owner: impl Into<String>) -> Result<Task, TaskError> {
        let mut state = self.state.write().expect("task list lock");

        // Dependency check against the same locked snapshot the mutation
        // uses, so a concurrent claim cannot slip between check and set.
        {
            let task = state
                .tasks
                .get(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if task.status != TaskStatus::Pending {
                return Err(TaskError::NotPending(id.to_string()));
            }
            if !task.owner.is_empty() {
                return Err(TaskError::AlreadyOwned {
                    task_id: id.to_string(),
                    owner: task.owner.clone(),
                });
            }
            for blocker_id in &task.blocked_by {
                if let Some(blocker) = state.tasks.get(blocker_id) {
                    if blocker.status != TaskStatus::Completed {
                        return Err(TaskError::Blocked {
                            task_id: id.to_string(),
                            blocker: blocker_id.clone(),
                        });
                    }
                }
            }
        }

        let task = state.tasks.get_mut(id).expect("checked above");
        task.owner = owner.into();
        task.status = TaskStatus::InProgress;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// First Pending, unowned, unblocked task in insertion order, if any.
    pub fn next_available(&self) -> Option<Task> {
        let state = self.state.read().expect("task list lock");
        for id in &state.order {
            let task = match state.tasks.get(id) {
                Some(t) => t,
                None => continue,
            };
            if task.status == TaskStatus::Pending
                && task.owner.is_empty()
                && !is_blocked(task, &state.tasks)
            {
                return Some(task.clone());
            }
        }
        None
    }

    /// Tasks matching the filter, in insertion order, excluding Deleted.
    pub fn list(&self, filter: TaskFilter) -> Vec<Task> {
        let state = self.state.read().expect("task list lock");
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| t.status != TaskStatus::Deleted)
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .owner
                    .as_ref()
                    .map_or(true, |o| &t.owner == o)
            })
            .cloned()
            .collect()
    }

    /// Number of live (non-Deleted) tasks.
    pub fn len(&self) -> usize {
        let state = self.state.read().expect("task list lock");
        state
            .tasks
            .values()
            .filter(|t| t.status != TaskStatus::Deleted)
            .count()
    }

    /// True when no live tasks remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A task is blocked when any `blocked_by` entry names an existing task whose
/// status is not Completed. Vanished blockers do not block.
pub(crate) fn is_blocked(task: &Task, tasks: &HashMap<String, Task>) -> bool {
    task.blocked_by.iter().any(|id| {
        tasks
            .get(id)
            .map_or(false, |blocker| blocker.status != TaskStatus::Completed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_preserves_insertion_order() {
        let list = TaskList::new();
        let a = list.create("a", "");
        let b = list.create("b", "");
        let c = list.create("c", "");
        let ids: Vec<String> = list
            .list(TaskFilter::default())
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_claim_twice_fails() {
        let list = TaskList::new();
        let task = list.create("t", "");
        list.claim(&task.id, "alice").unwrap();
        let err = list.claim(&task.id, "bob").unwrap_err();
        assert_eq!(err, TaskError::NotPending(task.id.clone()));
    }

    #[test]
    fn test_vanished_blocker_does_not_block() {
        let list = TaskList::new();
        let task = list.create("t", "");
        list.update(
            &task.id,
            TaskPatch {
                blocked_by: vec!["task_ghost".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        assert!(list.claim(&task.id, "alice").is_ok());
    }
}
