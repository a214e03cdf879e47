//! Topology Plane
//!
//! A [`Topology`] is the policy object a team delegates two decisions to:
//! where an unaddressed message goes ([`route`](Topology::route)) and which
//! idle member should pick up which pending task
//! ([`next_task`](Topology::next_task)). Six strategies ship behind the one
//! trait:
//!
//! ```text
//! LeaderTeammate   star    — leader fans out, teammates report back
//! Pipeline         chain   — stage i forwards to stage i+1
//! PeerRing         ring    — each member forwards to its successor
//! SupervisorTree   tree    — members report to their parent
//! BlackboardTopology       — no routing; coordination via shared state
//! MapReduce        fan     — dispatcher → workers → merger → dispatcher
//! ```
//!
//! `next_task` returns *proposals* only. The binding step is
//! [`TaskList::claim`](crate::teamllm::task_list::TaskList::claim), so a
//! topology may propose an assignment a concurrent claim has already
//! invalidated — the claim simply fails and the proposal is dropped. No
//! strategy ever proposes a task that is not pending-unowned-unblocked, nor
//! a member that is not Idle.
//!
//! Strategies with mutable state (active lists, the ring cursor, the tree
//! maps) guard it with a `Mutex` so every implementation works through
//! `&self` from an `Arc<dyn Topology>`.

use crate::teamllm::bus::Message;
use crate::teamllm::member::MemberStatus;
use crate::teamllm::task_list::{Task, TaskStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Point-in-time view of a member used for task assignment.
#[derive(Debug, Clone)]
pub struct MemberSnapshot {
    pub name: String,
    pub status: MemberStatus,
}

impl MemberSnapshot {
    pub fn new(name: impl Into<String>, status: MemberStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// A proposed mapping of one task to one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub task_id: String,
    pub member: String,
}

/// Routing and task-assignment policy for a team.
pub trait Topology: Send + Sync {
    /// Strategy name, for logging and leader-name derivation.
    fn name(&self) -> &str;

    /// Recipients for a message whose `to` is empty. An explicit `to` never
    /// reaches this method — the bus delivers it directly.
    fn route(&self, from: &str, message: &Message, members: &[String]) -> Vec<String>;

    /// Propose assignments of pending tasks to idle members.
    ///
    /// Tasks arrive in insertion order; members in the team's snapshot
    /// order. Proposals are non-binding — callers claim each one and drop
    /// proposals the claim rejects.
    fn next_task(&self, tasks: &[Task], members: &[MemberSnapshot]) -> Vec<Assignment>;

    /// A member joined the team.
    fn on_member_join(&self, _name: &str) {}

    /// A member left the team.
    fn on_member_leave(&self, _name: &str) {}

    /// For strategies with a designated leader, its name. The team derives
    /// its lead member's name from this; `None` falls back to `"lead"`.
    fn leader_name(&self) -> Option<String> {
        None
    }
}

/// Tasks eligible for assignment: Pending, unowned, and with every existing
/// blocker Completed. Returned in the order given.
fn ready_tasks<'a>(tasks: &'a [Task]) -> Vec<&'a Task> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && t.owner.is_empty())
        .filter(|t| {
            t.blocked_by.iter().all(|id| {
                by_id
                    .get(id.as_str())
                    .map_or(true, |blocker| blocker.status == TaskStatus::Completed)
            })
        })
        .collect()
}

fn is_idle(members: &[MemberSnapshot], name: &str) -> bool {
    members
        .iter()
        .any(|m| m.name == name && m.status == MemberStatus::Idle)
}

/// Pair ready tasks with idle members one-each, in the given member order.
fn assign_one_each(tasks: &[Task], member_names: &[String], members: &[MemberSnapshot]) -> Vec<Assignment> {
    let ready = ready_tasks(tasks);
    let mut assignments = Vec::new();
    let mut next = ready.into_iter();
    for name in member_names {
        if !is_idle(members, name) {
            continue;
        }
        match next.next() {
            Some(task) => assignments.push(Assignment {
                task_id: task.id.clone(),
                member: name.clone(),
            }),
            None => break,
        }
    }
    assignments
}

// ---------------------------------------------------------------------------
// Leader/Teammate (star)
// ---------------------------------------------------------------------------

/// Star topology: the leader addresses everyone, teammates answer the leader.
///
/// `next_task` is intentionally empty — the leader delegates work explicitly
/// through direct messages and the task tools.
pub struct LeaderTeammate {
    leader_name: String,
}

impl LeaderTeammate {
    pub fn new(leader_name: impl Into<String>) -> Self {
        Self {
            leader_name: leader_name.into(),
        }
    }
}

impl Topology for LeaderTeammate {
    fn name(&self) -> &str {
        "leader_teammate"
    }

    fn route(&self, from: &str, _message: &Message, members: &[String]) -> Vec<String> {
        if from == self.leader_name {
            members
                .iter()
                .filter(|m| *m != &self.leader_name)
                .cloned()
                .collect()
        } else {
            vec![self.leader_name.clone()]
        }
    }

    fn next_task(&self, _tasks: &[Task], _members: &[MemberSnapshot]) -> Vec<Assignment> {
        Vec::new()
    }

    fn leader_name(&self) -> Option<String> {
        Some(self.leader_name.clone())
    }
}

// ---------------------------------------------------------------------------
// Pipeline (chain)
// ---------------------------------------------------------------------------

/// Chain topology over an ordered list of stages.
pub struct Pipeline {
    stages: Vec<String>,
    active: Mutex<Vec<String>>,
}

impl Pipeline {
    pub fn new(stages: Vec<String>) -> Self {
        let active = stages.clone();
        Self {
            stages,
            active: Mutex::new(active),
        }
    }

    /// The currently active stages, in configured order.
    pub fn active_stages(&self) -> Vec<String> {
        self.active.lock().expect("pipeline lock").clone()
    }
}

impl Topology for Pipeline {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn route(&self, from: &str, _message: &Message, _members: &[String]) -> Vec<String> {
        let active = self.active.lock().expect("pipeline lock");
        match active.iter().position(|s| s == from) {
            Some(i) if i + 1 < active.len() => vec![active[i + 1].clone()],
            _ => Vec::new(),
        }
    }

    fn next_task(&self, tasks: &[Task], members: &[MemberSnapshot]) -> Vec<Assignment> {
        let active = self.active.lock().expect("pipeline lock").clone();
        assign_one_each(tasks, &active, members)
    }

    fn on_member_join(&self, name: &str) {
        // Only originally configured stages rejoin; arbitrary members are
        // not part of the chain.
        if !self.stages.iter().any(|s| s == name) {
            return;
        }
        let mut active = self.active.lock().expect("pipeline lock");
        if !active.iter().any(|s| s == name) {
            let present: HashSet<&String> = active.iter().collect();
            let mut rebuilt: Vec<String> = Vec::with_capacity(active.len() + 1);
            for stage in &self.stages {
                if stage == name || present.contains(stage) {
                    rebuilt.push(stage.clone());
                }
            }
            *active = rebuilt;
        }
    }

    fn on_member_leave(&self, name: &str) {
        let mut active = self.active.lock().expect("pipeline lock");
        active.retain(|s| s != name);
    }
}

// ---------------------------------------------------------------------------
// Peer Ring
// ---------------------------------------------------------------------------

/// Ring topology: each member forwards to its successor.
///
/// Task assignment is round-robin over idle ring members; the cursor is
/// carried across calls so successive invocations continue the rotation
/// where the previous one stopped.
pub struct PeerRing {
    ring: Vec<String>,
    active: Mutex<Vec<String>>,
    cursor: Mutex<usize>,
}

impl PeerRing {
    pub fn new(ring: Vec<String>) -> Self {
        let active = ring.clone();
        Self {
            ring,
            active: Mutex::new(active),
            cursor: Mutex::new(0),
        }
    }
}

impl Topology for PeerRing {
    fn name(&self) -> &str {
        "peer_ring"
    }

    fn route(&self, from: &str, _message: &Message, _members: &[String]) -> Vec<String> {
        let active = self.active.lock().expect("ring lock");
        if active.len() < 2 {
            return Vec::new();
        }
        match active.iter().position(|m| m == from) {
            Some(i) => vec![active[(i + 1) % active.len()].clone()],
            None => Vec::new(),
        }
    }

    fn next_task(&self, tasks: &[Task], members: &[MemberSnapshot]) -> Vec<Assignment> {
        let active = self.active.lock().expect("ring lock").clone();
        if active.is_empty() {
            return Vec::new();
        }
        let ready = ready_tasks(tasks);
        let mut cursor = self.cursor.lock().expect("ring cursor lock");
        let mut assignments = Vec::new();
        let mut used: HashSet<String> = HashSet::new();

        for task in ready {
            // Scan at most one full rotation for the next unused idle member.
            let mut chosen = None;
            for offset in 0..active.len() {
                let idx = (*cursor + offset) % active.len();
                let candidate = &active[idx];
                if used.contains(candidate) || !is_idle(members, candidate) {
                    continue;
                }
                chosen = Some((idx, candidate.clone()));
                break;
            }
            match chosen {
                Some((idx, member)) => {
                    *cursor = (idx + 1) % active.len();
                    used.insert(member.clone());
                    assignments.push(Assignment {
                        task_id: task.id.clone(),
                        member,
                    });
                }
                None => break,
            }
        }
        assignments
    }

    fn on_member_join(&self, name: &str) {
        if !self.ring.iter().any(|m| m == name) {
            return;
        }
        let mut active = self.active.lock().expect("ring lock");
        if !active.iter().any(|m| m == name) {
            let present: HashSet<&String> = active.iter().collect();
            let mut rebuilt: Vec<String> = Vec::with_capacity(active.len() + 1);
            for member in &self.ring {
                if member == name || present.contains(member) {
                    rebuilt.push(member.clone());
                }
            }
            *active = rebuilt;
        }
    }

    fn on_member_leave(&self, name: &str) {
        let mut active = self.active.lock().expect("ring lock");
        if let Some(pos) = active.iter().position(|m| m == name) {
            active.remove(pos);
            // Keep the cursor pointing at the same successor.
            let mut cursor = self.cursor.lock().expect("ring cursor lock");
            if active.is_empty() {
                *cursor = 0;
            } else {
                if pos < *cursor {
                    *cursor -= 1;
                }
                *cursor %= active.len();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor Tree
// ---------------------------------------------------------------------------

struct TreeState {
    /// child → parent
    parent: HashMap<String, String>,
    /// parent → children
    children: HashMap<String, Vec<String>>,
}

/// Tree topology: members report to their parent; work goes to idle leaves.
///
/// When a member leaves, its children are re-parented to its own parent so
/// the tree heals around the gap; a departing root leaves its children as
/// new roots.
pub struct SupervisorTree {
    state: Mutex<TreeState>,
}

impl SupervisorTree {
    /// Build the tree from child→parent edges. The children map is derived.
    pub fn new(parent: HashMap<String, String>) -> Self {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut edges: Vec<(&String, &String)> = parent.iter().collect();
        // Deterministic child order regardless of map iteration order.
        edges.sort();
        for (child, p) in edges {
            children.entry(p.clone()).or_insert_with(Vec::new).push(child.clone());
        }
        Self {
            state: Mutex::new(TreeState { parent, children }),
        }
    }

    /// Current parent of `name`, if it has one.
    pub fn parent_of(&self, name: &str) -> Option<String> {
        let state = self.state.lock().expect("tree lock");
        state.parent.get(name).cloned()
    }

    /// Current children of `name`.
    pub fn children_of(&self, name: &str) -> Vec<String> {
        let state = self.state.lock().expect("tree lock");
        state.children.get(name).cloned().unwrap_or_default()
    }
}

impl Topology for SupervisorTree {
    fn name(&self) -> &str {
        "supervisor_tree"
    }

    fn route(&self, from: &str, _message: &Message, _members: &[String]) -> Vec<String> {
        let state = self.state.lock().expect("tree lock");
        match state.parent.get(from) {
            Some(parent) => vec![parent.clone()],
            None => Vec::new(),
        }
    }

    fn next_task(&self, tasks: &[Task], members: &[MemberSnapshot]) -> Vec<Assignment> {
        let leaves: Vec<String> = {
            let state = self.state.lock().expect("tree lock");
            members
                .iter()
                .filter(|m| {
                    state
                        .children
                        .get(&m.name)
                        .map_or(true, |kids| kids.is_empty())
                })
                .map(|m| m.name.clone())
                .collect()
        };
        assign_one_each(tasks, &leaves, members)
    }

    fn on_member_leave(&self, name: &str) {
        let mut state = self.state.lock().expect("tree lock");

        let departed_parent = state.parent.remove(name);
        let orphans = state.children.remove(name).unwrap_or_default();

        if let Some(parent) = &departed_parent {
            if let Some(siblings) = state.children.get_mut(parent) {
                siblings.retain(|c| c != name);
            }
        }

        for orphan in orphans {
            match &departed_parent {
                Some(parent) => {
                    state.parent.insert(orphan.clone(), parent.clone());
                    state
                        .children
                        .entry(parent.clone())
                        .or_insert_with(Vec::new)
                        .push(orphan);
                }
                None => {
                    // Root departed: children become roots themselves.
                    state.parent.remove(&orphan);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Blackboard
// ---------------------------------------------------------------------------

/// No-routing topology: members coordinate through the shared
/// [`Blackboard`](crate::teamllm::blackboard::Blackboard) instead of direct
/// messages. Explicitly addressed messages still work; unaddressed ones go
/// nowhere.
#[derive(Default)]
pub struct BlackboardTopology;

impl BlackboardTopology {
    pub fn new() -> Self {
        Self
    }
}

impl Topology for BlackboardTopology {
    fn name(&self) -> &str {
        "blackboard"
    }

    fn route(&self, _from: &str, _message: &Message, _members: &[String]) -> Vec<String> {
        Vec::new()
    }

    fn next_task(&self, tasks: &[Task], members: &[MemberSnapshot]) -> Vec<Assignment> {
        let names: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
        assign_one_each(tasks, &names, members)
    }
}

// ---------------------------------------------------------------------------
// Map-Reduce
// ---------------------------------------------------------------------------

/// Fan-out/fan-in topology: the dispatcher addresses all active workers,
/// workers report to the merger, and the merger feeds back to the
/// dispatcher. Only workers ever receive task assignments.
pub struct MapReduce {
    dispatcher: String,
    merger: String,
    workers: Vec<String>,
    active: Mutex<Vec<String>>,
}

impl MapReduce {
    pub fn new(
        dispatcher: impl Into<String>,
        merger: impl Into<String>,
        workers: Vec<String>,
    ) -> Self {
        let active = workers.clone();
        Self {
            dispatcher: dispatcher.into(),
            merger: merger.into(),
            workers,
            active: Mutex::new(active),
        }
    }

    /// The currently active workers, in configured order.
    pub fn active_workers(&self) -> Vec<String> {
        self.active.lock().expect("mapreduce lock").clone()
    }
}

impl Topology for MapReduce {
    fn name(&self) -> &str {
        "map_reduce"
    }

    fn route(&self, from: &str, _message: &Message, _members: &[String]) -> Vec<String> {
        if from == self.dispatcher {
            return self.active.lock().expect("mapreduce lock").clone();
        }
        if self.workers.iter().any(|w| w == from) {
            return vec![self.merger.clone()];
        }
        if from == self.merger {
            return vec![self.dispatcher.clone()];
        }
        Vec::new()
    }

    fn next_task(&self, tasks: &[Task], members: &[MemberSnapshot]) -> Vec<Assignment> {
        let active = self.active.lock().expect("mapreduce lock").clone();
        assign_one_each(tasks, &active, members)
    }

    fn on_member_join(&self, name: &str) {
        if !self.workers.iter().any(|w| w == name) {
            return;
        }
        let mut active = self.active.lock().expect("mapreduce lock");
        if !active.iter().any(|w| w == name) {
            let present: HashSet<&String> = active.iter().collect();
            let mut rebuilt: Vec<String> = Vec::with_capacity(active.len() + 1);
            for worker in &self.workers {
                if worker == name || present.contains(worker) {
                    rebuilt.push(worker.clone());
                }
            }
            *active = rebuilt;
        }
    }

    fn on_member_leave(&self, name: &str) {
        let mut active = self.active.lock().expect("mapreduce lock");
        active.retain(|w| w != name);
    }
}
