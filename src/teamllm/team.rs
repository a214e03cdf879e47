//! Team Fabric
//!
//! A [`Team`] owns the pieces a group of agents coordinates through — the
//! [`MessageBus`], the shared [`TaskList`], a [`Blackboard`], and the
//! [`Topology`] — plus the members themselves. Starting a team spawns the
//! lead member with an initial prompt and every pre-configured teammate;
//! all agent events from all members fan into one aggregated [`TeamStream`].
//!
//! # Architecture
//!
//! ```text
//! Team
//!   ├─ MessageBus ── bounded inbox per member, topology-routed sends
//!   ├─ TaskList ──── claim() is the only binding assignment step
//!   ├─ Blackboard ── shared KV for blackboard-topology teams
//!   └─ Members ───── forwarder + run loop per member
//!         └─ events ──────────────► TeamStream (one channel, labeled)
//! ```
//!
//! # Shutdown
//!
//! Two distinct paths, never merged: [`Team::shutdown`] cancels the root
//! token — hard, unacknowledged, every run loop exits on observing it — while
//! a `ShutdownRequest` message asks one member to stop cooperatively and is
//! acknowledged with a `ShutdownResponse` carrying the same request ID.
//! The aggregated stream closes once every member task has exited.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use teamllm::teamllm::agent::Agent;
//! use teamllm::teamllm::team::{Team, TeamOptions};
//! use teamllm::teamllm::topology::LeaderTeammate;
//! # use teamllm::teamllm::client::ClientWrapper;
//! # async fn demo(client: Arc<dyn ClientWrapper>) {
//! let options = TeamOptions::new(
//!     Arc::new(LeaderTeammate::new("coordinator")),
//!     Agent::new("coordinator", client.clone()),
//! )
//! .with_member("researcher", Agent::new("researcher", client.clone()))
//! .with_member("writer", Agent::new("writer", client));
//!
//! let team = Team::new("doc-team", options);
//! let mut stream = team.start("Draft the launch announcement.");
//! while let Some(event) = stream.next().await {
//!     println!("[{}] {:?}", event.member_name, event.event);
//! }
//! # }
//! ```

use crate::teamllm::agent::Agent;
use crate::teamllm::blackboard::Blackboard;
use crate::teamllm::bus::{Message, MessageBus, DEFAULT_INBOX_CAPACITY};
use crate::teamllm::event::{AgentEvent, RunOutcome, TeamEvent, TeamStream};
use crate::teamllm::ident;
use crate::teamllm::member::{spawn_member_tasks, Member, MemberRole};
use crate::teamllm::task_list::{TaskFilter, TaskList};
use crate::teamllm::team_tools::register_team_tools;
use crate::teamllm::topology::{Assignment, MemberSnapshot, Topology};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the aggregated event channel.
const EVENT_BUFFER: usize = 256;

/// Fallback lead member name when the topology does not designate one.
const DEFAULT_LEAD_NAME: &str = "lead";

/// Errors produced by team membership operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamError {
    /// A member with this name is already registered.
    AlreadyExists(String),
    /// The team has not been started, or has been shut down.
    NotRunning,
}

impl fmt::Display for TeamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamError::AlreadyExists(name) => write!(f, "Member already exists: {}", name),
            TeamError::NotRunning => f.write_str("Team is not running"),
        }
    }
}

impl Error for TeamError {}

/// Construction-time configuration for a [`Team`].
pub struct TeamOptions {
    topology: Arc<dyn Topology>,
    lead_agent: Agent,
    members: Vec<(String, Agent)>,
    parent_cancel: Option<CancellationToken>,
}

impl TeamOptions {
    /// A team needs at least a topology and the lead member's agent.
    pub fn new(topology: Arc<dyn Topology>, lead_agent: Agent) -> Self {
        Self {
            topology,
            lead_agent,
            members: Vec::new(),
            parent_cancel: None,
        }
    }

    /// Pre-configure an additional member, spawned when the team starts
    /// (builder pattern).
    pub fn with_member(mut self, name: impl Into<String>, agent: Agent) -> Self {
        self.members.push((name.into(), agent));
        self
    }

    /// Derive the team's root cancellation from a parent token (builder
    /// pattern). Cancelling the parent shuts the team down.
    pub fn with_parent_cancel(mut self, parent: CancellationToken) -> Self {
        self.parent_cancel = Some(parent);
        self
    }
}

struct PendingStart {
    lead_agent: Agent,
    members: Vec<(String, Agent)>,
}

/// A named collection of members coordinated by a topology.
pub struct Team {
    id: String,
    name: String,
    topology: Arc<dyn Topology>,
    bus: Arc<MessageBus>,
    task_list: Arc<TaskList>,
    blackboard: Arc<Blackboard>,
    members: RwLock<HashMap<String, Arc<Member>>>,
    lead_name: Mutex<Option<String>>,
    root: CancellationToken,
    events_tx: Mutex<Option<mpsc::Sender<TeamEvent>>>,
    pending: Mutex<Option<PendingStart>>,
}

impl Team {
    /// Create a team. Nothing runs until [`start`](Team::start).
    pub fn new(name: impl Into<String>, options: TeamOptions) -> Self {
        let root = match options.parent_cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let bus = Arc::new(MessageBus::new(Arc::clone(&options.topology)));
        Self {
            id: ident::new_id(ident::TEAM_PREFIX),
            name: name.into(),
            topology: options.topology,
            bus,
            task_list: Arc::new(TaskList::new()),
            blackboard: Arc::new(Blackboard::new()),
            members: RwLock::new(HashMap::new()),
            lead_name: Mutex::new(None),
            root,
            events_tx: Mutex::new(None),
            pending: Mutex::new(Some(PendingStart {
                lead_agent: options.lead_agent,
                members: options.members,
            })),
        }
    }

    /// Start the team: spawn the lead member, fire its initial run with
    /// `prompt`, then spawn every pre-configured member.
    ///
    /// Never returns an error — failures while spawning members surface as
    /// error-result events on the returned stream, which stays usable for
    /// the members that did start. Calling `start` twice yields an
    /// immediately closed stream.
    pub fn start(&self, prompt: impl Into<String>) -> TeamStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let pending = match self.pending.lock().expect("team lock").take() {
            Some(p) => p,
            None => {
                log::warn!("team '{}' started more than once", self.name);
                return TeamStream::new(rx);
            }
        };
        *self.events_tx.lock().expect("team lock") = Some(tx.clone());

        let lead_name = self
            .topology
            .leader_name()
            .unwrap_or_else(|| DEFAULT_LEAD_NAME.to_string());
        *self.lead_name.lock().expect("team lock") = Some(lead_name.clone());

        log::info!(
            "team '{}' ({}) starting with topology '{}'",
            self.name,
            self.id,
            self.topology.name()
        );

        if let Err(e) = self.spawn_member_internal(
            &lead_name,
            MemberRole::Lead,
            pending.lead_agent,
            Some(prompt.into()),
        ) {
            self.emit_spawn_failure(&tx, &lead_name, &e);
        }

        for (name, agent) in pending.members {
            if let Err(e) = self.spawn_member_internal(&name, MemberRole::Teammate, agent, None) {
                self.emit_spawn_failure(&tx, &name, &e);
            }
        }

        TeamStream::new(rx)
    }

    /// Add a member to a running team.
    pub fn spawn_member(&self, name: impl Into<String>, agent: Agent) -> Result<(), TeamError> {
        let name = name.into();
        self.spawn_member_internal(&name, MemberRole::Teammate, agent, None)
            .map(|_| ())
    }

    /// Remove a member: its inbox closes (undelivered messages are
    /// discarded), its run loop exits, and the topology observes the leave.
    pub fn remove_member(&self, name: &str) -> Result<(), TeamError> {
        let removed = {
            let mut members = self.members.write().expect("team members lock");
            members.remove(name)
        };
        match removed {
            Some(_) => {
                self.bus.unsubscribe(name);
                self.topology.on_member_leave(name);
                log::info!("team '{}' removed member '{}'", self.name, name);
                Ok(())
            }
            None => Err(TeamError::NotRunning),
        }
    }

    /// Hard shutdown: cancel the root token. Every forwarder and run loop
    /// observes it and exits; the aggregated stream closes once the last
    /// member task has dropped its sender. Unacknowledged by design — the
    /// cooperative path is a `ShutdownRequest` message.
    pub fn shutdown(&self) {
        log::info!("team '{}' shutting down", self.name);
        self.root.cancel();
        *self.events_tx.lock().expect("team lock") = None;
    }

    /// Propose-and-bind one assignment pass.
    ///
    /// Snapshots tasks and member statuses, asks the topology for proposals,
    /// claims each against the task list, and delivers each bound task to
    /// its member as a direct message from the lead. Proposals a concurrent
    /// claim already invalidated are dropped silently; delivery failures
    /// release nothing (the claim stands and the member can find the task
    /// via the TaskList tool).
    pub fn assign_pending_tasks(&self) -> Vec<Assignment> {
        let tasks = self.task_list.list(TaskFilter::default());
        let snapshots = self.member_snapshots();
        let proposals = self.topology.next_task(&tasks, &snapshots);

        let from = self
            .lead_name
            .lock()
            .expect("team lock")
            .clone()
            .unwrap_or_else(|| DEFAULT_LEAD_NAME.to_string());

        let mut bound = Vec::new();
        for proposal in proposals {
            let task = match self.task_list.claim(&proposal.task_id, proposal.member.as_str()) {
                Ok(task) => task,
                Err(e) => {
                    log::debug!(
                        "assignment proposal for {} dropped: {}",
                        proposal.task_id,
                        e
                    );
                    continue;
                }
            };
            let content = format!(
                "You have been assigned task {} — {}\n{}",
                task.id, task.subject, task.description
            );
            if let Err(e) = self
                .bus
                .send(Message::direct(from.as_str(), proposal.member.as_str(), content))
            {
                log::warn!(
                    "could not notify '{}' of assignment {}: {}",
                    proposal.member,
                    task.id,
                    e
                );
            }
            bound.push(proposal);
        }
        bound
    }

    /// All current members.
    pub fn members(&self) -> Vec<Arc<Member>> {
        let members = self.members.read().expect("team members lock");
        let mut out: Vec<Arc<Member>> = members.values().cloned().collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// The lead member, once the team has started.
    pub fn lead(&self) -> Option<Arc<Member>> {
        let lead_name = self.lead_name.lock().expect("team lock").clone()?;
        let members = self.members.read().expect("team members lock");
        members.get(&lead_name).cloned()
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn task_list(&self) -> &Arc<TaskList> {
        &self.task_list
    }

    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.blackboard
    }

    /// Stable identifier, `team_` prefixed.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn member_snapshots(&self) -> Vec<MemberSnapshot> {
        self.members()
            .iter()
            .map(|m| MemberSnapshot::new(m.name(), m.status()))
            .collect()
    }

    fn spawn_member_internal(
        &self,
        name: &str,
        role: MemberRole,
        agent: Agent,
        initial_prompt: Option<String>,
    ) -> Result<Arc<Member>, TeamError> {
        let events_tx = self
            .events_tx
            .lock()
            .expect("team lock")
            .clone()
            .ok_or(TeamError::NotRunning)?;

        let member = {
            let mut members = self.members.write().expect("team members lock");
            if members.contains_key(name) {
                return Err(TeamError::AlreadyExists(name.to_string()));
            }
            let member = Arc::new(Member::new(name, role));
            members.insert(name.to_string(), Arc::clone(&member));
            member
        };

        register_team_tools(&agent, name, &self.bus, &self.task_list);
        let inbox = self.bus.subscribe(name, DEFAULT_INBOX_CAPACITY);
        self.topology.on_member_join(name);

        spawn_member_tasks(
            Arc::clone(&member),
            agent,
            Arc::clone(&self.bus),
            inbox,
            events_tx,
            self.root.clone(),
            initial_prompt,
        );
        log::info!("team '{}' spawned member '{}'", self.name, name);
        Ok(member)
    }

    fn emit_spawn_failure(&self, tx: &mpsc::Sender<TeamEvent>, name: &str, error: &TeamError) {
        log::error!("team '{}' failed to spawn '{}': {}", self.name, name, error);
        let event = TeamEvent {
            member_name: name.to_string(),
            event: AgentEvent::Result(RunOutcome {
                error: Some(format!("failed to spawn member: {}", error)),
                ..Default::default()
            }),
        };
        let _ = tx.try_send(event);
    }
}
