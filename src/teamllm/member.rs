//! Team members.
//!
//! A [`Member`] wraps an [`Agent`](crate::teamllm::agent::Agent) with a name,
//! a role, a lock-free status cell, and a bounded inbox. Two tasks serve each
//! member:
//!
//! - a **forwarder** that moves messages from the bus inbox toward the run
//!   loop, so that closing the bus inbox (unsubscribe) unwinds the member
//!   without racing an in-flight agent run, and
//! - the **run loop**, which processes messages strictly sequentially: each
//!   inbound message becomes one agent run whose events are forwarded to the
//!   team's aggregated stream under this member's name.
//!
//! The run loop is the only writer of the member's status after the initial
//! Idle set at spawn time; other tasks read the status lock-free when taking
//! membership snapshots for task assignment.

use crate::teamllm::agent::Agent;
use crate::teamllm::bus::{Message, MessageBus, MessageType};
use crate::teamllm::event::TeamEvent;
use crate::teamllm::ident;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A member's place in the team hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Lead,
    Teammate,
}

/// Observable member states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemberStatus {
    Idle = 0,
    Working = 1,
    Shutdown = 2,
}

impl MemberStatus {
    fn from_u8(v: u8) -> MemberStatus {
        match v {
            0 => MemberStatus::Idle,
            1 => MemberStatus::Working,
            _ => MemberStatus::Shutdown,
        }
    }
}

/// Identity and status of one team member.
///
/// The heavy state (the agent, the inbox) lives in the member's tasks; this
/// struct is the shared, cheaply clonable view the team keeps in its member
/// map.
pub struct Member {
    id: String,
    name: String,
    role: MemberRole,
    status: Arc<AtomicU8>,
}

impl Member {
    pub(crate) fn new(name: impl Into<String>, role: MemberRole) -> Self {
        Self {
            id: ident::new_id(ident::AGENT_PREFIX),
            name: name.into(),
            role,
            status: Arc::new(AtomicU8::new(MemberStatus::Idle as u8)),
        }
    }

    /// Stable identifier, `agent_` prefixed.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name unique within the team.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> MemberRole {
        self.role
    }

    /// Lock-free status read.
    pub fn status(&self) -> MemberStatus {
        MemberStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn set_status(&self, status: MemberStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }
}

/// Wire a member's forwarder and run loop onto the runtime.
///
/// `inbox` is the receive end the bus handed out at subscribe time;
/// `initial_prompt` fires one agent run before the loop starts draining the
/// inbox (used for the leader's kick-off prompt). Both returned handles
/// complete after cancellation or inbox closure.
pub(crate) fn spawn_member_tasks(
    member: Arc<Member>,
    agent: Agent,
    bus: Arc<MessageBus>,
    inbox: mpsc::Receiver<Message>,
    events: mpsc::Sender<TeamEvent>,
    cancel: CancellationToken,
    initial_prompt: Option<String>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    // Capacity 1: the forwarder holds at most one message in flight, keeping
    // queueing (and therefore backpressure) at the bus inbox.
    let (loop_tx, loop_rx) = mpsc::channel(1);

    let forwarder = tokio::spawn(forward_inbox(inbox, loop_tx, cancel.clone()));
    let run_loop = tokio::spawn(run_member_loop(
        member,
        agent,
        bus,
        loop_rx,
        events,
        cancel,
        initial_prompt,
    ));
    (forwarder, run_loop)
}

/// Move messages from the bus inbox to the run loop until the inbox closes
/// or the team shuts down. Dropping `loop_tx` on exit is what tells the run
/// loop the bus side is gone.
async fn forward_inbox(
    mut inbox: mpsc::Receiver<Message>,
    loop_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = inbox.recv() => match received {
                Some(m) => m,
                None => break,
            },
        };
        if loop_tx.send(message).await.is_err() {
            break;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_member_loop(
    member: Arc<Member>,
    agent: Agent,
    bus: Arc<MessageBus>,
    mut inbox: mpsc::Receiver<Message>,
    events: mpsc::Sender<TeamEvent>,
    cancel: CancellationToken,
    initial_prompt: Option<String>,
) {
    if let Some(prompt) = initial_prompt {
        run_agent_once(&member, &agent, &events, &cancel, prompt).await;
        member.set_status(MemberStatus::Idle);
    }

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                member.set_status(MemberStatus::Shutdown);
                break;
            }
            received = inbox.recv() => match received {
                Some(m) => m,
                None => {
                    member.set_status(MemberStatus::Shutdown);
                    break;
                }
            },
        };

        if message.message_type == MessageType::ShutdownRequest {
            member.set_status(MemberStatus::Shutdown);
            let response = Message::shutdown_response(
                member.name(),
                message.from.as_str(),
                message.request_id.clone(),
            );
            if let Err(e) = bus.send(response) {
                log::warn!(
                    "member '{}' could not acknowledge shutdown to '{}': {}",
                    member.name(),
                    message.from,
                    e
                );
            }
            break;
        }

        let prompt = format!("[Message from {}]: {}", message.from, message.content);
        run_agent_once(&member, &agent, &events, &cancel, prompt).await;
        member.set_status(MemberStatus::Idle);
    }
    log::info!("member '{}' run loop exited", member.name());
}

/// One agent run: Working for its duration, every event forwarded to the
/// aggregated stream under this member's name.
async fn run_agent_once(
    member: &Member,
    agent: &Agent,
    events: &mpsc::Sender<TeamEvent>,
    cancel: &CancellationToken,
    prompt: String,
) {
    use futures_util::StreamExt;

    member.set_status(MemberStatus::Working);
    let mut stream = agent.run(cancel.child_token(), prompt);
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = stream.next() => match event {
                Some(e) => e,
                None => break,
            },
        };
        let labeled = TeamEvent {
            member_name: member.name().to_string(),
            event,
        };
        if events.send(labeled).await.is_err() {
            // Aggregated stream consumer is gone; keep draining so the run
            // still completes, but stop forwarding.
            while stream.next().await.is_some() {}
            break;
        }
    }
}
