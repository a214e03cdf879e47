//! Message Bus
//!
//! The subscribe/send/broadcast fabric connecting team members. Every
//! subscriber owns the receive end of a bounded channel (its inbox); the bus
//! holds the send ends. Delivery never blocks: a full inbox is a first-class
//! [`BusError::InboxFull`] on direct sends and a silent drop on broadcasts.
//! Messages with an empty `to` are routed by the team's
//! [`Topology`](crate::teamllm::topology::Topology).
//!
//! Bounded inboxes are the backpressure mechanism — while a member is inside
//! a long agent run its inbox fills, and senders observe `InboxFull` rather
//! than queuing without limit.

use crate::teamllm::ident;
use crate::teamllm::topology::Topology;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Default inbox capacity handed to [`MessageBus::subscribe`] callers that
/// do not choose their own.
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Kinds of envelope exchanged between members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Point-to-point message (or topology-routed when `to` is empty).
    Direct,
    /// Best-effort delivery to every member except the sender.
    Broadcast,
    /// Cooperative shutdown request; answered by a `ShutdownResponse`.
    ShutdownRequest,
    /// Acknowledgement of a `ShutdownRequest`, carrying its `request_id`.
    ShutdownResponse,
    /// Plan submitted for approval by another member.
    PlanApproval,
}

/// A typed envelope exchanged between members through the bus.
///
/// Messages are immutable once created; the bus clones them per recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier, `msg_` prefixed.
    pub id: String,
    pub message_type: MessageType,
    /// Sending member's name.
    pub from: String,
    /// Recipient member's name; empty means "route via topology".
    pub to: String,
    pub content: String,
    /// Pairs requests with responses; `req_` prefixed when present.
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// A point-to-point message. Pass an empty `to` to route via topology.
    pub fn direct(
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: ident::new_id(ident::MSG_PREFIX),
            message_type: MessageType::Direct,
            from: from.into(),
            to: to.into(),
            content: content.into(),
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    /// A broadcast to every member except the sender.
    pub fn broadcast(from: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: ident::new_id(ident::MSG_PREFIX),
            message_type: MessageType::Broadcast,
            from: from.into(),
            to: String::new(),
            content: content.into(),
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    /// A cooperative shutdown request with a fresh `req_` request ID.
    pub fn shutdown_request(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: ident::new_id(ident::MSG_PREFIX),
            message_type: MessageType::ShutdownRequest,
            from: from.into(),
            to: to.into(),
            content: reason.into(),
            request_id: Some(ident::new_id(ident::REQ_PREFIX)),
            timestamp: Utc::now(),
        }
    }

    /// The acknowledgement to a shutdown request, echoing its `request_id`.
    pub fn shutdown_response(
        from: impl Into<String>,
        to: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self {
            id: ident::new_id(ident::MSG_PREFIX),
            message_type: MessageType::ShutdownResponse,
            from: from.into(),
            to: to.into(),
            content: String::new(),
            request_id,
            timestamp: Utc::now(),
        }
    }

    /// A plan submitted to another member for approval.
    pub fn plan_approval(
        from: impl Into<String>,
        to: impl Into<String>,
        plan: impl Into<String>,
    ) -> Self {
        Self {
            id: ident::new_id(ident::MSG_PREFIX),
            message_type: MessageType::PlanApproval,
            from: from.into(),
            to: to.into(),
            content: plan.into(),
            request_id: Some(ident::new_id(ident::REQ_PREFIX)),
            timestamp: Utc::now(),
        }
    }
}

/// Errors produced by bus delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The named recipient has no registered inbox.
    MemberNotFound(String),
    /// The recipient's inbox is saturated; the message was not delivered.
    InboxFull(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::MemberNotFound(name) => write!(f, "Member not found: {}", name),
            BusError::InboxFull(name) => write!(f, "Inbox full for member: {}", name),
        }
    }
}

impl Error for BusError {}

/// The subscribe/send/broadcast fabric backed by bounded per-member channels.
pub struct MessageBus {
    subscribers: RwLock<HashMap<String, mpsc::Sender<Message>>>,
    topology: Arc<dyn Topology>,
}

impl MessageBus {
    /// Create a bus that consults `topology` for unaddressed messages.
    pub fn new(topology: Arc<dyn Topology>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            topology,
        }
    }

    /// Register `name` with a fresh bounded inbox of `buf` capacity and
    /// return its receive end.
    ///
    /// Re-subscribing an existing name replaces the old sender — the old
    /// inbox closes once in-flight holders drop, and pending messages on it
    /// are discarded with it. Subscribers wanting the previous contract
    /// should unsubscribe first.
    pub fn subscribe(&self, name: impl Into<String>, buf: usize) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(buf.max(1));
        let mut subscribers = self.subscribers.write().expect("bus lock");
        subscribers.insert(name.into(), tx);
        rx
    }

    /// Remove `name`'s inbox. Dropping the sender closes the channel exactly
    /// once; undelivered messages are discarded. No-op for unknown names.
    pub fn unsubscribe(&self, name: &str) {
        let mut subscribers = self.subscribers.write().expect("bus lock");
        subscribers.remove(name);
    }

    /// Deliver a message.
    ///
    /// With a non-empty `to`, delivers to exactly that recipient. With an
    /// empty `to`, asks the topology to route and delivers to each returned
    /// name, aborting on the first failure (no retry; attempt order
    /// unspecified).
    pub fn send(&self, message: Message) -> Result<(), BusError> {
        if !message.to.is_empty() {
            let to = message.to.clone();
            return self.deliver(&to, message);
        }
        let members = self.member_names();
        let targets = self.topology.route(&message.from, &message, &members);
        for target in targets {
            self.deliver(&target, message.clone())?;
        }
        Ok(())
    }

    /// Best-effort delivery to every member except `from`. Full or vanished
    /// inboxes are skipped silently (logged at debug level).
    pub fn broadcast(&self, message: Message) {
        let subscribers = self.subscribers.read().expect("bus lock");
        for (name, tx) in subscribers.iter() {
            if *name == message.from {
                continue;
            }
            if let Err(e) = tx.try_send(message.clone()) {
                log::debug!("broadcast to '{}' dropped: {}", name, drop_reason(&e));
            }
        }
    }

    /// Names of all current subscribers, sorted for deterministic iteration.
    pub fn member_names(&self) -> Vec<String> {
        let subscribers = self.subscribers.read().expect("bus lock");
        let mut names: Vec<String> = subscribers.keys().cloned().collect();
        names.sort();
        names
    }

    fn deliver(&self, to: &str, message: Message) -> Result<(), BusError> {
        let subscribers = self.subscribers.read().expect("bus lock");
        let tx = subscribers
            .get(to)
            .ok_or_else(|| BusError::MemberNotFound(to.to_string()))?;
        tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::InboxFull(to.to_string()),
            mpsc::error::TrySendError::Closed(_) => BusError::MemberNotFound(to.to_string()),
        })
    }
}

fn drop_reason(err: &mpsc::error::TrySendError<Message>) -> &'static str {
    match err {
        mpsc::error::TrySendError::Full(_) => "inbox full",
        mpsc::error::TrySendError::Closed(_) => "inbox closed",
    }
}
