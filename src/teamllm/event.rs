//! Agent and team event streams.
//!
//! An [`Agent::run`](crate::teamllm::agent::Agent::run) call produces an
//! [`AgentEventStream`]: zero or more progress events followed by exactly one
//! terminal [`AgentEvent::Result`]. A [`Team`](crate::teamllm::team::Team)
//! fans the streams of all of its members into a single [`TeamStream`] whose
//! items are [`TeamEvent`]s labeled with the producing member's name.
//!
//! Both stream types implement [`futures_util::Stream`], so they are drained
//! with `StreamExt::next()`:
//!
//! ```rust,no_run
//! # use futures_util::StreamExt;
//! # async fn demo(mut stream: teamllm::teamllm::event::TeamStream) {
//! while let Some(event) = stream.next().await {
//!     println!("[{}] {:?}", event.member_name, event.event);
//! }
//! # }
//! ```

use crate::teamllm::client::TokenUsage;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Terminal outcome of one agent run.
///
/// Exactly one `RunOutcome` is produced per [`AgentEvent::Result`]; it carries
/// the final text, cumulative token usage, monetary cost where the provider
/// reports one, and the error flag.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Final message content produced across tool iterations.
    pub text: String,
    /// Cumulative token usage across all provider calls in this run.
    pub usage: Option<TokenUsage>,
    /// Cumulative monetary cost (USD), when the provider prices calls.
    pub cost: Option<f64>,
    /// Error description when the run failed; `None` on success.
    pub error: Option<String>,
}

impl RunOutcome {
    /// True when the run ended in an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Events emitted by an agent while processing one prompt.
///
/// The stream shape is: any number of [`TextDelta`](AgentEvent::TextDelta) /
/// [`ToolCallStarted`](AgentEvent::ToolCallStarted) /
/// [`ToolCallCompleted`](AgentEvent::ToolCallCompleted) events, then exactly
/// one [`Result`](AgentEvent::Result), then end of stream.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A chunk of assistant text. One delta is emitted per provider
    /// round-trip; streaming providers may emit many.
    TextDelta {
        /// The incremental content.
        text: String,
    },

    /// A tool call was parsed from the assistant response and is about to
    /// execute.
    ToolCallStarted {
        /// Name of the tool being invoked.
        tool_name: String,
        /// Raw JSON parameters extracted from the assistant's request.
        parameters: serde_json::Value,
        /// 1-based tool iteration within this run.
        iteration: usize,
    },

    /// A tool finished executing (success or failure).
    ToolCallCompleted {
        /// Name of the tool that ran.
        tool_name: String,
        /// `true` when the tool reported success.
        success: bool,
        /// Error message on failure, `None` on success.
        error: Option<String>,
        /// 1-based tool iteration matching the corresponding
        /// [`ToolCallStarted`](AgentEvent::ToolCallStarted).
        iteration: usize,
    },

    /// Terminal event: the run finished. Always the last event on the stream.
    Result(RunOutcome),
}

/// An [`AgentEvent`] labeled with the member that produced it.
#[derive(Debug, Clone)]
pub struct TeamEvent {
    /// Name of the member whose agent produced the event.
    pub member_name: String,
    /// The underlying agent event.
    pub event: AgentEvent,
}

/// Stream of events from a single agent run.
///
/// Ends after the terminal [`AgentEvent::Result`] is yielded and the
/// producing task drops its sender.
pub struct AgentEventStream {
    rx: mpsc::Receiver<AgentEvent>,
}

impl AgentEventStream {
    pub(crate) fn new(rx: mpsc::Receiver<AgentEvent>) -> Self {
        Self { rx }
    }

    /// Drain the stream, discarding progress events, and return the terminal
    /// outcome. Used by callers that only care about the final result.
    pub async fn collect_result(mut self) -> RunOutcome {
        use futures_util::StreamExt;
        let mut outcome = RunOutcome::default();
        while let Some(event) = self.next().await {
            if let AgentEvent::Result(result) = event {
                outcome = result;
            }
        }
        outcome
    }
}

impl Stream for AgentEventStream {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Aggregated stream of events from every member of a team.
///
/// Closes after [`Team::shutdown`](crate::teamllm::team::Team::shutdown) once
/// every member task has exited and dropped its sender.
pub struct TeamStream {
    rx: mpsc::Receiver<TeamEvent>,
}

impl TeamStream {
    pub(crate) fn new(rx: mpsc::Receiver<TeamEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for TeamStream {
    type Item = TeamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
