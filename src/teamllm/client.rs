//! Shared primitives for provider-agnostic LLM clients.
//!
//! The orchestration core never talks to a vendor API directly. It consumes
//! the [`ClientWrapper`] trait, which translates a chat-message array into a
//! provider's wire format and returns the assistant reply in a uniform shape.
//! The supporting structs describe chat messages and token accounting.
//!
//! A single `ClientWrapper` may serve many agents — the requested model is
//! passed per call, so a parent agent and the children it spawns can share
//! one client while running different models.
//!
//! # Example: a test double
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use teamllm::teamllm::client::{ClientWrapper, Message, Role, TokenUsage};
//!
//! struct CannedClient;
//!
//! #[async_trait]
//! impl ClientWrapper for CannedClient {
//!     async fn send_message(
//!         &self,
//!         _model: &str,
//!         _messages: &[Message],
//!     ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
//!         Ok(Message::assistant("canned reply"))
//!     }
//!
//!     fn model_name(&self) -> &str {
//!         "canned-1"
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;

/// Represents the possible roles for a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message.
    Assistant,
}

/// How many tokens were spent on prompt vs. completion?
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Fold another usage report into this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A generic chat message exchanged with an LLM.
///
/// The body is stored as `Arc<str>` so conversation histories can be cheaply
/// cloned when an agent's run loop snapshots them for a provider call.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body.
    pub content: Arc<str>,
}

impl Message {
    /// Build a message with the given role.
    pub fn new(role: Role, content: impl AsRef<str>) -> Self {
        Self {
            role,
            content: Arc::from(content.as_ref()),
        }
    }

    /// Shorthand for a system message.
    pub fn system(content: impl AsRef<str>) -> Self {
        Self::new(Role::System, content)
    }

    /// Shorthand for a user message.
    pub fn user(content: impl AsRef<str>) -> Self {
        Self::new(Role::User, content)
    }

    /// Shorthand for an assistant message.
    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Trait-driven abstraction for a concrete LLM provider.
///
/// A [`ClientWrapper`] translates requests into the provider specific wire
/// format and returns responses in a uniform shape. The abstraction
/// deliberately excludes conversation bookkeeping — the
/// [`Agent`](crate::teamllm::agent::Agent) owns its history.
///
/// All implementations must be thread-safe (`Send + Sync`) so they can be
/// shared between async tasks. Where a provider exposes token accounting,
/// wrappers should capture it and surface it via
/// [`get_last_usage`](ClientWrapper::get_last_usage); providers that can
/// price a call may additionally report it via
/// [`get_last_cost`](ClientWrapper::get_last_cost).
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response style chat completion.
    ///
    /// `model` selects the upstream model for this call; agents pass their
    /// configured model so one shared client can serve a whole team. The
    /// `messages` slice must include any system priming messages the caller
    /// wishes to send.
    async fn send_message(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Return the identifier of the provider's default model (e.g. `"gpt-4.1"`).
    ///
    /// Agents built without an explicit model override inherit this value.
    fn model_name(&self) -> &str;

    /// Token usage from the most recent [`send_message`](ClientWrapper::send_message)
    /// call, if the provider reports it. Defaults to `None`.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        None
    }

    /// Monetary cost (USD) of the most recent call, if the provider can
    /// price it. Defaults to `None`.
    async fn get_last_cost(&self) -> Option<f64> {
        None
    }
}
