//! Agent System
//!
//! This module provides the [`Agent`] struct: a single-conversation LLM
//! client wrapped with identity, a system prompt, a mutable tool registry,
//! and a cancellable, event-producing [`run`](Agent::run).
//!
//! Agents are the unit everything else composes:
//! - A [`Member`](crate::teamllm::member::Member) feeds inbox messages into
//!   its agent's `run` and forwards the events to the team stream.
//! - The [`SubagentRunner`](crate::teamllm::runner::SubagentRunner) builds
//!   child agents from definitions and drains their streams.
//!
//! # Tool Loop
//!
//! After each provider round-trip the response is scanned for a JSON
//! fragment of the form `{"tool_call": {"name": "...", "parameters": {...}}}`.
//! When one is found, the tool is executed through the agent's
//! [`ToolRegistry`], the result is fed back as a follow-up message, and the
//! provider is called again. The loop is capped by `max_turns` (default 5)
//! and, when configured, by `max_budget` in USD.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures_util::StreamExt;
//! use tokio_util::sync::CancellationToken;
//! use teamllm::teamllm::agent::Agent;
//! # use teamllm::teamllm::client::ClientWrapper;
//! # async fn demo(client: Arc<dyn ClientWrapper>) {
//! let agent = Agent::new("analyst", client)
//!     .with_system_prompt("You are a terse analyst.")
//!     .with_max_turns(3);
//!
//! let mut stream = agent.run(CancellationToken::new(), "Summarize the data");
//! while let Some(event) = stream.next().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use crate::teamllm::client::{ClientWrapper, Message, TokenUsage};
use crate::teamllm::event::{AgentEvent, AgentEventStream, RunOutcome};
use crate::teamllm::ident;
use crate::teamllm::tool_protocol::{ToolHandler, ToolMetadata, ToolParameter, ToolRegistry};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Default cap on tool iterations within a single run.
const DEFAULT_MAX_TURNS: usize = 5;

/// Capacity of the event channel backing one run's stream.
const EVENT_BUFFER: usize = 64;

/// A parsed tool call extracted from an LLM response.
#[derive(Debug, Clone)]
struct ToolCall {
    name: String,
    parameters: serde_json::Value,
}

/// An LLM-powered agent with identity, a rolling conversation history, and
/// tool access.
///
/// Construction follows the builder pattern; every `with_*` method consumes
/// and returns `self`. The agent is cheap to share pieces of: the client,
/// history, and registry all live behind `Arc`, so [`run`](Agent::run) can
/// hand them to a background task without borrowing `self`.
pub struct Agent {
    /// Stable identifier, `agent_` prefixed.
    pub id: String,
    /// Name referenced in team coordination and event labels.
    pub name: String,
    model: String,
    system_prompt: String,
    max_turns: usize,
    max_budget: Option<f64>,
    client: Arc<dyn ClientWrapper>,
    history: Arc<Mutex<Vec<Message>>>,
    tool_registry: Arc<ToolRegistry>,
}

impl Agent {
    /// Create an agent backed by the given provider client.
    ///
    /// The model defaults to the client's [`model_name`](ClientWrapper::model_name);
    /// the system prompt starts empty; the tool registry starts empty.
    pub fn new(name: impl Into<String>, client: Arc<dyn ClientWrapper>) -> Self {
        let model = client.model_name().to_string();
        Self {
            id: ident::new_id(ident::AGENT_PREFIX),
            name: name.into(),
            model,
            system_prompt: String::new(),
            max_turns: DEFAULT_MAX_TURNS,
            max_budget: None,
            client,
            history: Arc::new(Mutex::new(Vec::new())),
            tool_registry: Arc::new(ToolRegistry::new()),
        }
    }

    /// Override the model requested from the provider (builder pattern).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the system prompt (builder pattern).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Append additional instructions to the system prompt (builder pattern).
    ///
    /// Used by the sub-agent runner to apply a definition's `instructions`
    /// on top of whatever base prompt the child starts from.
    pub fn with_instructions(mut self, instructions: impl AsRef<str>) -> Self {
        let instructions = instructions.as_ref();
        if instructions.is_empty() {
            return self;
        }
        if !self.system_prompt.is_empty() {
            self.system_prompt.push_str("\n\n");
        }
        self.system_prompt.push_str(instructions);
        self
    }

    /// Cap tool iterations per run (builder pattern). Zero means no tool calls.
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Cap cumulative provider cost per run, in USD (builder pattern).
    ///
    /// Only effective when the client reports cost via
    /// [`get_last_cost`](ClientWrapper::get_last_cost).
    pub fn with_max_budget(mut self, max_budget: f64) -> Self {
        self.max_budget = Some(max_budget);
        self
    }

    /// Share a tool registry with this agent (builder pattern).
    ///
    /// Registrations through the shared handle are visible to every agent
    /// holding it.
    pub fn with_tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tool_registry = registry;
        self
    }

    /// Run an arbitrary hook against the partially built agent (builder
    /// pattern). This is the seam init-time extensions hang off — a hook can
    /// inspect the agent and register tools against its registry.
    pub fn with_on_init<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut Agent),
    {
        hook(&mut self);
        self
    }

    /// Register a tool directly on this agent's registry.
    ///
    /// This is the raw registration hook: a name, a description, a parameter
    /// list, and an async handler. Subsystems that expose themselves as tools
    /// (the sub-agent runner, the team tools) go through here rather than
    /// depending on each other's modules.
    pub fn register_tool(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ToolParameter>,
        handler: ToolHandler,
    ) {
        let mut metadata = ToolMetadata::new(name, description);
        for param in parameters {
            metadata = metadata.with_parameter(param);
        }
        self.tool_registry.register(metadata, handler);
    }

    /// The model this agent requests from the provider.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Borrow the underlying provider client.
    pub fn client(&self) -> &Arc<dyn ClientWrapper> {
        &self.client
    }

    /// The agent's mutable tool registry.
    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.tool_registry
    }

    /// Process one prompt, returning a stream of events.
    ///
    /// The stream yields progress events ([`AgentEvent::TextDelta`],
    /// [`AgentEvent::ToolCallStarted`], [`AgentEvent::ToolCallCompleted`])
    /// and always terminates with exactly one [`AgentEvent::Result`] — on
    /// success, provider failure, or cancellation alike.
    ///
    /// Conversation history persists across `run` calls, so successive
    /// prompts see prior context. Runs against the same agent serialize on
    /// the history lock; callers are expected to drain one stream before
    /// starting the next run.
    pub fn run(&self, cancel: CancellationToken, prompt: impl Into<String>) -> AgentEventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let driver = RunDriver {
            agent_name: self.name.clone(),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            max_turns: self.max_turns,
            max_budget: self.max_budget,
            client: Arc::clone(&self.client),
            history: Arc::clone(&self.history),
            registry: Arc::clone(&self.tool_registry),
        };
        let prompt = prompt.into();
        tokio::spawn(async move {
            let outcome = driver.drive(cancel, prompt, &tx).await;
            // Terminal event; receiver may already be gone, which is fine.
            let _ = tx.send(AgentEvent::Result(outcome)).await;
        });
        AgentEventStream::new(rx)
    }
}

/// Everything one run needs, detached from the `Agent` borrow.
struct RunDriver {
    agent_name: String,
    model: String,
    system_prompt: String,
    max_turns: usize,
    max_budget: Option<f64>,
    client: Arc<dyn ClientWrapper>,
    history: Arc<Mutex<Vec<Message>>>,
    registry: Arc<ToolRegistry>,
}

impl RunDriver {
    async fn drive(
        &self,
        cancel: CancellationToken,
        prompt: String,
        events: &mpsc::Sender<AgentEvent>,
    ) -> RunOutcome {
        let mut history = self.history.lock().await;

        let mut usage_total = TokenUsage::default();
        let mut saw_usage = false;
        let mut cost_total = 0.0f64;
        let mut saw_cost = false;
        let mut tool_iteration = 0usize;

        history.push(Message::user(self.first_message(&prompt)));

        let mut final_text;
        loop {
            let request = self.snapshot(&history);
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("agent '{}' run cancelled", self.agent_name);
                    return self.outcome(
                        String::new(),
                        &usage_total, saw_usage, cost_total, saw_cost,
                        Some("run cancelled".to_string()),
                    );
                }
                result = self.client.send_message(&self.model, &request) => match result {
                    Ok(message) => message,
                    Err(e) => {
                        log::error!("agent '{}' provider call failed: {}", self.agent_name, e);
                        return self.outcome(
                            String::new(),
                            &usage_total, saw_usage, cost_total, saw_cost,
                            Some(e.to_string()),
                        );
                    }
                },
            };

            if let Some(usage) = self.client.get_last_usage().await {
                usage_total.accumulate(&usage);
                saw_usage = true;
            }
            if let Some(cost) = self.client.get_last_cost().await {
                cost_total += cost;
                saw_cost = true;
            }

            let content = response.content.to_string();
            let _ = events
                .send(AgentEvent::TextDelta {
                    text: content.clone(),
                })
                .await;
            history.push(Message::assistant(&content));

            let tool_call = match parse_tool_call(&content) {
                Some(call) => call,
                None => {
                    final_text = content;
                    break;
                }
            };

            if tool_iteration >= self.max_turns {
                final_text = format!(
                    "{}\n\n[Warning: Maximum tool iterations reached]",
                    content
                );
                break;
            }
            if let Some(budget) = self.max_budget {
                if saw_cost && cost_total >= budget {
                    final_text = format!("{}\n\n[Warning: Budget exhausted]", content);
                    break;
                }
            }
            tool_iteration += 1;

            let _ = events
                .send(AgentEvent::ToolCallStarted {
                    tool_name: tool_call.name.clone(),
                    parameters: tool_call.parameters.clone(),
                    iteration: tool_iteration,
                })
                .await;

            let tool_result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("agent '{}' cancelled during tool execution", self.agent_name);
                    return self.outcome(
                        String::new(),
                        &usage_total, saw_usage, cost_total, saw_cost,
                        Some("run cancelled".to_string()),
                    );
                }
                result = self
                    .registry
                    .execute(&tool_call.name, tool_call.parameters.clone(), cancel.clone()) => result,
            };

            let (follow_up, success, error) = match &tool_result {
                Ok(result) if result.success => (
                    format!(
                        "Tool '{}' executed successfully. Result: {}",
                        tool_call.name,
                        serde_json::to_string_pretty(&result.output)
                            .unwrap_or_else(|_| format!("{:?}", result.output))
                    ),
                    true,
                    None,
                ),
                Ok(result) => {
                    let err = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string());
                    (
                        format!("Tool '{}' failed. Error: {}", tool_call.name, err),
                        false,
                        Some(err),
                    )
                }
                Err(e) => (
                    format!("Tool execution error: {}", e),
                    false,
                    Some(e.to_string()),
                ),
            };

            let _ = events
                .send(AgentEvent::ToolCallCompleted {
                    tool_name: tool_call.name.clone(),
                    success,
                    error,
                    iteration: tool_iteration,
                })
                .await;

            history.push(Message::user(follow_up));
        }

        self.outcome(final_text, &usage_total, saw_usage, cost_total, saw_cost, None)
    }

    /// First user message of a run: the prompt plus, when tools are
    /// registered, a listing the LLM can call them from.
    fn first_message(&self, prompt: &str) -> String {
        let tools = self.registry.list_tools();
        if tools.is_empty() {
            return prompt.to_string();
        }
        let mut message = prompt.to_string();
        message.push_str("\n\nYou have access to the following tools:\n");
        for metadata in &tools {
            message.push_str(&format!("- {}: {}\n", metadata.name, metadata.description));
            if !metadata.parameters.is_empty() {
                message.push_str("  Parameters:\n");
                for param in &metadata.parameters {
                    message.push_str(&format!(
                        "    - {} ({:?}): {}\n",
                        param.name,
                        param.param_type,
                        param.description.as_deref().unwrap_or("No description")
                    ));
                }
            }
        }
        message.push_str(
            "\nTo use a tool, respond with a JSON object in the following format:\n\
             {\"tool_call\": {\"name\": \"tool_name\", \"parameters\": {...}}}\n\
             After tool execution, I'll provide the result and you can continue.\n",
        );
        message
    }

    fn snapshot(&self, history: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(&self.system_prompt));
        }
        messages.extend_from_slice(history);
        messages
    }

    fn outcome(
        &self,
        text: String,
        usage: &TokenUsage,
        saw_usage: bool,
        cost: f64,
        saw_cost: bool,
        error: Option<String>,
    ) -> RunOutcome {
        RunOutcome {
            text,
            usage: if saw_usage { Some(usage.clone()) } else { None },
            cost: if saw_cost { Some(cost) } else { None },
            error,
        }
    }
}

/// Parse a tool call from an LLM response.
///
/// Scans for `{"tool_call": {"name": "...", "parameters": {...}}}` using
/// brace-counting to find the matching closing brace rather than parsing the
/// entire response as JSON — the common case is a tool call wrapped in
/// surrounding prose. Only the first tool call is extracted.
fn parse_tool_call(response: &str) -> Option<ToolCall> {
    let start_idx = response.find("{\"tool_call\"")?;

    let mut brace_count = 0;
    let mut end_idx = start_idx;
    for (i, ch) in response.char_indices().skip_while(|(i, _)| *i < start_idx) {
        if ch == '{' {
            brace_count += 1;
        } else if ch == '}' {
            brace_count -= 1;
            if brace_count == 0 {
                end_idx = i + 1;
                break;
            }
        }
    }

    if end_idx <= start_idx {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_str(&response[start_idx..end_idx]).ok()?;
    let tool_call = parsed.get("tool_call")?;
    let name = tool_call.get("name")?.as_str()?;
    let parameters = tool_call.get("parameters")?;
    Some(ToolCall {
        name: name.to_string(),
        parameters: parameters.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_call_in_prose() {
        let response = r#"Let me check. {"tool_call": {"name": "add", "parameters": {"a": 1, "b": 2}}} One moment."#;
        let call = parse_tool_call(response).unwrap();
        assert_eq!(call.name, "add");
        assert_eq!(call.parameters["a"], 1);
    }

    #[test]
    fn test_parse_tool_call_absent() {
        assert!(parse_tool_call("Just a plain answer.").is_none());
        assert!(parse_tool_call(r#"{"tool_call": {"name": "x"}}"#).is_none());
    }

    #[test]
    fn test_instructions_append() {
        struct Dummy;
        #[async_trait::async_trait]
        impl crate::teamllm::client::ClientWrapper for Dummy {
            async fn send_message(
                &self,
                _model: &str,
                _messages: &[Message],
            ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
                Ok(Message::assistant("ok"))
            }
            fn model_name(&self) -> &str {
                "dummy"
            }
        }

        let agent = Agent::new("a", Arc::new(Dummy))
            .with_system_prompt("Base.")
            .with_instructions("Extra.");
        assert_eq!(agent.system_prompt, "Base.\n\nExtra.");
        assert!(agent.id.starts_with("agent_"));
    }
}
