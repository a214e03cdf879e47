//! Sub-agent Runner
//!
//! Spawns independent child conversations from named
//! [`SubagentDefinition`]s, tracks them by opaque `run_` IDs, and collects
//! their results. The runner is the machinery behind the `"Task"` tool: a
//! parent agent delegates a prompt, a child agent runs it to completion in
//! the background, and the parent waits for the single [`RunResult`].
//!
//! # Lifecycle
//!
//! ```text
//! spawn ──► run handle registered, child task launched
//!             │ child token derived from the caller's token
//! wait ───► first caller takes the result; the handle is removed,
//!             a second wait on the same ID fails with RunNotFound
//! cancel ─► best-effort child-token cancel; wait still completes
//! ```
//!
//! The child-execution function is injectable ([`RunFunc`]) so tests can
//! replace the real drain-the-event-stream implementation with a stub. The
//! default implementation drains the child's stream and records the terminal
//! result event's text, usage, and cost.

use crate::teamllm::agent::Agent;
use crate::teamllm::client::{ClientWrapper, TokenUsage};
use crate::teamllm::ident;
use crate::teamllm::tool_protocol::ToolRegistry;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Name under which the runner's tool registers on the parent agent.
/// Children never inherit it — sub-agents do not spawn sub-agents.
pub const TASK_TOOL_NAME: &str = "Task";

/// Named template for spawning a child agent.
#[derive(Debug, Clone, Default)]
pub struct SubagentDefinition {
    /// Name the parent's `"Task"` tool refers to this definition by.
    pub name: String,
    /// Model override; `None` inherits the parent's model.
    pub model: Option<String>,
    /// Instructions appended to the child's system prompt.
    pub instructions: Option<String>,
    /// Tool-name whitelist; `None` inherits the parent's tools (minus the
    /// `"Task"` tool itself).
    pub tools: Option<Vec<String>>,
    /// Per-run cap on tool iterations.
    pub max_turns: Option<usize>,
    /// Per-run cap on provider cost, USD.
    pub max_budget: Option<f64>,
}

impl SubagentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_max_budget(mut self, max_budget: f64) -> Self {
        self.max_budget = Some(max_budget);
        self
    }
}

/// The single result of one child run.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    /// The child's final output text.
    pub output: String,
    /// Token usage across the child's provider calls.
    pub usage: Option<TokenUsage>,
    /// Provider cost (USD) when reported.
    pub cost: Option<f64>,
    /// Error description when the child run failed.
    pub error: Option<String>,
}

/// Errors produced by runner operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// No definition registered under the requested name.
    DefinitionNotFound(String),
    /// No active run with the given ID (never spawned, already waited, or
    /// cancelled away).
    RunNotFound(String),
    /// The wait was cancelled; the child's token was cancelled with it.
    RunCancelled(String),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::DefinitionNotFound(name) => {
                write!(f, "definition not found: {}", name)
            }
            RunnerError::RunNotFound(id) => write!(f, "run not found: {}", id),
            RunnerError::RunCancelled(id) => write!(f, "run cancelled: {}", id),
        }
    }
}

impl Error for RunnerError {}

/// Pluggable child-execution function.
///
/// Receives the child's cancellation token, the freshly built child agent,
/// and the prompt; resolves to the run's single result. Injectable so tests
/// never need a live provider.
pub type RunFunc =
    Arc<dyn Fn(CancellationToken, Agent, String) -> BoxFuture<'static, RunResult> + Send + Sync>;

struct RunHandle {
    cancel: CancellationToken,
    /// Capacity-1 receive end; taken by the first `wait`. The sender side
    /// always completes its send even if nobody ever waits.
    rx: Option<mpsc::Receiver<RunResult>>,
}

/// Lifecycle manager for spawned child agents.
pub struct SubagentRunner {
    parent_model: String,
    parent_client: Arc<dyn ClientWrapper>,
    parent_tools: Arc<ToolRegistry>,
    definitions: HashMap<String, SubagentDefinition>,
    active: Mutex<HashMap<String, RunHandle>>,
    run_func: RunFunc,
}

impl SubagentRunner {
    /// Build a runner that spawns children in the parent agent's context:
    /// same client, parent's model as the default, parent's tools as the
    /// inheritance base.
    pub fn new(parent: &Agent, definitions: Vec<SubagentDefinition>) -> Self {
        Self {
            parent_model: parent.model().to_string(),
            parent_client: Arc::clone(parent.client()),
            parent_tools: Arc::clone(parent.tool_registry()),
            definitions: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            active: Mutex::new(HashMap::new()),
            run_func: default_run_func(),
        }
    }

    /// Replace the child-execution function (builder pattern).
    pub fn with_run_func(mut self, run_func: RunFunc) -> Self {
        self.run_func = run_func;
        self
    }

    /// Spawn a child run from the named definition.
    ///
    /// Returns the fresh `run_` ID immediately; the child executes in a
    /// background task whose cancellation token derives from `cancel`.
    pub fn spawn(
        &self,
        cancel: &CancellationToken,
        name: &str,
        prompt: &str,
    ) -> Result<String, RunnerError> {
        self.spawn_with_limits(cancel, name, prompt, None)
    }

    /// [`spawn`](SubagentRunner::spawn) with a per-run `max_turns` override
    /// on top of the definition's own cap. Used by the `"Task"` tool's
    /// optional `max_turns` input.
    pub fn spawn_with_limits(
        &self,
        cancel: &CancellationToken,
        name: &str,
        prompt: &str,
        max_turns: Option<usize>,
    ) -> Result<String, RunnerError> {
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| RunnerError::DefinitionNotFound(name.to_string()))?;

        let agent = self.build_child(definition, max_turns);
        let run_id = ident::new_id(ident::RUN_PREFIX);
        let child_cancel = cancel.child_token();
        let (tx, rx) = mpsc::channel(1);

        {
            let mut active = self.active.lock().expect("runner lock");
            active.insert(
                run_id.clone(),
                RunHandle {
                    cancel: child_cancel.clone(),
                    rx: Some(rx),
                },
            );
        }

        log::info!("spawned sub-agent '{}' as {}", name, run_id);
        let future = (self.run_func)(child_cancel, agent, prompt.to_string());
        tokio::spawn(async move {
            let result = future.await;
            // Capacity-1 channel: the send completes even if wait never comes.
            let _ = tx.send(result).await;
        });

        Ok(run_id)
    }

    /// Wait for a run's result, or for `cancel`.
    ///
    /// On cancellation the child's token is cancelled too and the call fails
    /// with [`RunnerError::RunCancelled`]. Either way the handle is removed:
    /// a second `wait` on the same ID fails with
    /// [`RunnerError::RunNotFound`].
    pub async fn wait(
        &self,
        cancel: &CancellationToken,
        run_id: &str,
    ) -> Result<RunResult, RunnerError> {
        let (child_cancel, mut rx) = {
            let mut active = self.active.lock().expect("runner lock");
            let handle = active
                .get_mut(run_id)
                .ok_or_else(|| RunnerError::RunNotFound(run_id.to_string()))?;
            match handle.rx.take() {
                Some(rx) => (handle.cancel.clone(), rx),
                // Another wait is already in flight for this run.
                None => return Err(RunnerError::RunNotFound(run_id.to_string())),
            }
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                child_cancel.cancel();
                Err(RunnerError::RunCancelled(run_id.to_string()))
            }
            received = rx.recv() => match received {
                Some(result) => Ok(result),
                // Child task died without delivering; surface as an errored result.
                None => Ok(RunResult {
                    error: Some("sub-agent terminated without a result".to_string()),
                    ..Default::default()
                }),
            },
        };

        let mut active = self.active.lock().expect("runner lock");
        active.remove(run_id);
        outcome
    }

    /// Best-effort cancel of a run's child token. No-op for unknown IDs;
    /// the run handle stays until a `wait` consumes it.
    pub fn cancel(&self, run_id: &str) {
        let active = self.active.lock().expect("runner lock");
        if let Some(handle) = active.get(run_id) {
            handle.cancel.cancel();
            log::info!("cancelled sub-agent run {}", run_id);
        }
    }

    /// Number of runs currently tracked.
    pub fn active(&self) -> usize {
        self.active.lock().expect("runner lock").len()
    }

    /// The registered definitions, sorted by name.
    pub fn definitions(&self) -> Vec<SubagentDefinition> {
        let mut defs: Vec<SubagentDefinition> = self.definitions.values().cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    fn build_child(&self, definition: &SubagentDefinition, max_turns: Option<usize>) -> Agent {
        let mut agent = Agent::new(definition.name.clone(), Arc::clone(&self.parent_client));

        let model = definition
            .model
            .clone()
            .unwrap_or_else(|| self.parent_model.clone());
        agent = agent.with_model(model);

        if let Some(instructions) = &definition.instructions {
            agent = agent.with_instructions(instructions);
        }
        if let Some(turns) = max_turns.or(definition.max_turns) {
            agent = agent.with_max_turns(turns);
        }
        if let Some(budget) = definition.max_budget {
            agent = agent.with_max_budget(budget);
        }

        let registry = match &definition.tools {
            Some(whitelist) => self.parent_tools.subset(whitelist),
            None => {
                let inherited: Vec<String> = self
                    .parent_tools
                    .list_tools()
                    .into_iter()
                    .map(|m| m.name)
                    .filter(|name| name != TASK_TOOL_NAME)
                    .collect();
                self.parent_tools.subset(&inherited)
            }
        };
        agent.with_tools(Arc::new(registry))
    }
}

/// The production child-execution function: drain the child's event stream
/// and keep the terminal result's text, usage, and cost.
fn default_run_func() -> RunFunc {
    Arc::new(|cancel, agent, prompt| {
        Box::pin(async move {
            let outcome = agent.run(cancel, prompt).collect_result().await;
            RunResult {
                output: outcome.text,
                usage: outcome.usage,
                cost: outcome.cost,
                error: outcome.error,
            }
        })
    })
}
