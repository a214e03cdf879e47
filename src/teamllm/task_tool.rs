//! The `"Task"` tool: sub-agent spawning as a tool call.
//!
//! Adapts a [`SubagentRunner`] into a single invocable tool so a parent
//! agent can delegate work mid-conversation:
//!
//! ```json
//! {"tool_call": {"name": "Task", "parameters": {
//!     "agent_name": "researcher",
//!     "prompt": "Find prior art on bounded inboxes",
//!     "max_turns": 3
//! }}}
//! ```
//!
//! Registration goes through the agent's neutral
//! [`register_tool`](Agent::register_tool) hook rather than any direct
//! coupling between the runner and the tool layer, which keeps the
//! Task-tool ↔ Runner ↔ Agent triangle acyclic. The usual entry point is
//! [`Agent::with_subagents`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use teamllm::teamllm::agent::Agent;
//! use teamllm::teamllm::runner::SubagentDefinition;
//! # use teamllm::teamllm::client::ClientWrapper;
//! # fn demo(client: Arc<dyn ClientWrapper>) {
//! let parent = Agent::new("parent", client).with_subagents(vec![
//!     SubagentDefinition::new("researcher")
//!         .with_instructions("You research. You cite sources."),
//!     SubagentDefinition::new("summarizer").with_max_turns(2),
//! ]);
//! # }
//! ```
//!
//! Every failure — missing input, unknown definition, child error — comes
//! back as a tool-error result the LLM can read and react to.

use crate::teamllm::agent::Agent;
use crate::teamllm::runner::{SubagentDefinition, SubagentRunner, TASK_TOOL_NAME};
use crate::teamllm::tool_protocol::{ToolParameter, ToolParameterType, ToolResult};
use std::sync::Arc;

/// Placeholder returned when a sub-agent finishes without producing text.
const EMPTY_OUTPUT_PLACEHOLDER: &str = "(sub-agent completed with no output)";

impl Agent {
    /// Install a sub-agent runner on this agent and register the `"Task"`
    /// tool for it (builder pattern).
    ///
    /// The runner spawns children in this agent's context: same client, this
    /// agent's model as the default, this agent's tools as the inheritance
    /// base (minus `"Task"` itself).
    pub fn with_subagents(self, definitions: Vec<SubagentDefinition>) -> Self {
        self.with_on_init(|agent| {
            let runner = Arc::new(SubagentRunner::new(agent, definitions));
            register_task_tool(agent, runner);
        })
    }
}

/// Register the `"Task"` tool on `agent`, backed by `runner`.
///
/// Exposed for callers that build the runner themselves (custom
/// [`RunFunc`](crate::teamllm::runner::RunFunc), shared runners).
pub fn register_task_tool(agent: &Agent, runner: Arc<SubagentRunner>) {
    agent.register_tool(
        TASK_TOOL_NAME,
        "Delegate a prompt to a named sub-agent and return its final output.",
        vec![
            ToolParameter::new("agent_name", ToolParameterType::String)
                .with_description("Name of the sub-agent definition to spawn")
                .required(),
            ToolParameter::new("prompt", ToolParameterType::String)
                .with_description("The task for the sub-agent")
                .required(),
            ToolParameter::new("max_turns", ToolParameterType::Integer)
                .with_description("Optional cap on the sub-agent's tool iterations"),
        ],
        Arc::new(move |params, cancel| {
            let runner = Arc::clone(&runner);
            Box::pin(async move {
                let agent_name = params
                    .get("agent_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if agent_name.is_empty() {
                    return Ok(ToolResult::failure("agent_name is required"));
                }
                let prompt = params
                    .get("prompt")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if prompt.is_empty() {
                    return Ok(ToolResult::failure("prompt is required"));
                }
                let max_turns = params
                    .get("max_turns")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize);

                let run_id =
                    match runner.spawn_with_limits(&cancel, agent_name, prompt, max_turns) {
                        Ok(id) => id,
                        Err(e) => {
                            return Ok(ToolResult::failure(format!(
                                "failed to spawn sub-agent: {}",
                                e
                            )))
                        }
                    };

                match runner.wait(&cancel, &run_id).await {
                    Ok(result) => {
                        if let Some(error) = result.error {
                            return Ok(ToolResult::failure(format!(
                                "sub-agent failed: {}",
                                error
                            )));
                        }
                        let text = if result.output.is_empty() {
                            EMPTY_OUTPUT_PLACEHOLDER.to_string()
                        } else {
                            result.output
                        };
                        Ok(ToolResult::success(serde_json::Value::String(text)))
                    }
                    Err(e) => Ok(ToolResult::failure(format!(
                        "failed to wait for sub-agent: {}",
                        e
                    ))),
                }
            })
        }),
    );
}
