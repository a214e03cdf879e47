//! Member-facing team tools.
//!
//! Every member's agent gets these registered at spawn time, closing over the
//! team's bus and task list plus the member's own name. They are the surface
//! through which an LLM participates in coordination: sending messages,
//! broadcasting, requesting another member's shutdown, and working the shared
//! task list.
//!
//! All failures — unknown recipients, full inboxes, task errors — come back
//! as tool-error results rather than bubbling up, so the LLM can observe and
//! recover.

use crate::teamllm::agent::Agent;
use crate::teamllm::bus::{Message, MessageBus};
use crate::teamllm::task_list::{TaskError, TaskFilter, TaskList, TaskPatch, TaskStatus};
use crate::teamllm::tool_protocol::{ToolParameter, ToolParameterType, ToolResult};
use std::sync::Arc;

/// Register the full team tool set on `agent` for the member named `member_name`.
pub(crate) fn register_team_tools(
    agent: &Agent,
    member_name: &str,
    bus: &Arc<MessageBus>,
    task_list: &Arc<TaskList>,
) {
    register_send_message(agent, member_name, bus);
    register_broadcast(agent, member_name, bus);
    register_shutdown_request(agent, member_name, bus);
    register_task_create(agent, task_list);
    register_task_update(agent, task_list);
    register_task_get(agent, task_list);
    register_task_list(agent, task_list);
}

fn str_field(params: &serde_json::Value, name: &str) -> Option<String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn register_send_message(agent: &Agent, member_name: &str, bus: &Arc<MessageBus>) {
    let from = member_name.to_string();
    let bus = Arc::clone(bus);
    agent.register_tool(
        "SendMessage",
        "Send a direct message to another team member.",
        vec![
            ToolParameter::new("recipient", ToolParameterType::String)
                .with_description("Name of the member to message")
                .required(),
            ToolParameter::new("content", ToolParameterType::String)
                .with_description("Message body")
                .required(),
        ],
        Arc::new(move |params, _cancel| {
            let from = from.clone();
            let bus = Arc::clone(&bus);
            Box::pin(async move {
                let recipient = str_field(&params, "recipient").unwrap_or_default();
                let content = str_field(&params, "content").unwrap_or_default();
                if recipient.is_empty() {
                    return Ok(ToolResult::failure("recipient is required"));
                }
                if content.is_empty() {
                    return Ok(ToolResult::failure("content is required"));
                }
                let message = Message::direct(from, recipient, content);
                let id = message.id.clone();
                match bus.send(message) {
                    Ok(()) => Ok(ToolResult::success(
                        serde_json::json!({"status": "sent", "message_id": id}),
                    )),
                    Err(e) => Ok(ToolResult::failure(format!(
                        "failed to send message: {}",
                        e
                    ))),
                }
            })
        }),
    );
}

fn register_broadcast(agent: &Agent, member_name: &str, bus: &Arc<MessageBus>) {
    let from = member_name.to_string();
    let bus = Arc::clone(bus);
    agent.register_tool(
        "Broadcast",
        "Send a message to every other team member (best-effort).",
        vec![ToolParameter::new("content", ToolParameterType::String)
            .with_description("Message body")
            .required()],
        Arc::new(move |params, _cancel| {
            let from = from.clone();
            let bus = Arc::clone(&bus);
            Box::pin(async move {
                let content = str_field(&params, "content").unwrap_or_default();
                if content.is_empty() {
                    return Ok(ToolResult::failure("content is required"));
                }
                bus.broadcast(Message::broadcast(from, content));
                Ok(ToolResult::success(
                    serde_json::json!({"status": "broadcast"}),
                ))
            })
        }),
    );
}

fn register_shutdown_request(agent: &Agent, member_name: &str, bus: &Arc<MessageBus>) {
    let from = member_name.to_string();
    let bus = Arc::clone(bus);
    agent.register_tool(
        "ShutdownRequest",
        "Ask another member to shut down gracefully. The member acknowledges \
         with a shutdown response carrying the same request ID.",
        vec![
            ToolParameter::new("recipient", ToolParameterType::String)
                .with_description("Name of the member to shut down")
                .required(),
            ToolParameter::new("reason", ToolParameterType::String)
                .with_description("Optional reason included in the request"),
        ],
        Arc::new(move |params, _cancel| {
            let from = from.clone();
            let bus = Arc::clone(&bus);
            Box::pin(async move {
                let recipient = str_field(&params, "recipient").unwrap_or_default();
                if recipient.is_empty() {
                    return Ok(ToolResult::failure("recipient is required"));
                }
                let reason = str_field(&params, "reason").unwrap_or_default();
                let message = Message::shutdown_request(from, recipient, reason);
                let request_id = message.request_id.clone();
                match bus.send(message) {
                    Ok(()) => Ok(ToolResult::success(
                        serde_json::json!({"status": "requested", "request_id": request_id}),
                    )),
                    Err(e) => Ok(ToolResult::failure(format!(
                        "failed to request shutdown: {}",
                        e
                    ))),
                }
            })
        }),
    );
}

fn register_task_create(agent: &Agent, task_list: &Arc<TaskList>) {
    let task_list = Arc::clone(task_list);
    agent.register_tool(
        "TaskCreate",
        "Add a task to the shared task list.",
        vec![
            ToolParameter::new("subject", ToolParameterType::String)
                .with_description("Short imperative summary")
                .required(),
            ToolParameter::new("description", ToolParameterType::String)
                .with_description("What needs to be done")
                .required(),
        ],
        Arc::new(move |params, _cancel| {
            let task_list = Arc::clone(&task_list);
            Box::pin(async move {
                let subject = str_field(&params, "subject").unwrap_or_default();
                if subject.is_empty() {
                    return Ok(ToolResult::failure("subject is required"));
                }
                let description = str_field(&params, "description").unwrap_or_default();
                let task = task_list.create(subject, description);
                Ok(ToolResult::success(serde_json::to_value(&task)?))
            })
        }),
    );
}

fn register_task_update(agent: &Agent, task_list: &Arc<TaskList>) {
    let task_list = Arc::clone(task_list);
    agent.register_tool(
        "TaskUpdate",
        "Update a task's status, owner, or subject.",
        vec![
            ToolParameter::new("task_id", ToolParameterType::String)
                .with_description("ID of the task to update")
                .required(),
            ToolParameter::new("status", ToolParameterType::String)
                .with_description("New status: pending, in_progress, completed, or deleted"),
            ToolParameter::new("owner", ToolParameterType::String)
                .with_description("New owner (member name)"),
            ToolParameter::new("subject", ToolParameterType::String)
                .with_description("New subject"),
        ],
        Arc::new(move |params, _cancel| {
            let task_list = Arc::clone(&task_list);
            Box::pin(async move {
                let task_id = str_field(&params, "task_id").unwrap_or_default();
                if task_id.is_empty() {
                    return Ok(ToolResult::failure("task_id is required"));
                }
                let status = match str_field(&params, "status") {
                    Some(raw) => match TaskStatus::parse(&raw) {
                        Some(status) => Some(status),
                        None => {
                            return Ok(ToolResult::failure(
                                TaskError::InvalidStatus(raw).to_string(),
                            ))
                        }
                    },
                    None => None,
                };
                let patch = TaskPatch {
                    subject: str_field(&params, "subject"),
                    status,
                    owner: str_field(&params, "owner"),
                    ..Default::default()
                };
                match task_list.update(&task_id, patch) {
                    Ok(task) => Ok(ToolResult::success(serde_json::to_value(&task)?)),
                    Err(e) => Ok(ToolResult::failure(e.to_string())),
                }
            })
        }),
    );
}

fn register_task_get(agent: &Agent, task_list: &Arc<TaskList>) {
    let task_list = Arc::clone(task_list);
    agent.register_tool(
        "TaskGet",
        "Fetch a task by ID.",
        vec![ToolParameter::new("task_id", ToolParameterType::String)
            .with_description("ID of the task to fetch")
            .required()],
        Arc::new(move |params, _cancel| {
            let task_list = Arc::clone(&task_list);
            Box::pin(async move {
                let task_id = str_field(&params, "task_id").unwrap_or_default();
                if task_id.is_empty() {
                    return Ok(ToolResult::failure("task_id is required"));
                }
                match task_list.get(&task_id) {
                    Ok(task) => Ok(ToolResult::success(serde_json::to_value(&task)?)),
                    Err(e) => Ok(ToolResult::failure(e.to_string())),
                }
            })
        }),
    );
}

fn register_task_list(agent: &Agent, task_list: &Arc<TaskList>) {
    let task_list = Arc::clone(task_list);
    agent.register_tool(
        "TaskList",
        "List all tasks on the shared task list.",
        Vec::new(),
        Arc::new(move |_params, _cancel| {
            let task_list = Arc::clone(&task_list);
            Box::pin(async move {
                let tasks = task_list.list(TaskFilter::default());
                Ok(ToolResult::success(serde_json::to_value(&tasks)?))
            })
        }),
    );
}
