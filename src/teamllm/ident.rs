//! Prefixed opaque identifiers.
//!
//! Every entity in the runtime carries an ID whose prefix names its kind:
//! `team_`, `agent_`, `run_`, `task_`, `msg_`, `req_`. The payload after the
//! prefix is an opaque v4 UUID in simple (dashless) form. Callers must treat
//! IDs as opaque strings; only the prefix is stable API.

use uuid::Uuid;

/// Prefix for team IDs.
pub const TEAM_PREFIX: &str = "team_";
/// Prefix for member/agent IDs.
pub const AGENT_PREFIX: &str = "agent_";
/// Prefix for sub-agent run IDs.
pub const RUN_PREFIX: &str = "run_";
/// Prefix for task IDs.
pub const TASK_PREFIX: &str = "task_";
/// Prefix for message IDs.
pub const MSG_PREFIX: &str = "msg_";
/// Prefix for request IDs pairing requests with responses.
pub const REQ_PREFIX: &str = "req_";

/// Generate a fresh ID with the given prefix.
///
/// # Example
///
/// ```
/// use teamllm::teamllm::ident;
///
/// let id = ident::new_id(ident::RUN_PREFIX);
/// assert!(id.starts_with("run_"));
/// ```
pub fn new_id(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}
