// src/lib.rs

// Import the top-level `teamllm` module.
pub mod teamllm;

// Re-exporting key items for easier external access.
pub use teamllm::agent::Agent;
pub use teamllm::client::{ClientWrapper, Message as ChatMessage, Role, TokenUsage};
pub use teamllm::event::{AgentEvent, TeamEvent};
pub use teamllm::runner::{RunResult, SubagentDefinition, SubagentRunner};
pub use teamllm::team::{Team, TeamOptions};
