//! Tool registration and execution.
//!
//! Tools are how agents act on the world — and, in a team, how members send
//! messages, manage the shared task list, and spawn sub-agents. This module
//! provides the neutral registration surface those subsystems plug into:
//! a tool is a name, a description, a list of typed parameters, and an async
//! handler. Nothing here depends on the team or runner modules, which is what
//! lets the sub-agent subsystem register its `"Task"` tool without a module
//! cycle.
//!
//! # Architecture
//!
//! ```text
//! Agent → ToolRegistry → { name → (ToolMetadata, ToolHandler) }
//!            ↓ execute(name, params)
//!         ToolResult (success | failure, JSON output)
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use teamllm::teamllm::tool_protocol::{
//!     ToolMetadata, ToolParameter, ToolParameterType, ToolRegistry, ToolResult,
//! };
//!
//! let registry = ToolRegistry::new();
//! registry.register(
//!     ToolMetadata::new("echo", "Echoes its input back.")
//!         .with_parameter(
//!             ToolParameter::new("text", ToolParameterType::String)
//!                 .with_description("Text to echo")
//!                 .required(),
//!         ),
//!     Arc::new(|params, _cancel| {
//!         Box::pin(async move {
//!             Ok(ToolResult::success(params["text"].clone()))
//!         })
//!     }),
//! );
//! assert!(registry.contains("echo"));
//! ```

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Represents the result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful.
    pub success: bool,
    /// The output data from the tool.
    pub output: serde_json::Value,
    /// Optional error message if execution failed.
    pub error: Option<String>,
}

impl ToolResult {
    /// Convenience constructor for successful tool execution.
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    /// Convenience constructor for failed tool execution.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// The output rendered as text: strings verbatim, everything else as JSON.
    pub fn output_text(&self) -> String {
        match &self.output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Defines the type of a tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn schema_name(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// Defines a parameter for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    /// Define a new tool parameter with the provided name and type.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    /// Add a human readable description that will surface in generated schemas.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Metadata about a tool: identity, description, parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    /// Create metadata with the supplied identifier and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter definition to the tool metadata.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Render the parameter list as a JSON-Schema object.
    ///
    /// Produces `{"type": "object", "properties": {...}, "required": [...]}` —
    /// the shape providers with native function calling expect.
    pub fn to_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert(
                "type".to_string(),
                serde_json::Value::String(param.param_type.schema_name().to_string()),
            );
            if let Some(desc) = &param.description {
                prop.insert(
                    "description".to_string(),
                    serde_json::Value::String(desc.clone()),
                );
            }
            properties.insert(param.name.clone(), serde_json::Value::Object(prop));
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Error types for tool operations.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// The provided JSON parameters are missing required fields or malformed.
    InvalidInput(String),
    /// Tool execution completed with an application level failure.
    ExecutionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Async tool handler. Receives the raw JSON parameters the LLM supplied
/// plus the invoking run's cancellation token, and resolves to a
/// [`ToolResult`]. Long-running handlers (sub-agent spawning, fetches)
/// should observe the token; quick handlers may ignore it.
pub type ToolHandler = Arc<
    dyn Fn(
            serde_json::Value,
            CancellationToken,
        ) -> BoxFuture<'static, Result<ToolResult, Box<dyn Error + Send + Sync>>>
        + Send
        + Sync,
>;

struct RegisteredTool {
    metadata: ToolMetadata,
    handler: ToolHandler,
}

/// Registry of tools available to an agent.
///
/// Interior mutability (a `std::sync::RwLock` over the tool map) lets the
/// registry be shared as `Arc<ToolRegistry>` and mutated at runtime — the
/// lock is held only for map access, never across an `await`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&self, metadata: ToolMetadata, handler: ToolHandler) {
        let mut tools = self.tools.write().expect("tool registry lock");
        tools.insert(metadata.name.clone(), RegisteredTool { metadata, handler });
    }

    /// Remove a tool by name. No-op if absent.
    pub fn unregister(&self, name: &str) {
        let mut tools = self.tools.write().expect("tool registry lock");
        tools.remove(name);
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        let tools = self.tools.read().expect("tool registry lock");
        tools.contains_key(name)
    }

    /// Metadata for every registered tool, sorted by name for stable prompts.
    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        let tools = self.tools.read().expect("tool registry lock");
        let mut out: Vec<ToolMetadata> = tools.values().map(|t| t.metadata.clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        let tools = self.tools.read().expect("tool registry lock");
        tools.len()
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A fresh registry containing only the named tools.
    ///
    /// Used to apply a sub-agent definition's tool whitelist: the child gets
    /// the parent's tools restricted to `names`. Unknown names are skipped.
    pub fn subset(&self, names: &[String]) -> ToolRegistry {
        let tools = self.tools.read().expect("tool registry lock");
        let filtered = ToolRegistry::new();
        for name in names {
            if let Some(tool) = tools.get(name) {
                filtered.register(tool.metadata.clone(), Arc::clone(&tool.handler));
            }
        }
        filtered
    }

    /// Execute a tool by name.
    ///
    /// Fails with [`ToolError::NotFound`] for unknown tools and
    /// [`ToolError::InvalidInput`] when a required parameter is absent from
    /// the supplied JSON object. Handler errors propagate as-is. `cancel` is
    /// forwarded to the handler.
    pub async fn execute(
        &self,
        name: &str,
        parameters: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let (metadata, handler) = {
            let tools = self.tools.read().expect("tool registry lock");
            match tools.get(name) {
                Some(tool) => (tool.metadata.clone(), Arc::clone(&tool.handler)),
                None => return Err(Box::new(ToolError::NotFound(name.to_string()))),
            }
        };

        for param in metadata.parameters.iter().filter(|p| p.required) {
            if parameters.get(&param.name).is_none() {
                return Err(Box::new(ToolError::InvalidInput(format!(
                    "missing required parameter: {}",
                    param.name
                ))));
            }
        }

        handler(parameters, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool() -> (ToolMetadata, ToolHandler) {
        let metadata = ToolMetadata::new("echo", "Echoes input").with_parameter(
            ToolParameter::new("text", ToolParameterType::String).required(),
        );
        let handler: ToolHandler = Arc::new(|params, _cancel| {
            Box::pin(async move { Ok(ToolResult::success(params["text"].clone())) })
        });
        (metadata, handler)
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let registry = ToolRegistry::new();
        let (metadata, handler) = echo_tool();
        registry.register(metadata, handler);

        let result = registry
            .execute("echo", serde_json::json!({"text": "hi"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output_text(), "hi");
    }

    #[tokio::test]
    async fn test_execute_missing_required_parameter() {
        let registry = ToolRegistry::new();
        let (metadata, handler) = echo_tool();
        registry.register(metadata, handler);

        let err = registry
            .execute("echo", serde_json::json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing required parameter"));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("nope", serde_json::json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Tool not found"));
    }

    #[test]
    fn test_subset_filters_tools() {
        let registry = ToolRegistry::new();
        let (metadata, handler) = echo_tool();
        registry.register(metadata, handler);
        registry.register(
            ToolMetadata::new("other", "Another tool"),
            Arc::new(|_, _| Box::pin(async { Ok(ToolResult::success(serde_json::Value::Null)) })),
        );

        let subset = registry.subset(&["echo".to_string(), "ghost".to_string()]);
        assert!(subset.contains("echo"));
        assert!(!subset.contains("other"));
        assert_eq!(subset.len(), 1);
    }

    #[test]
    fn test_schema_shape() {
        let metadata = ToolMetadata::new("t", "d")
            .with_parameter(
                ToolParameter::new("a", ToolParameterType::String)
                    .with_description("first")
                    .required(),
            )
            .with_parameter(ToolParameter::new("b", ToolParameterType::Integer));
        let schema = metadata.to_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["a"]["type"], "string");
        assert_eq!(schema["required"], serde_json::json!(["a"]));
    }
}
