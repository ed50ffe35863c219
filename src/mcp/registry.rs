//! MCP Tool Registry
//!
//! Maps operation names to collaborators. The registry is built once at
//! startup and shared read-only afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::protocol::ToolDefinition;
use super::schema::InputSchema;

// ============================================================================
// Collaborator
// ============================================================================

/// Error returned by a collaborator. The message is passed through to the
/// client unchanged.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{0}")]
    InvalidArguments(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Something that can execute a tool call with already-validated arguments.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn execute(&self, args: Value) -> Result<Value, CollaboratorError>;
}

/// Adapts a closure returning a future into a [`Collaborator`].
struct FnCollaborator<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Collaborator for FnCollaborator<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CollaboratorError>> + Send + 'static,
{
    async fn execute(&self, args: Value) -> Result<Value, CollaboratorError> {
        (self.f)(args).await
    }
}

// ============================================================================
// Tool Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub cacheable: bool,
}

/// A registered tool with metadata and collaborator
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub collaborator: Arc<dyn Collaborator>,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            input_schema: self.descriptor.input_schema.to_json_schema(),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register_tool(&mut self, tool: RegisteredTool) {
        if self.tools.contains_key(tool.name()) {
            warn!("Tool {} registered twice, replacing", tool.name());
        }
        self.tools.insert(tool.descriptor.name.clone(), tool);
    }

    pub fn get_tool(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Definitions of every tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(RegisteredTool::definition).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

// ============================================================================
// Builder helpers
// ============================================================================

/// Builder for registering a tool
pub struct ToolBuilder {
    name: String,
    description: String,
    input_schema: InputSchema,
    cacheable: bool,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: InputSchema::new(),
            cacheable: true,
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn input_schema(mut self, schema: InputSchema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn build(self, collaborator: Arc<dyn Collaborator>) -> RegisteredTool {
        RegisteredTool {
            descriptor: ToolDescriptor {
                name: self.name,
                description: self.description,
                input_schema: self.input_schema,
                cacheable: self.cacheable,
            },
            collaborator,
        }
    }

    pub fn build_fn<F, Fut>(self, f: F) -> RegisteredTool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CollaboratorError>> + Send + 'static,
    {
        self.build(Arc::new(FnCollaborator { f }))
    }
}
