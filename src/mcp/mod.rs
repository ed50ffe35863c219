//! MCP (Model Context Protocol) Server
//!
//! JSON-RPC 2.0 message handling and the tool catalog. Transport and session
//! handling live in [`crate::session`] and [`crate::server`].
//!
//! ## Architecture
//!
//! - Protocol: `initialize`, `ping`, `tools/list`, `tools/call`
//! - Tools: named collaborators with a declared input schema
//! - Dispatcher: usage accounting and result caching around every tool call

pub mod dispatcher;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod tools;

pub use dispatcher::Dispatcher;
pub use protocol::{McpError, McpRequest, McpResponse};
pub use registry::{Collaborator, CollaboratorError, ToolBuilder, ToolRegistry};
