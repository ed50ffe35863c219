//! Medtools MCP Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod cache;
pub mod config;
pub mod mcp;
pub mod server;
pub mod session;
pub mod usage;

// Re-export commonly used types for convenience
pub use cache::TtlCache;
pub use mcp::{Dispatcher, ToolRegistry};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
pub use session::{SessionManager, SessionMode};
pub use usage::UsageLedger;
