//! Session and transport lifecycle.
//!
//! A session is a logical conversation identified by an opaque id. It owns a
//! close signal, an inbound turn lock that keeps same-session messages in
//! delivery order, and a binding to a [`Channel`] over which server events are
//! streamed. The [`SessionManager`] is the only owner of the session table.

pub mod channel;
pub mod manager;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{DEFAULT_MCP_PATH, DEFAULT_REQUEST_TIMEOUT_SEC, DEFAULT_SESSION_IDLE_TIMEOUT_SEC};
use crate::mcp::McpError;

pub use channel::{Channel, ChannelEvent, ChannelEventKind, ChannelHandle};
pub use manager::{OpenedChannel, SessionInfo, SessionLease, SessionManager};

/// Request header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Query parameter carrying the session id when the header is absent.
pub const SESSION_QUERY_PARAM: &str = "session_id";

/// Opaque session identifier (a UUID v4 string).
pub type SessionId = String;

/// How sessions and channels relate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Every POST gets a throwaway session, torn down when the call returns.
    Stateless,
    /// Sessions are opened by GET, and every POST must name one.
    Addressed,
    /// One channel for the whole process; session ids are minted per
    /// conversation and multiplexed onto it.
    #[default]
    Shared,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Stateless => "stateless",
            SessionMode::Addressed => "addressed",
            SessionMode::Shared => "shared",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The event stream went away: client disconnect or failed write.
    Disconnected,
    /// A stateless call finished.
    Completed,
    IdleTimeout,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Disconnected => "disconnected",
            CloseReason::Completed => "completed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Path announced in the `endpoint` event.
    pub mcp_path: String,
    /// `None` disables the per-request timeout.
    pub request_timeout: Option<Duration>,
    /// `None` disables idle reaping.
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            mcp_path: DEFAULT_MCP_PATH.to_string(),
            request_timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SEC)),
            idle_timeout: Some(Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SEC)),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("session {0} closed while the request was pending")]
    Aborted(SessionId),
    #[error("request on session {session_id} timed out after {timeout_secs}s")]
    TimedOut {
        session_id: SessionId,
        timeout_secs: u64,
    },
    #[error("session {0} already has an open stream")]
    AlreadyStreaming(SessionId),
    #[error("missing session id")]
    MissingSessionId,
    #[error("{0} is not supported in {1} mode")]
    Unsupported(&'static str, SessionMode),
}

impl SessionError {
    /// JSON-RPC error reported in the body of the HTTP error response.
    pub fn to_mcp_error(&self) -> McpError {
        match self {
            SessionError::NotFound(id) | SessionError::Aborted(id) => {
                McpError::SessionNotFound(id.clone())
            }
            SessionError::TimedOut { timeout_secs, .. } => McpError::RequestTimeout {
                timeout_secs: *timeout_secs,
            },
            other => McpError::InvalidRequest(other.to_string()),
        }
    }
}
