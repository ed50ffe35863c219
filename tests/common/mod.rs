//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, TestClient};
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_list_tools() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     let response = client.list_tools(None).await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

mod client;
mod constants;
mod fixtures;
mod server;
mod sse;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
pub use server::{TestServer, TestServerOptions};
pub use sse::{SseEvent, SseReader};

// Keep fixtures internal - only accessed via TestServer::spawn()
#[allow(unused_imports)]
pub(crate) use fixtures::{panic_tool, FakeUpstream, SlowTool};
