//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per kind of MCP request. When the wire
//! format changes, update only this file.

use super::constants::*;
use reqwest::{Method, Response};
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    pub fn mcp_url(&self) -> String {
        format!("{}{}", self.base_url, MCP_PATH)
    }

    /// Reads the session id a response was tagged with.
    pub fn session_id_of(response: &Response) -> Option<String> {
        response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    // ========================================================================
    // POST
    // ========================================================================

    pub async fn post_raw(&self, session_id: Option<&str>, body: impl Into<String>) -> Response {
        let mut request = self
            .client
            .post(self.mcp_url())
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .body(body.into());
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }
        request.send().await.expect("POST request failed")
    }

    pub async fn post_json(&self, session_id: Option<&str>, body: Value) -> Response {
        self.post_raw(session_id, body.to_string()).await
    }

    /// Posts with the session id in the query string instead of the header.
    pub async fn post_json_with_query(&self, session_id: &str, body: Value) -> Response {
        self.client
            .post(format!("{}?session_id={}", self.mcp_url(), session_id))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("POST request failed")
    }

    pub async fn initialize(&self, session_id: Option<&str>) -> Response {
        self.post_json(
            session_id,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "clientInfo": {"name": "e2e-tests", "version": "1.0"},
                },
            }),
        )
        .await
    }

    pub async fn notify_initialized(&self, session_id: Option<&str>) -> Response {
        self.post_json(
            session_id,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await
    }

    pub async fn list_tools(&self, session_id: Option<&str>) -> Response {
        self.post_json(
            session_id,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        )
        .await
    }

    pub async fn call_tool(
        &self,
        session_id: Option<&str>,
        request_id: i64,
        name: &str,
        arguments: Value,
    ) -> Response {
        self.post_json(
            session_id,
            json!({
                "jsonrpc": "2.0",
                "id": request_id,
                "method": "tools/call",
                "params": {"name": name, "arguments": arguments},
            }),
        )
        .await
    }

    // ========================================================================
    // GET / DELETE / OPTIONS
    // ========================================================================

    /// Opens an SSE stream, optionally asking to attach to `session_id`.
    pub async fn open_stream(&self, session_id: Option<&str>) -> Response {
        let mut request = self
            .client
            .get(self.mcp_url())
            .header("accept", "text/event-stream");
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }
        request.send().await.expect("GET request failed")
    }

    pub async fn delete(&self, session_id: Option<&str>) -> Response {
        let mut request = self.client.delete(self.mcp_url());
        if let Some(id) = session_id {
            request = request.header(SESSION_HEADER, id);
        }
        request.send().await.expect("DELETE request failed")
    }

    pub async fn preflight(&self, origin: &str, method: &str) -> Response {
        self.client
            .request(Method::OPTIONS, self.mcp_url())
            .header("origin", origin)
            .header("access-control-request-method", method)
            .header(
                "access-control-request-headers",
                "content-type,mcp-session-id",
            )
            .send()
            .await
            .expect("OPTIONS request failed")
    }
}
