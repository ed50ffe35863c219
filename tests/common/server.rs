//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own session table, cache and
//! usage ledger, wired to a fake upstream instead of the real data sources.

use super::constants::*;
use super::fixtures::{panic_tool, FakeUpstream, SlowTool};
use medtools_server::cache::TtlCache;
use medtools_server::config::UpstreamSettings;
use medtools_server::mcp::{tools, Dispatcher, ToolRegistry};
use medtools_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use medtools_server::session::{SessionManager, SessionMode, SessionSettings};
use medtools_server::usage::UsageLedger;
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct TestServerOptions {
    pub mode: SessionMode,
    pub cache_ttl_secs: u64,
    pub request_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            mode: SessionMode::Shared,
            cache_ttl_secs: DEFAULT_TEST_CACHE_TTL_SECS,
            request_timeout: None,
            idle_timeout: None,
        }
    }
}

/// Test server instance
///
/// When dropped, the server gracefully shuts down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Direct access to the session table
    pub session_manager: Arc<SessionManager>,

    /// Fake E-utilities backing `pubmed_search`
    pub upstream: FakeUpstream,

    pub slow_tool: SlowTool,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a shared-mode server on a random port
    pub async fn spawn() -> Self {
        Self::spawn_with(TestServerOptions::default()).await
    }

    pub async fn spawn_with_mode(mode: SessionMode) -> Self {
        Self::spawn_with(TestServerOptions {
            mode,
            ..Default::default()
        })
        .await
    }

    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if port binding fails or the server doesn't become ready
    /// within timeout.
    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let upstream = FakeUpstream::spawn().await;
        let upstream_settings = UpstreamSettings {
            pubmed_base_url: upstream.base_url.clone(),
            timeout_secs: 5,
            ..Default::default()
        };

        let slow_tool = SlowTool::default();
        let mut registry = ToolRegistry::new();
        tools::register_all_tools(&mut registry, &upstream_settings)
            .expect("Failed to register tools");
        registry.register_tool(slow_tool.tool());
        registry.register_tool(panic_tool());

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            Arc::new(TtlCache::with_ttl_secs(options.cache_ttl_secs)),
            Arc::new(UsageLedger::new()),
        ));
        let session_manager = Arc::new(SessionManager::new(
            options.mode,
            dispatcher,
            SessionSettings {
                mcp_path: MCP_PATH.to_string(),
                request_timeout: options.request_timeout,
                idle_timeout: options.idle_timeout,
            },
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            metrics_port: None,
            mcp_path: MCP_PATH.to_string(),
        };
        let app = make_app(config, session_manager.clone());

        // Spawn server in background task with graceful shutdown
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            port,
            session_manager,
            upstream,
            slow_tool,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling OPTIONS on the MCP path
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client
                .request(reqwest::Method::OPTIONS, format!("{}{}", self.base_url, MCP_PATH))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    /// Polls until `session_id` leaves the session table or the timeout hits.
    ///
    /// A vanished client is only noticed when the server next writes to its
    /// stream, so each poll pushes a message to the session.
    pub async fn wait_for_session_closed(&self, session_id: &str) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(SSE_EVENT_TIMEOUT_MS) {
            if !self.session_manager.has_session(session_id) {
                return true;
            }
            let _ = self.session_manager.notify(
                session_id,
                json!({"jsonrpc": "2.0", "method": "notifications/ping"}),
            );
            tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
        }
        false
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
