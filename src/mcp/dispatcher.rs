//! Tool dispatch.
//!
//! The dispatcher owns no session state. It is handed the session id of the
//! caller and routes one JSON-RPC message at a time: lifecycle methods are
//! answered directly, `tools/call` goes through usage recording, argument
//! validation, the result cache and finally the collaborator.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::protocol::{
    methods, InitializeParams, InitializeResult, McpError, McpRequest, McpResponse, PingResult,
    RequestId, ServerCapabilities, ServerInfo, ToolsCallParams, ToolsCallResult,
    ToolsCapability, ToolsListResult, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
use super::registry::ToolRegistry;
use crate::cache::{cache_key, TtlCache};
use crate::server::metrics;
use crate::usage::UsageLedger;

pub const SERVER_NAME: &str = "medtools-server";

pub fn server_version() -> String {
    format!("{}-{}", env!("APP_VERSION"), env!("GIT_HASH"))
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    cache: Arc<TtlCache>,
    ledger: Arc<UsageLedger>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, cache: Arc<TtlCache>, ledger: Arc<UsageLedger>) -> Self {
        Self {
            registry,
            cache,
            ledger,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Runs `operation` on behalf of `session_id`.
    ///
    /// Usage is recorded for every call to a registered tool, including
    /// calls that later fail validation or are served from the cache.
    pub async fn handle(
        &self,
        session_id: &str,
        operation: &str,
        args: Value,
    ) -> Result<ToolsCallResult, McpError> {
        let started = Instant::now();

        let tool = self
            .registry
            .get_tool(operation)
            .ok_or_else(|| McpError::UnknownOperation(operation.to_string()))?;

        self.ledger.record(session_id, operation);

        let args = match tool.descriptor.input_schema.validate(args) {
            Ok(args) => args,
            Err(e) => {
                metrics::record_tool_call(operation, "invalid_params", started.elapsed());
                return Err(McpError::InvalidParams(e.to_string()));
            }
        };

        let key = tool
            .descriptor
            .cacheable
            .then(|| cache_key(operation, &args));

        if let Some(key) = &key {
            let cached = self.cache.get(key);
            metrics::record_cache_lookup(cached.is_some());
            if let Some(value) = cached {
                debug!("Cache hit for {} (session {})", operation, session_id);
                metrics::record_tool_call(operation, "cached", started.elapsed());
                return to_call_result(value);
            }
        }

        let outcome = AssertUnwindSafe(tool.collaborator.execute(args))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                if let Some(key) = key {
                    self.cache.set(key, value.clone());
                    metrics::set_cache_entries(self.cache.len());
                }
                metrics::record_tool_call(operation, "ok", started.elapsed());
                to_call_result(value)
            }
            Ok(Err(e)) => {
                warn!("Tool {} failed for session {}: {}", operation, session_id, e);
                metrics::record_tool_call(operation, "failed", started.elapsed());
                Err(McpError::ToolExecutionFailed(e.to_string()))
            }
            Err(_) => {
                error!("Tool {} panicked for session {}", operation, session_id);
                metrics::record_tool_call(operation, "failed", started.elapsed());
                Err(McpError::ToolExecutionFailed(format!(
                    "{} terminated unexpectedly",
                    operation
                )))
            }
        }
    }

    /// Handles one raw JSON-RPC message. Returns `None` for notifications and
    /// for client responses, which need no reply.
    pub async fn handle_message(&self, session_id: &str, text: &str) -> Option<McpResponse> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return Some(McpResponse::error(
                    None,
                    McpError::ParseError(e.to_string()),
                ));
            }
        };

        if value.is_array() {
            return Some(McpResponse::error(
                None,
                McpError::InvalidRequest("batching not supported".to_string()),
            ));
        }

        if value.get("method").is_none()
            && (value.get("result").is_some() || value.get("error").is_some())
        {
            debug!("Ignoring client response on session {}", session_id);
            return None;
        }

        let raw_id: Option<RequestId> = value
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value(id).ok());

        let request: McpRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(McpResponse::error(
                    raw_id,
                    McpError::InvalidRequest(e.to_string()),
                ));
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(McpResponse::error(
                request.id,
                McpError::InvalidRequest(format!("unsupported jsonrpc version {}", request.jsonrpc)),
            ));
        }

        let Some(request_id) = request.id.clone() else {
            debug!(
                "Notification {} on session {}",
                request.method, session_id
            );
            return None;
        };

        debug!("{} on session {}", request.method, session_id);

        let result = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(&request),
            methods::PING => handle_ping(),
            methods::TOOLS_LIST => self.handle_tools_list(),
            methods::TOOLS_CALL => self.handle_tools_call(session_id, &request).await,
            other => Err(McpError::MethodNotFound(other.to_string())),
        };

        Some(match result {
            Ok(value) => McpResponse::success(request_id, value),
            Err(error) => McpResponse::error(Some(request_id), error),
        })
    }

    fn handle_initialize(&self, request: &McpRequest) -> Result<Value, McpError> {
        let params: Option<InitializeParams> = request
            .params
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?;

        if let Some(params) = params {
            debug!(
                "Client {} {} requested protocol {}",
                params.client_info.name, params.client_info.version, params.protocol_version
            );
        }

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: None }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: server_version(),
            },
        };

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, McpError> {
        let result = ToolsListResult {
            tools: self.registry.definitions(),
        };

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_tools_call(
        &self,
        session_id: &str,
        request: &McpRequest,
    ) -> Result<Value, McpError> {
        let params: ToolsCallParams = request
            .params
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Missing params".to_string()))?;

        let arguments = params.arguments.unwrap_or(Value::Null);
        let result = self.handle(session_id, &params.name, arguments).await?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }
}

fn handle_ping() -> Result<Value, McpError> {
    serde_json::to_value(PingResult {}).map_err(|e| McpError::InternalError(e.to_string()))
}

fn to_call_result(value: Value) -> Result<ToolsCallResult, McpError> {
    ToolsCallResult::structured(value).map_err(|e| McpError::InternalError(e.to_string()))
}
