use anyhow::{Context, Result};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, error, info};

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use super::session::RequestedSession;
use super::{log_requests, metrics, state::*, ServerConfig};
use crate::mcp::protocol::RequestId;
use crate::mcp::McpResponse;
use crate::session::{ChannelEvent, SessionError, SessionId, SessionMode, SESSION_HEADER};

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const SSE_KEEP_ALIVE_SECS: u64 = 15;

/// A failed session operation, answered with a JSON-RPC error body.
struct SessionRejection {
    error: SessionError,
    request_id: Option<RequestId>,
}

impl SessionRejection {
    fn new(error: SessionError, payload: Option<&str>) -> Self {
        let request_id = payload
            .and_then(|text| serde_json::from_str::<Value>(text).ok())
            .and_then(|value| value.get("id").cloned())
            .and_then(|id| serde_json::from_value(id).ok());
        SessionRejection { error, request_id }
    }

    fn status(&self) -> StatusCode {
        match self.error {
            SessionError::NotFound(_) | SessionError::Aborted(_) => StatusCode::NOT_FOUND,
            SessionError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            SessionError::AlreadyStreaming(_) => StatusCode::CONFLICT,
            SessionError::MissingSessionId => StatusCode::BAD_REQUEST,
            SessionError::Unsupported(..) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        debug!("Rejecting request: {}", self.error);
        let status = self.status();
        let body = McpResponse::error(self.request_id, self.error.to_mcp_error());
        if status == StatusCode::METHOD_NOT_ALLOWED {
            // Only stateless mode rejects GET
            return (status, [(header::ALLOW, "POST, OPTIONS")], Json(body)).into_response();
        }
        (status, Json(body)).into_response()
    }
}

fn reply(session_id: Option<SessionId>, response: Option<McpResponse>) -> Response {
    let mut http_response = match response {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
        http_response.headers_mut().insert(SESSION_HEADER, value);
    }
    http_response
}

async fn mcp_post(
    State(session_manager): State<GuardedSessionManager>,
    RequestedSession(requested): RequestedSession,
    body: String,
) -> Response {
    let (session_id, result) = match session_manager.mode() {
        SessionMode::Stateless => (None, session_manager.handle_stateless(&body).await),
        SessionMode::Addressed => {
            let Some(id) = requested else {
                return SessionRejection::new(SessionError::MissingSessionId, Some(&body))
                    .into_response();
            };
            let result = session_manager.post_message(&id, &body).await;
            (Some(id), result)
        }
        SessionMode::Shared => {
            let id = requested.unwrap_or_else(|| session_manager.open_session());
            let result = session_manager.post_message(&id, &body).await;
            (Some(id), result)
        }
    };

    match result {
        Ok(response) => reply(session_id, response),
        Err(error) => SessionRejection::new(error, Some(&body)).into_response(),
    }
}

fn sse_events(
    events: impl Stream<Item = ChannelEvent> + Send,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    events.map(|event| Ok(Event::default().event(event.name()).data(event.data())))
}

async fn mcp_get(
    State(session_manager): State<GuardedSessionManager>,
    RequestedSession(requested): RequestedSession,
) -> Response {
    let opened = match session_manager.open_channel(requested.as_deref()) {
        Ok(opened) => opened,
        Err(error) => return SessionRejection::new(error, None).into_response(),
    };

    let session_id = opened.session_id;
    // Dropping the stream (client gone, failed write) drops the handle,
    // whose guard closes the session.
    let stream = sse_events(opened.handle.into_stream());
    let sse = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS)));

    ([(SESSION_HEADER, session_id)], sse).into_response()
}

async fn mcp_delete() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, ALLOWED_METHODS)],
    )
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(SESSION_HEADER),
            HeaderName::from_static("mcp-protocol-version"),
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([HeaderName::from_static(SESSION_HEADER)])
}

pub fn make_app(config: ServerConfig, session_manager: GuardedSessionManager) -> Router {
    let state = ServerState::new(config.clone(), session_manager);

    let mcp_routes: Router = Router::new()
        .route(
            &config.mcp_path,
            post(mcp_post).get(mcp_get).delete(mcp_delete),
        )
        .with_state(state.clone());

    // OPTIONS never reaches the router: the CORS layer answers it
    mcp_routes
        .layer(cors_layer())
        .layer(middleware::from_fn_with_state(state, log_requests))
}

async fn serve_metrics(addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;
    info!("Metrics available at http://{}/metrics", addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, metrics::metrics_router()).await {
            error!("Metrics listener stopped: {}", e);
        }
    });
    Ok(())
}

pub async fn run_server(config: ServerConfig, session_manager: GuardedSessionManager) -> Result<()> {
    if let Some(metrics_port) = config.metrics_port {
        serve_metrics(SocketAddr::new(config.bind_address, metrics_port)).await?;
    }

    let addr = SocketAddr::new(config.bind_address, config.port);
    let mode = session_manager.mode();
    let app = make_app(config.clone(), session_manager);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(
        "MCP endpoint at http://{}{} ({} sessions)",
        addr, config.mcp_path, mode
    );

    Ok(axum::serve(listener, app).await?)
}
