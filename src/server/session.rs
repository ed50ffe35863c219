use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;
use tracing::debug;

use super::state::ServerState;
use crate::session::{SessionId, SESSION_HEADER};

/// The session id a request names, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedSession(pub Option<SessionId>);

fn extract_session_id_from_headers(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

fn extract_session_id_from_query(parts: &Parts) -> Option<String> {
    let Query(query) = Query::<SessionQuery>::try_from_uri(&parts.uri).ok()?;
    query
        .session_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn extract_session_id(parts: &Parts) -> Option<SessionId> {
    let id = extract_session_id_from_headers(parts).or_else(|| extract_session_id_from_query(parts));
    if let Some(id) = &id {
        debug!("Request names session {}", id);
    }
    id
}

impl FromRequestParts<ServerState> for RequestedSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        Ok(RequestedSession(extract_session_id(parts)))
    }
}
