use axum::extract::FromRef;
use std::sync::Arc;

use super::ServerConfig;
use crate::session::SessionManager;

pub type GuardedSessionManager = Arc<SessionManager>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub session_manager: GuardedSessionManager,
}

impl ServerState {
    pub fn new(config: ServerConfig, session_manager: GuardedSessionManager) -> Self {
        ServerState {
            config,
            session_manager,
        }
    }
}

impl FromRef<ServerState> for GuardedSessionManager {
    fn from_ref(input: &ServerState) -> Self {
        input.session_manager.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
