//! Session table and lifecycle.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{
    Channel, ChannelEvent, ChannelEventKind, ChannelHandle, EXCLUSIVE_CHANNEL_CAPACITY,
    SHARED_CHANNEL_CAPACITY,
};
use super::{
    CloseReason, SessionError, SessionId, SessionMode, SessionSettings, SessionState,
    SESSION_QUERY_PARAM,
};
use crate::mcp::protocol::MCP_PROTOCOL_VERSION;
use crate::mcp::{Dispatcher, McpResponse};
use crate::server::metrics;

struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    last_activity: Mutex<Instant>,
    closed: CancellationToken,
    // FIFO: tokio's mutex queues waiters in arrival order
    turn: tokio::sync::Mutex<()>,
    streaming: AtomicBool,
    channel: Arc<Channel>,
}

impl Session {
    fn new(id: SessionId, channel: Arc<Channel>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Opening),
            last_activity: Mutex::new(Instant::now()),
            closed: CancellationToken::new(),
            turn: tokio::sync::Mutex::new(()),
            streaming: AtomicBool::new(false),
            channel,
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            created_at: self.created_at,
            state: *self.state.lock(),
            streaming: self.streaming.load(Ordering::SeqCst),
        }
    }
}

/// Snapshot of a live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    pub streaming: bool,
}

/// Result of opening an event stream.
pub struct OpenedChannel {
    pub session_id: SessionId,
    pub handle: ChannelHandle,
    /// True when the stream attached to an existing session instead of
    /// minting a new one.
    pub attached: bool,
}

/// Closes its session with [`CloseReason::Disconnected`] when dropped.
pub struct CloseGuard {
    session_id: SessionId,
    manager: Weak<SessionManager>,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.close_channel(&self.session_id, CloseReason::Disconnected);
        }
    }
}

/// A session that lives exactly as long as this value.
pub struct SessionLease {
    session_id: SessionId,
    manager: Arc<SessionManager>,
}

impl SessionLease {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.manager
            .close_channel(&self.session_id, CloseReason::Completed);
    }
}

pub struct SessionManager {
    mode: SessionMode,
    settings: SessionSettings,
    dispatcher: Arc<Dispatcher>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    shared_channel: Option<Arc<Channel>>,
}

impl SessionManager {
    pub fn new(mode: SessionMode, dispatcher: Arc<Dispatcher>, settings: SessionSettings) -> Self {
        let shared_channel = match mode {
            SessionMode::Shared => Some(Arc::new(Channel::new(SHARED_CHANNEL_CAPACITY))),
            SessionMode::Stateless | SessionMode::Addressed => None,
        };
        Self {
            mode,
            settings,
            dispatcher,
            sessions: RwLock::new(HashMap::new()),
            shared_channel,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.lookup(session_id).map(|session| session.info())
    }

    /// Opens an event stream.
    ///
    /// A `requested` id naming a live session without a stream attaches to
    /// it; one naming a live streaming session is rejected. Any other id is
    /// ignored and a fresh session is minted.
    pub fn open_channel(
        self: &Arc<Self>,
        requested: Option<&str>,
    ) -> Result<OpenedChannel, SessionError> {
        if self.mode == SessionMode::Stateless {
            return Err(SessionError::Unsupported("GET", self.mode));
        }

        if let Some(existing) = requested.and_then(|id| self.lookup(id)) {
            if existing
                .streaming
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(SessionError::AlreadyStreaming(existing.id.clone()));
            }
            let handle = self.subscribe(&existing);
            if existing.closed.is_cancelled() {
                // Closed between lookup and subscribe
                debug!("Session {} closed while attaching", existing.id);
                drop(handle);
            } else {
                self.send_handshake(&existing);
                existing.touch();
                info!("Stream attached to session {}", existing.id);
                return Ok(OpenedChannel {
                    session_id: existing.id.clone(),
                    handle,
                    attached: true,
                });
            }
        }

        if let Some(id) = requested {
            debug!("Requested session {} is not live, minting a new one", id);
        }

        let session = self.register();
        session.streaming.store(true, Ordering::SeqCst);
        let handle = self.subscribe(&session);
        self.send_handshake(&session);
        self.mark_open(&session);

        Ok(OpenedChannel {
            session_id: session.id.clone(),
            handle,
            attached: false,
        })
    }

    /// Mints a session with no event stream attached.
    pub fn open_session(&self) -> SessionId {
        let session = self.register();
        self.mark_open(&session);
        session.id.clone()
    }

    /// Delivers one inbound message to `session_id` and waits for its reply.
    ///
    /// Messages on the same session are handled one at a time in arrival
    /// order. Closing the session fails the call with
    /// [`SessionError::Aborted`], whether it is still queued or running.
    ///
    /// In addressed mode a session with a live stream gets its reply as a
    /// `message` event and `Ok(None)` is returned. Everywhere else the reply
    /// is handed back to the caller.
    pub async fn post_message(
        &self,
        session_id: &str,
        payload: &str,
    ) -> Result<Option<McpResponse>, SessionError> {
        let session = self
            .lookup(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.touch();

        let _turn = tokio::select! {
            biased;
            _ = session.closed.cancelled() => {
                return Err(SessionError::Aborted(session.id.clone()));
            }
            turn = session.turn.lock() => turn,
        };

        let dispatch = self.dispatcher.handle_message(&session.id, payload);
        let outcome = tokio::select! {
            biased;
            _ = session.closed.cancelled() => {
                return Err(SessionError::Aborted(session.id.clone()));
            }
            outcome = with_timeout(self.settings.request_timeout, dispatch) => outcome,
        };

        session.touch();
        let response = outcome.ok_or_else(|| {
            let timeout_secs = self
                .settings
                .request_timeout
                .map(|d| d.as_secs())
                .unwrap_or_default();
            warn!(
                "Request on session {} timed out after {}s",
                session.id, timeout_secs
            );
            SessionError::TimedOut {
                session_id: session.id.clone(),
                timeout_secs,
            }
        })?;

        match response {
            Some(response) if self.replies_on_stream(&session) => {
                Ok(self.write_to_stream(&session, response))
            }
            other => Ok(other),
        }
    }

    fn replies_on_stream(&self, session: &Session) -> bool {
        self.mode == SessionMode::Addressed && session.streaming.load(Ordering::SeqCst)
    }

    /// Publishes `response` on the session's stream. Hands it back when
    /// nobody is listening any more.
    fn write_to_stream(&self, session: &Session, response: McpResponse) -> Option<McpResponse> {
        let message = match serde_json::to_value(&response) {
            Ok(message) => message,
            Err(e) => {
                warn!("Could not encode reply for session {}: {}", session.id, e);
                return Some(response);
            }
        };
        let delivered = session.channel.publish(ChannelEvent::to_session(
            &session.id,
            ChannelEventKind::Message(message),
        ));
        if delivered == 0 {
            debug!("No stream listening on session {}, replying inline", session.id);
            return Some(response);
        }
        None
    }

    /// Runs one message on a throwaway session.
    pub async fn handle_stateless(
        self: &Arc<Self>,
        payload: &str,
    ) -> Result<Option<McpResponse>, SessionError> {
        let lease = self.lease();
        self.post_message(lease.session_id(), payload).await
    }

    /// Mints a session that is closed when the returned lease is dropped.
    pub fn lease(self: &Arc<Self>) -> SessionLease {
        SessionLease {
            session_id: self.open_session(),
            manager: self.clone(),
        }
    }

    /// Pushes a server-initiated JSON-RPC message onto the session's stream.
    pub fn notify(&self, session_id: &str, message: Value) -> Result<usize, SessionError> {
        let session = self
            .lookup(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(session.channel.publish(ChannelEvent::to_session(
            &session.id,
            ChannelEventKind::Message(message),
        )))
    }

    /// Tears the session down. Only the first call for a given id does any
    /// work; later calls return `false`.
    pub fn close_channel(&self, session_id: &str, reason: CloseReason) -> bool {
        let Some(session) = self.sessions.write().remove(session_id) else {
            return false;
        };

        *session.state.lock() = SessionState::Closed;
        // Publish before cancelling: a handle woken by the token looks for it
        session.channel.publish(ChannelEvent::to_session(
            &session.id,
            ChannelEventKind::Close(reason),
        ));
        session.closed.cancel();
        metrics::session_closed(reason.as_str());

        let usage = self.dispatcher.ledger().summarize(&session.id);
        info!(
            "Session {} closed ({}), lived {}s, usage: {:?}",
            session.id,
            reason,
            (Utc::now() - session.created_at).num_seconds(),
            usage
        );
        true
    }

    /// Closes sessions without a stream that have been idle longer than the
    /// configured timeout. Sessions with a call in flight are left alone.
    pub fn reap_idle(&self) -> usize {
        let Some(idle_timeout) = self.settings.idle_timeout else {
            return 0;
        };

        let stale: Vec<SessionId> = self
            .sessions
            .read()
            .values()
            .filter(|session| !session.streaming.load(Ordering::SeqCst))
            .filter(|session| session.idle_for() >= idle_timeout)
            .filter(|session| session.turn.try_lock().is_ok())
            .map(|session| session.id.clone())
            .collect();

        stale
            .iter()
            .filter(|id| self.close_channel(id, CloseReason::IdleTimeout))
            .count()
    }

    pub fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.iter()
            .filter(|id| self.close_channel(id, reason))
            .count()
    }

    fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    fn register(&self) -> Arc<Session> {
        let channel = match &self.shared_channel {
            Some(shared) => shared.clone(),
            None => Arc::new(Channel::new(EXCLUSIVE_CHANNEL_CAPACITY)),
        };

        let mut sessions = self.sessions.write();
        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Arc::new(Session::new(id.clone(), channel));
        sessions.insert(id, session.clone());
        drop(sessions);

        metrics::session_opened();
        session
    }

    fn mark_open(&self, session: &Session) {
        *session.state.lock() = SessionState::Open;
        info!("Session {} opened ({} mode)", session.id, self.mode);
    }

    fn subscribe(self: &Arc<Self>, session: &Session) -> ChannelHandle {
        let guard = CloseGuard {
            session_id: session.id.clone(),
            manager: Arc::downgrade(self),
        };
        ChannelHandle::new(
            session.id.clone(),
            session.channel.subscribe(),
            session.closed.clone(),
            Some(guard),
        )
    }

    fn send_handshake(&self, session: &Session) {
        let endpoint = format!(
            "{}?{}={}",
            self.settings.mcp_path, SESSION_QUERY_PARAM, session.id
        );
        session.channel.publish(ChannelEvent::to_session(
            &session.id,
            ChannelEventKind::Endpoint(endpoint),
        ));
        session.channel.publish(ChannelEvent::to_session(
            &session.id,
            ChannelEventKind::Session(json!({
                "session_id": session.id,
                "mode": self.mode,
                "protocol_version": MCP_PROTOCOL_VERSION,
                "created_at": session.created_at,
            })),
        ));
    }
}

async fn with_timeout<F: Future>(timeout: Option<Duration>, future: F) -> Option<F::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}
