//! Server-to-client event fan-out.
//!
//! A [`Channel`] wraps a broadcast sender. Every streaming client holds a
//! [`ChannelHandle`] subscribed to it. Events addressed to a session are only
//! yielded by that session's handle, so one channel can be shared by many
//! sessions. A handle also watches its session's close token, so it ends even
//! when the `close` event itself never reaches it.

use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::manager::CloseGuard;
use super::{CloseReason, SessionId};

pub const EXCLUSIVE_CHANNEL_CAPACITY: usize = 64;
pub const SHARED_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    /// URI the client should POST to.
    Endpoint(String),
    /// Session handshake metadata.
    Session(Value),
    /// JSON-RPC message: a notification or an addressed-mode reply.
    Message(Value),
    Close(CloseReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub session_id: SessionId,
    pub kind: ChannelEventKind,
}

impl ChannelEvent {
    pub fn to_session(session_id: &str, kind: ChannelEventKind) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self.kind {
            ChannelEventKind::Endpoint(_) => "endpoint",
            ChannelEventKind::Session(_) => "session",
            ChannelEventKind::Message(_) => "message",
            ChannelEventKind::Close(_) => "close",
        }
    }

    /// SSE data payload.
    pub fn data(&self) -> String {
        match &self.kind {
            ChannelEventKind::Endpoint(uri) => uri.clone(),
            ChannelEventKind::Session(value) | ChannelEventKind::Message(value) => {
                value.to_string()
            }
            ChannelEventKind::Close(reason) => serde_json::json!({
                "session_id": self.session_id,
                "reason": reason,
            })
            .to_string(),
        }
    }

    fn is_for(&self, session_id: &str) -> bool {
        self.session_id == session_id
    }

    fn is_close(&self) -> bool {
        matches!(self.kind, ChannelEventKind::Close(_))
    }
}

pub struct Channel {
    sender: broadcast::Sender<ChannelEvent>,
}

impl Channel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes `event`, returning how many handles will see it. Publishing
    /// with nobody subscribed is not an error.
    pub fn publish(&self, event: ChannelEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One client's view of a channel, filtered to a single session.
pub struct ChannelHandle {
    session_id: SessionId,
    receiver: broadcast::Receiver<ChannelEvent>,
    // Cancelled once the session has left the table
    closed: CancellationToken,
    finished: bool,
    // Closes the session when the handle is dropped
    _guard: Option<CloseGuard>,
}

impl ChannelHandle {
    pub(crate) fn new(
        session_id: SessionId,
        receiver: broadcast::Receiver<ChannelEvent>,
        closed: CancellationToken,
        guard: Option<CloseGuard>,
    ) -> Self {
        Self {
            session_id,
            receiver,
            closed,
            finished: false,
            _guard: guard,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next event for this session. Returns `None` after the session's
    /// `close` event has been yielded, once the session's close token fires
    /// and nothing is left buffered for it, or once the channel itself is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.finished {
            return None;
        }
        loop {
            let received = tokio::select! {
                biased;
                received = self.receiver.recv() => Some(received),
                _ = self.closed.cancelled() => None,
            };
            match received {
                Some(Ok(event)) => {
                    if !event.is_for(&self.session_id) {
                        continue;
                    }
                    if event.is_close() {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Some(Err(RecvError::Lagged(skipped))) => {
                    warn!(
                        "Stream for session {} lagged, {} events dropped",
                        self.session_id, skipped
                    );
                }
                Some(Err(RecvError::Closed)) => {
                    self.finished = true;
                    return None;
                }
                None => return self.drain_after_close(),
            }
        }
    }

    /// Yields what is still buffered for this session once it has closed.
    /// The `close` event is published before the token fires, so it is either
    /// buffered here or was lost to lag or a late subscribe.
    fn drain_after_close(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.is_for(&self.session_id) => {
                    if event.is_close() {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {
                    debug!(
                        "Session {} closed without a close event on its stream",
                        self.session_id
                    );
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ChannelEvent> + Send {
        futures::stream::unfold(self, |mut handle| async move {
            handle.recv().await.map(|event| (event, handle))
        })
    }
}
