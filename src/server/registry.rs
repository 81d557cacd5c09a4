//! Session registry: `ClientId` → outbound stream handle.
//!
//! DESIGN
//! ======
//! Every accepted GET registers a `Session` holding the sending half of an
//! unbounded channel. The receiving half becomes the GET response body
//! ([`OutboundStream`]). Dropping the body (peer closed, server aborted,
//! stream replaced) drops its guard, which removes the session.
//!
//! Sessions carry a generation number. A second GET for the same id replaces
//! the first; the superseded body's guard then finds a newer generation and
//! leaves the map alone.
//!
//! The map is behind a `std::sync::RwLock` and never held across an await,
//! so `send_message` stays synchronous and callable from inside handlers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use axum::body::Bytes;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::protocol::{ClientId, HandlerSet};

/// Callback invoked once per decoded inbound frame.
pub type ServerMessageHandler = dyn Fn(&Value, &ClientId) + Send + Sync;

struct Session {
    generation: u64,
    outbound: mpsc::UnboundedSender<Bytes>,
}

struct RegistryInner {
    sessions: RwLock<HashMap<ClientId, Session>>,
    handlers: HandlerSet<ServerMessageHandler>,
    next_generation: AtomicU64,
    config: ServerConfig,
}

/// Server-side half of the protocol. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                handlers: HandlerSet::new(),
                next_generation: AtomicU64::new(1),
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    /// Register a handler for inbound frames. Keep the returned handle to
    /// remove it later.
    pub fn on_message<F>(&self, handler: F) -> Arc<ServerMessageHandler>
    where
        F: Fn(&Value, &ClientId) + Send + Sync + 'static,
    {
        let handler: Arc<ServerMessageHandler> = Arc::new(handler);
        self.inner.handlers.add(Arc::clone(&handler));
        handler
    }

    /// Remove a handler previously returned by [`Self::on_message`].
    pub fn remove_message_handler(&self, handler: &Arc<ServerMessageHandler>) -> bool {
        self.inner.handlers.remove(handler)
    }

    /// Deliver one inbound message to every handler registered right now.
    ///
    /// A panicking handler is logged and skipped. Returns the number of
    /// handlers that completed.
    pub fn dispatch(&self, message: &Value, client_id: &ClientId) -> usize {
        let mut completed = 0;
        for handler in self.inner.handlers.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| handler(message, client_id))) {
                Ok(()) => completed += 1,
                Err(_) => error!(%client_id, "message handler panicked"),
            }
        }
        completed
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    /// Register a session for `client_id` and return the body stream that
    /// carries its outbound frames. Replaces any existing session for the id.
    pub fn register(&self, client_id: ClientId) -> OutboundStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let replaced = {
            let mut sessions = self.write_sessions();
            sessions.insert(client_id.clone(), Session { generation, outbound: tx })
        };

        if replaced.is_some() {
            info!(%client_id, "session replaced by new GET stream");
        } else {
            info!(%client_id, "session opened");
        }

        OutboundStream {
            rx,
            _guard: SessionGuard { registry: self.clone(), client_id, generation },
        }
    }

    /// Server-initiated teardown: remove the session and end its GET stream.
    pub fn disconnect(&self, client_id: &ClientId) -> bool {
        let removed = self.write_sessions().remove(client_id);
        if removed.is_some() {
            info!(%client_id, "session closed by server");
        }
        removed.is_some()
    }

    /// Close every session. Returns how many were open.
    pub fn disconnect_all(&self) -> usize {
        let drained: Vec<Session> = self.write_sessions().drain().map(|(_, session)| session).collect();
        drained.len()
    }

    fn remove_generation(&self, client_id: &ClientId, generation: u64) {
        let mut sessions = self.write_sessions();
        if sessions.get(client_id).is_some_and(|s| s.generation == generation) {
            sessions.remove(client_id);
            drop(sessions);
            info!(%client_id, "session closed");
        }
    }

    #[must_use]
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.read_sessions().contains_key(client_id)
    }

    #[must_use]
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.read_sessions().keys().cloned().collect()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.read_sessions().len()
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Enqueue one frame on a client's GET stream.
    ///
    /// Returns `false` if the client has no open session, the stream is
    /// already torn down, or the message cannot be encoded. Never panics.
    pub fn send_message<T>(&self, client_id: &ClientId, message: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        let frame = match frames::encode(message) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(%client_id, error = %e, "failed to encode outbound message");
                return false;
            }
        };
        self.enqueue(client_id, frame)
    }

    /// Send one message to every registered client. A failure for one client
    /// does not affect the others. Returns the number of clients reached.
    pub fn broadcast_message<T>(&self, message: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        let frame = match frames::encode(message) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(error = %e, "failed to encode broadcast message");
                return 0;
            }
        };

        self.client_ids()
            .iter()
            .filter(|client_id| self.enqueue(client_id, frame.clone()))
            .count()
    }

    fn enqueue(&self, client_id: &ClientId, frame: Bytes) -> bool {
        let sessions = self.read_sessions();
        let Some(session) = sessions.get(client_id) else {
            debug!(%client_id, "send to unknown client");
            return false;
        };
        if session.outbound.send(frame).is_err() {
            warn!(%client_id, "send to closed stream");
            return false;
        }
        true
    }

    fn read_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ClientId, Session>> {
        self.inner.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ClientId, Session>> {
        self.inner.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// OUTBOUND STREAM
// =============================================================================

/// Removes its session when the GET body is dropped.
struct SessionGuard {
    registry: SessionRegistry,
    client_id: ClientId,
    generation: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove_generation(&self.client_id, self.generation);
    }
}

/// Body of one GET response: the frames enqueued for its session.
///
/// Ends when the session is removed or replaced.
pub struct OutboundStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
    _guard: SessionGuard,
}

impl Stream for OutboundStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
