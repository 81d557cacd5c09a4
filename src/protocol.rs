//! Shared protocol vocabulary for both halves of a duplex channel.
//!
//! DESIGN
//! ======
//! A logical channel is two independent HTTP exchanges tied together only
//! by a `ClientId`:
//! - `GET  <endpoint>?clientId=<id?>`: server → client frames (response body)
//! - `POST <endpoint>?clientId=<id>`: client → server frames (request body)
//!
//! The server assigns the id on the first GET and echoes it in `X-Client-ID`.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// WIRE CONSTANTS
// =============================================================================

/// Response header carrying the assigned or reused client id.
pub const CLIENT_ID_HEADER: HeaderName = HeaderName::from_static("x-client-id");

/// Query parameter carrying the client id on both requests.
pub const CLIENT_ID_QUERY: &str = "clientId";

/// Content type of the server → client stream.
pub const STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Content type declared on the client → server stream.
pub const POST_CONTENT_TYPE: &str = "application/json";

// =============================================================================
// CLIENT ID
// =============================================================================

/// Opaque identifier correlating a client's GET and POST streams.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Fresh random id for a client that did not supply one.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Query string shared by the GET and POST handlers.
#[derive(Debug, Default, Deserialize)]
pub struct ClientIdQuery {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

impl ClientIdQuery {
    /// The supplied id, or a generated one when absent or empty.
    #[must_use]
    pub fn resolve(self) -> ClientId {
        self.client_id
            .filter(|id| !id.is_empty())
            .map_or_else(ClientId::generate, ClientId::from)
    }
}

// =============================================================================
// CONNECTION STATE
// =============================================================================

/// Lifecycle of a client-side channel.
///
/// `Disconnected → Connecting → Connected → Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

// =============================================================================
// HANDLER SET
// =============================================================================

/// Unordered set of callbacks compared by `Arc` identity.
///
/// Dispatch works on a snapshot, so handlers added or removed while frames
/// are being delivered only affect later frames. Handlers may register or
/// remove handlers from inside a callback.
pub struct HandlerSet<H: ?Sized> {
    handlers: Mutex<Vec<Arc<H>>>,
}

impl<H: ?Sized> HandlerSet<H> {
    #[must_use]
    pub fn new() -> Self {
        Self { handlers: Mutex::new(Vec::new()) }
    }

    /// Add a handler. Returns `false` if this exact handler is already present.
    pub fn add(&self, handler: Arc<H>) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Remove a handler by identity. Returns `false` if it was not registered.
    pub fn remove(&self, handler: &Arc<H>) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        handlers.len() != before
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<H>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: ?Sized> Default for HandlerSet<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
