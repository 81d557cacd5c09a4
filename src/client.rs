//! Client session agent. Owns one client's duplex channel.
//!
//! LIFECYCLE
//! =========
//! `connect()` opens the GET stream first; its `X-Client-ID` header names the
//! session. The POST stream is then opened with that id and a channel-backed
//! request body. Two background tasks own the streams:
//!
//! - read loop: GET body → decoder → handlers, until the body ends or fails
//! - post loop: drives the POST request until it completes or fails
//!
//! Either task ending tears the connection down. Each connection attempt gets
//! an epoch number so a stale task cannot tear down a newer connection.

use std::convert::Infallible;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use futures::channel::mpsc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Request, Response, Url};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, StreamKind};
use crate::frame::decode_stream;
use crate::protocol::{CLIENT_ID_HEADER, CLIENT_ID_QUERY, ClientId, ConnectionState, HandlerSet, POST_CONTENT_TYPE};

/// Callback invoked once per frame received on the GET stream.
pub type ClientMessageHandler = dyn Fn(&Value) + Send + Sync;

#[derive(Default)]
struct Link {
    state: ConnectionState,
    client_id: Option<ClientId>,
    cancel: Option<CancellationToken>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    epoch: u64,
}

impl Link {
    fn close(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.outbound = None;
        self.state = ConnectionState::Disconnected;
    }
}

struct ClientInner {
    server_url: Url,
    http: reqwest::Client,
    handlers: HandlerSet<ClientMessageHandler>,
    link: Mutex<Link>,
}

impl ClientInner {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream_url(&self, client_id: Option<&ClientId>) -> Url {
        let mut url = self.server_url.clone();
        if let Some(id) = client_id {
            url.query_pairs_mut().append_pair(CLIENT_ID_QUERY, id.as_str());
        }
        url
    }

    fn dispatch(&self, message: &Value) {
        for handler in self.handlers.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                error!("message handler panicked");
            }
        }
    }

    /// Close the connection opened under `epoch`, if it is still current.
    fn teardown(&self, epoch: u64) {
        let mut link = self.lock_link();
        if link.epoch != epoch || link.state == ConnectionState::Disconnected {
            return;
        }
        link.close();
        let client_id = link.client_id.clone();
        drop(link);
        info!(client_id = ?client_id, "connection closed");
    }
}

/// Client half of the protocol. Clones share one connection.
#[derive(Clone)]
pub struct BiHttpClient {
    inner: Arc<ClientInner>,
}

impl BiHttpClient {
    /// Client for the endpoint at `server_url` with config from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an absolute http(s) URL or the HTTP
    /// client cannot be built.
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        Self::with_config(server_url, ClientConfig::from_env())
    }

    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub fn with_config(server_url: &str, config: ClientConfig) -> Result<Self, ClientError> {
        let server_url = Url::parse(server_url).map_err(|e| ClientError::InvalidUrl(format!("{server_url}: {e}")))?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!("unsupported scheme {}", server_url.scheme())));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                server_url,
                http,
                handlers: HandlerSet::new(),
                link: Mutex::new(Link::default()),
            }),
        })
    }

    #[must_use]
    pub fn server_url(&self) -> &Url {
        &self.inner.server_url
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock_link().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Id assigned by the server on the first successful connect. Kept across
    /// disconnects and sent again on reconnect.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.inner.lock_link().client_id.clone()
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    /// Register a handler for frames received from the server.
    pub fn on_message<F>(&self, handler: F) -> Arc<ClientMessageHandler>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let handler: Arc<ClientMessageHandler> = Arc::new(handler);
        self.inner.handlers.add(Arc::clone(&handler));
        handler
    }

    pub fn remove_message_handler(&self, handler: &Arc<ClientMessageHandler>) -> bool {
        self.inner.handlers.remove(handler)
    }

    // =========================================================================
    // CONNECT / DISCONNECT
    // =========================================================================

    /// Open both streams. On failure both are closed and the state returns to
    /// `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyConnected`] unless disconnected, a setup
    /// error if either request fails, or [`ClientError::Interrupted`] if
    /// `disconnect()` ran while connecting.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (epoch, cancel, known_id) = {
            let mut link = self.inner.lock_link();
            if link.state != ConnectionState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
            let cancel = CancellationToken::new();
            link.state = ConnectionState::Connecting;
            link.epoch += 1;
            link.cancel = Some(cancel.clone());
            (link.epoch, cancel, link.client_id.clone())
        };

        match self.establish(epoch, &cancel, known_id).await {
            Ok(client_id) => {
                info!(%client_id, url = %self.inner.server_url, "connected");
                Ok(())
            }
            Err(e) => {
                self.inner.teardown(epoch);
                warn!(error = %e, "connect failed");
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        epoch: u64,
        cancel: &CancellationToken,
        known_id: Option<ClientId>,
    ) -> Result<ClientId, ClientError> {
        let inner = &self.inner;

        let get = inner.http.get(inner.stream_url(known_id.as_ref())).send();
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(ClientError::Interrupted),
            result = get => result.map_err(|source| ClientError::Setup { stream: StreamKind::Get, source })?,
        };
        if !response.status().is_success() {
            return Err(ClientError::SetupStatus { stream: StreamKind::Get, status: response.status() });
        }

        let client_id = response
            .headers()
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(ClientId::from)
            .or(known_id)
            .ok_or(ClientError::MissingClientId)?;

        let (outbound, rx) = mpsc::unbounded::<Vec<u8>>();
        let body = rx.map(Ok::<_, Infallible>);
        let request = inner
            .http
            .post(inner.stream_url(Some(&client_id)))
            .header(CONTENT_TYPE, POST_CONTENT_TYPE)
            .body(reqwest::Body::wrap_stream(body))
            .build()
            .map_err(|source| ClientError::Setup { stream: StreamKind::Post, source })?;

        {
            let mut link = inner.lock_link();
            if link.epoch != epoch || link.state != ConnectionState::Connecting {
                return Err(ClientError::Interrupted);
            }
            link.state = ConnectionState::Connected;
            link.client_id = Some(client_id.clone());
            link.outbound = Some(outbound);
        }

        tokio::spawn(post_loop(Arc::clone(inner), epoch, cancel.clone(), request));
        tokio::spawn(read_loop(Arc::clone(inner), epoch, cancel.clone(), response));

        Ok(client_id)
    }

    /// Close both streams. Safe to call in any state.
    pub fn disconnect(&self) {
        let mut link = self.inner.lock_link();
        if link.state == ConnectionState::Disconnected {
            return;
        }
        link.close();
        let client_id = link.client_id.clone();
        drop(link);
        info!(client_id = ?client_id, "disconnected");
    }

    // =========================================================================
    // SEND
    // =========================================================================

    /// Write one frame to the POST stream.
    ///
    /// Returns `false` when not connected, when the message cannot be encoded,
    /// or when the POST stream is already gone. Never panics.
    pub fn send_message<T>(&self, message: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        let link = self.inner.lock_link();
        let Some(outbound) = link.outbound.as_ref().filter(|_| link.state == ConnectionState::Connected) else {
            debug!("send while not connected");
            return false;
        };

        let frame = match frames::encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound message");
                return false;
            }
        };

        if outbound.unbounded_send(frame).is_err() {
            warn!("POST stream closed; message dropped");
            return false;
        }
        true
    }
}

// =============================================================================
// BACKGROUND TASKS
// =============================================================================

async fn read_loop(inner: Arc<ClientInner>, epoch: u64, cancel: CancellationToken, response: Response) {
    let mut messages = pin!(decode_stream(response.bytes_stream()));
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = messages.next() => match next {
                Some(Ok(message)) => inner.dispatch(&message),
                Some(Err(e)) => {
                    warn!(error = %e, "GET stream failed");
                    break;
                }
                None => {
                    info!("GET stream ended by server");
                    break;
                }
            },
        }
    }
    inner.teardown(epoch);
}

async fn post_loop(inner: Arc<ClientInner>, epoch: u64, cancel: CancellationToken, request: Request) {
    tokio::select! {
        () = cancel.cancelled() => {}
        result = inner.http.execute(request) => match result {
            Ok(response) if response.status().is_success() => debug!("POST stream completed"),
            Ok(response) => warn!(status = %response.status(), "POST stream rejected"),
            Err(e) => warn!(error = %e, "POST stream failed"),
        },
    }
    inner.teardown(epoch);
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
