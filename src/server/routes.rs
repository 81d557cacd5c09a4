//! HTTP surface. One endpoint, dispatched by method.
//!
//! LIFECYCLE
//! =========
//! 1. `GET ?clientId=<id?>` → register session → 200 with an open body
//! 2. `POST ?clientId=<id>` → decode body frames → dispatch to handlers
//! 3. POST body ends → 200 `OK`; GET body dropped → session removed
//!
//! Any other method on the endpoint is answered with 405 by the router.

use std::pin::pin;

use axum::Router;
use axum::body::{Body, HttpBody};
use axum::extract::{Query, State};
use axum::http::header::{ALLOW, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::RequestError;
use crate::frame::decode_stream;
use crate::protocol::{CLIENT_ID_HEADER, ClientId, ClientIdQuery, STREAM_CONTENT_TYPE};

use super::registry::SessionRegistry;

/// Build the router serving both stream halves on the configured endpoint.
pub fn router(registry: SessionRegistry) -> Router {
    let endpoint = registry.config().endpoint.clone();
    Router::new()
        .route(&endpoint, get(handle_get).post(handle_post).head(handle_head))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

fn client_id_header(client_id: &ClientId) -> Result<HeaderValue, RequestError> {
    HeaderValue::from_str(client_id.as_str()).map_err(|_| RequestError::InvalidClientId)
}

// =============================================================================
// GET: server → client
// =============================================================================

/// Open the outbound stream for a new or returning client.
pub async fn handle_get(
    State(registry): State<SessionRegistry>,
    Query(query): Query<ClientIdQuery>,
) -> Result<Response, RequestError> {
    let client_id = query.resolve();
    let id_header = client_id_header(&client_id)?;

    let outbound = registry.register(client_id);

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(STREAM_CONTENT_TYPE));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CLIENT_ID_HEADER, id_header);

    Ok((headers, Body::from_stream(outbound)).into_response())
}

/// Refuse HEAD instead of letting it reach the GET handler and register a session.
pub async fn handle_head() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, [(ALLOW, "GET, POST")]).into_response()
}

// =============================================================================
// POST: client → server
// =============================================================================

/// Read the inbound stream to completion, dispatching each frame in order.
pub async fn handle_post(
    State(registry): State<SessionRegistry>,
    Query(query): Query<ClientIdQuery>,
    body: Body,
) -> Result<Response, RequestError> {
    if body.is_end_stream() {
        return Err(RequestError::MissingBody);
    }

    let client_id = query.resolve();
    let id_header = client_id_header(&client_id)?;

    if !registry.contains(&client_id) {
        if registry.config().reject_orphan_posts {
            return Err(RequestError::UnknownClient(client_id));
        }
        debug!(%client_id, "POST stream without GET session; accepting as send-only");
    }

    info!(%client_id, "client stream opened");

    let mut messages = pin!(decode_stream(body.into_data_stream()));
    let mut received = 0_usize;
    while let Some(next) = messages.next().await {
        let message = next.map_err(RequestError::Processing)?;
        registry.dispatch(&message, &client_id);
        received += 1;
    }

    info!(%client_id, received, "client stream closed");

    Ok(([(CLIENT_ID_HEADER, id_header)], "OK").into_response())
}

#[cfg(test)]
#[path = "routes_test.rs"]
mod tests;
