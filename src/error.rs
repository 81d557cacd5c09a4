//! Error types for channel setup and request handling.
//!
//! Only setup failures reach a caller as `Err`. Steady-state failures degrade
//! to `false` from `send_message` or to a log line; request-level failures are
//! reported to the peer as HTTP status codes.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::protocol::ClientId;

/// Which half of the channel an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Server → client response stream.
    Get,
    /// Client → server request stream.
    Post,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Error returned by [`crate::client::BiHttpClient`] construction and `connect`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
    #[error("failed to build HTTP client: {0}")]
    Http(#[source] reqwest::Error),
    #[error("{stream} connection failed: {source}")]
    Setup {
        stream: StreamKind,
        #[source]
        source: reqwest::Error,
    },
    #[error("{stream} connection failed: {status}")]
    SetupStatus { stream: StreamKind, status: StatusCode },
    #[error("server response did not carry a client id")]
    MissingClientId,
    #[error("disconnected while connecting")]
    Interrupted,
}

// =============================================================================
// SERVER
// =============================================================================

/// A request the server refuses or fails to process.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("No request body")]
    MissingBody,
    #[error("Invalid client id")]
    InvalidClientId,
    #[error("Unknown client id: {0}")]
    UnknownClient(ClientId),
    #[error("Error processing message")]
    Processing(#[source] axum::Error),
}

pub(crate) fn request_error_to_status(err: &RequestError) -> StatusCode {
    match err {
        RequestError::MissingBody | RequestError::InvalidClientId => StatusCode::BAD_REQUEST,
        RequestError::UnknownClient(_) => StatusCode::NOT_FOUND,
        RequestError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = request_error_to_status(&self);
        if let Self::Processing(source) = &self {
            warn!(error = %source, "client stream failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
