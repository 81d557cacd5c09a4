//! Full-duplex messaging over plain HTTP.
//!
//! A client holds two long-lived requests against one endpoint: a GET whose
//! response body carries server → client frames, and a POST whose request
//! body carries client → server frames. Frames are newline-delimited JSON
//! (see the `frames` crate). The two requests are tied together only by the
//! `ClientId` the server assigns on the first GET.
//!
//! - [`client::BiHttpClient`]: the client session agent
//! - [`server::SessionRegistry`] and [`server::router`]: the server half

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod server;

pub use client::BiHttpClient;
pub use config::{ClientConfig, ServerConfig};
pub use error::{ClientError, RequestError, StreamKind};
pub use protocol::{ClientId, ConnectionState};
pub use server::SessionRegistry;
