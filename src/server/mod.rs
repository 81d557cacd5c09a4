//! Server half: session registry plus the axum endpoint that feeds it.
//!
//! SYSTEM CONTEXT
//! ==============
//! Applications hold a [`SessionRegistry`], register handlers on it, and
//! mount [`router`] (or call the handlers from their own router). Each GET
//! and POST runs as its own request task; they meet only in the registry.

pub mod registry;
pub mod routes;

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

pub use registry::{OutboundStream, ServerMessageHandler, SessionRegistry};
pub use routes::router;

/// Serve the registry on a bound listener until `shutdown` resolves.
///
/// Open GET streams never finish on their own, so shutdown first closes
/// every session; clients see their GET stream end and drop their POST.
///
/// # Errors
///
/// Returns an error if the underlying server fails.
pub async fn serve<F>(listener: TcpListener, registry: SessionRegistry, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(registry.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let closed = registry.disconnect_all();
            info!(closed, "server shutting down");
        })
        .await
}
