//! The connection as seen by the request handler.
//!
//! Transport, framing and TLS live behind this trait. The handler only
//! needs to write a response, learn when the write finished, and close.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;

use ferry_core::Response;

/// Resolves once the transport has finished writing a response.
pub type SendCompletion = BoxFuture<'static, Result<(), TransportError>>;

/// One open connection.
pub trait ResponseChannel: Send + Sync {
    /// Queue a response for writing. Must not block; the returned future
    /// resolves when the write completes or fails.
    fn send(&self, response: Response) -> SendCompletion;

    /// Close the connection. Idempotent.
    fn close(&self);

    fn remote_address(&self) -> Option<SocketAddr>;
}

/// The connection handle passed to collaborators as the caller identity.
pub type Client = Arc<dyn ResponseChannel>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Remote address for log fields.
pub fn describe_remote(client: &dyn ResponseChannel) -> String {
    client
        .remote_address()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
