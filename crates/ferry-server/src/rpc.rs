//! RPC service trait.
//!
//! The handler owns nothing about RPC semantics. It hands each payload to
//! the service together with a single-use callback, and turns whatever the
//! callback receives into a response on the connection.

use anyhow::Result;
use bytes::Bytes;

use crate::channel::Client;

type Completion = Box<dyn FnOnce(Result<Bytes>) + Send>;

/// Reply slot for one RPC. Consumed by whichever of `on_success` or
/// `on_failure` runs, so a request is answered at most once.
pub struct RpcResponseCallback {
    complete: Completion,
}

impl RpcResponseCallback {
    pub fn new(complete: impl FnOnce(Result<Bytes>) + Send + 'static) -> Self {
        Self {
            complete: Box::new(complete),
        }
    }

    pub fn on_success(self, body: Bytes) {
        (self.complete)(Ok(body));
    }

    pub fn on_failure(self, error: anyhow::Error) {
        (self.complete)(Err(error));
    }
}

impl std::fmt::Debug for RpcResponseCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcResponseCallback").finish_non_exhaustive()
    }
}

/// Trait for the application layer behind the transport.
pub trait RpcService: Send + Sync {
    /// Handle a request that expects a reply. The reply may be delivered
    /// through `callback` later, from any thread.
    ///
    /// An `Err` return is sent to the peer as an RPC failure.
    fn receive(
        &self,
        client: &Client,
        payload: &Bytes,
        callback: RpcResponseCallback,
    ) -> Result<()>;

    /// Handle a fire-and-forget message. Errors are only logged.
    fn receive_one_way(&self, client: &Client, payload: &Bytes) -> Result<()>;

    fn channel_active(&self, _client: &Client) {}

    fn channel_inactive(&self, _client: &Client) {}

    fn exception_caught(&self, _error: &anyhow::Error, _client: &Client) {}
}
