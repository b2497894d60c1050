//! Response sending — write, watch the completion, close on failure.

use std::sync::Arc;

use tokio::runtime::Handle;

use ferry_core::Response;

use crate::channel::{describe_remote, Client};

/// Writes responses for one connection.
///
/// Sends never wait on the caller's thread. The completion is awaited on a
/// spawned task, and a failed write closes the connection.
#[derive(Clone)]
pub struct Responder {
    client: Client,
    runtime: Handle,
}

impl Responder {
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(client: Client) -> Self {
        Self::with_runtime(client, Handle::current())
    }

    pub fn with_runtime(client: Client, runtime: Handle) -> Self {
        Self { client, runtime }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Send and forget.
    pub fn send(&self, response: Response) {
        self.send_then(response, |_| {});
    }

    /// Send, then run `on_complete` exactly once with whether the write
    /// succeeded.
    pub fn send_then<F>(&self, response: Response, on_complete: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let kind = response.kind();
        let body_len = response.body_len();
        let completion = self.client.send(response);
        let client = Arc::clone(&self.client);

        self.runtime.spawn(async move {
            let ok = match completion.await {
                Ok(()) => {
                    tracing::trace!(
                        remote = %describe_remote(client.as_ref()),
                        kind,
                        body_len,
                        "response sent"
                    );
                    true
                }
                Err(e) => {
                    tracing::error!(
                        remote = %describe_remote(client.as_ref()),
                        kind,
                        error = %e,
                        "failed to send response, closing connection"
                    );
                    client.close();
                    false
                }
            };
            on_complete(ok);
        });
    }
}
