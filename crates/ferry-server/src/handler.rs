//! Request handler — one per connection.
//!
//! Routes each decoded message to the chunk fetch path, the stream path,
//! or the RPC service, and wires connection lifecycle events to cleanup.
//! All methods run on the connection's delivery context; the only other
//! actor is the giant-fetch worker owned by [`ThrottledFetchQueue`].

use std::sync::Arc;

use ferry_core::{
    ChunkFetchRequest, FetchClass, Message, OneWayMessage, ProtocolError, Response, RpcRequest,
    StreamRequest, TransferConfig,
};

use crate::catalog::StreamCatalog;
use crate::channel::{describe_remote, Client};
use crate::fetch::ChunkFetcher;
use crate::respond::Responder;
use crate::rpc::{RpcResponseCallback, RpcService};
use crate::throttle::{BandwidthQuota, ThrottleStats, ThrottledFetchQueue};

/// Chunk and stream serving. Absent when the server has no catalog.
struct StreamPath {
    fetcher: Arc<ChunkFetcher>,
    giant: ThrottledFetchQueue,
}

pub struct RequestHandler {
    responder: Responder,
    rpc: Arc<dyn RpcService>,
    streams: Option<StreamPath>,
}

impl RequestHandler {
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(
        client: Client,
        rpc: Arc<dyn RpcService>,
        catalog: Option<Arc<dyn StreamCatalog>>,
        config: &TransferConfig,
    ) -> Self {
        let responder = Responder::new(client);
        let streams = catalog.map(|catalog| {
            let quota = Arc::new(BandwidthQuota::new(config.refill_per_tick()));
            let fetcher = Arc::new(ChunkFetcher::new(
                responder.clone(),
                catalog,
                quota,
                config.max_chunks_being_transferred,
            ));
            let giant = ThrottledFetchQueue::new(fetcher.clone(), config);
            StreamPath { fetcher, giant }
        });
        Self {
            responder,
            rpc,
            streams,
        }
    }

    pub fn client(&self) -> &Client {
        self.responder.client()
    }

    /// Throttle snapshot, or None if this handler serves no streams.
    pub fn throttle_stats(&self) -> Option<ThrottleStats> {
        self.streams.as_ref().map(|s| s.giant.stats())
    }

    /// Dispatch one decoded message. Responses showing up on the request
    /// path are a protocol violation and are returned to the caller.
    pub fn handle(&self, message: Message) -> Result<(), ProtocolError> {
        match message {
            Message::ChunkFetchRequest(req) => self.on_chunk_fetch(req),
            Message::RpcRequest(req) => self.on_rpc_request(req),
            Message::OneWayMessage(msg) => self.on_one_way(msg),
            Message::StreamRequest(req) => self.on_stream_request(req),
            other => return Err(ProtocolError::UnexpectedMessage(other.kind())),
        }
        Ok(())
    }

    // ── Chunks and streams ───────────────────────────────────────────────────

    fn on_chunk_fetch(&self, req: ChunkFetchRequest) {
        let Some(streams) = &self.streams else {
            self.responder.send(Response::ChunkFetchFailure {
                stream_chunk_id: req.stream_chunk_id,
                error: "chunk fetches are not supported on this connection".to_string(),
            });
            return;
        };

        match req.stream_chunk_id.fetch_class() {
            FetchClass::Priority => streams.fetcher.serve(req, FetchClass::Priority),
            FetchClass::Giant => streams.giant.submit(req),
        }
    }

    fn on_stream_request(&self, req: StreamRequest) {
        let StreamRequest { stream_id } = req;
        tracing::trace!(
            remote = %describe_remote(self.client().as_ref()),
            stream_id = %stream_id,
            "received stream request"
        );

        let Some(streams) = &self.streams else {
            self.responder.send(Response::StreamFailure {
                stream_id,
                error: "streams are not supported on this connection".to_string(),
            });
            return;
        };

        if !streams.fetcher.admit() {
            return;
        }

        let catalog = streams.fetcher.catalog();
        let body = match catalog.open_stream(&stream_id) {
            Ok(Some(body)) => body,
            Ok(None) => {
                let error = format!("Stream '{stream_id}' was not found.");
                self.responder.send(Response::StreamFailure { stream_id, error });
                return;
            }
            Err(e) => {
                tracing::error!(
                    remote = %describe_remote(self.client().as_ref()),
                    stream_id = %stream_id,
                    error = %e,
                    "error opening stream"
                );
                self.responder.send(Response::StreamFailure {
                    stream_id,
                    error: e.to_string(),
                });
                return;
            }
        };

        catalog.stream_being_sent(&stream_id);
        let catalog = Arc::clone(catalog);
        let sent_id = stream_id.clone();
        self.responder.send_then(
            Response::StreamResponse {
                stream_id,
                byte_count: body.len() as u64,
                body,
            },
            move |_| catalog.stream_sent(&sent_id),
        );
    }

    // ── RPC ──────────────────────────────────────────────────────────────────

    fn on_rpc_request(&self, req: RpcRequest) {
        let RpcRequest { request_id, body } = req;

        let responder = self.responder.clone();
        let callback = RpcResponseCallback::new(move |result| match result {
            Ok(body) => responder.send(Response::RpcResponse { request_id, body }),
            Err(e) => {
                tracing::error!(request_id, error = %e, "rpc handler reported failure");
                responder.send(Response::RpcFailure {
                    request_id,
                    error: format!("{e:#}"),
                });
            }
        });

        if let Err(e) = self.rpc.receive(self.client(), &body, callback) {
            tracing::error!(
                remote = %describe_remote(self.client().as_ref()),
                request_id,
                error = %e,
                "error while invoking rpc handler"
            );
            self.responder.send(Response::RpcFailure {
                request_id,
                error: format!("{e:#}"),
            });
        }
        drop(body);
    }

    fn on_one_way(&self, msg: OneWayMessage) {
        let OneWayMessage { body } = msg;
        if let Err(e) = self.rpc.receive_one_way(self.client(), &body) {
            tracing::error!(
                remote = %describe_remote(self.client().as_ref()),
                error = %e,
                "error while invoking one-way handler"
            );
        }
        drop(body);
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub fn channel_active(&self) {
        tracing::debug!(remote = %describe_remote(self.client().as_ref()), "connection active");
        self.rpc.channel_active(self.client());
    }

    /// Connection gone. Catalog cleanup and the worker stop always complete;
    /// catalog errors are logged only.
    pub fn channel_inactive(&self) {
        if let Some(streams) = &self.streams {
            if let Err(e) = streams.fetcher.catalog().connection_terminated(self.client()) {
                tracing::warn!(
                    remote = %describe_remote(self.client().as_ref()),
                    error = %e,
                    "stream catalog failed to clean up terminated connection"
                );
            }
            streams.giant.stop();
        }
        self.rpc.channel_inactive(self.client());
        tracing::debug!(remote = %describe_remote(self.client().as_ref()), "connection inactive");
    }

    /// Forwarded only. Closing is the transport's decision.
    pub fn exception_caught(&self, error: &anyhow::Error) {
        tracing::debug!(
            remote = %describe_remote(self.client().as_ref()),
            error = %error,
            "connection exception"
        );
        self.rpc.exception_caught(error, self.client());
    }
}
