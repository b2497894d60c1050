//! Chunk fetch path — admission, authorization, lookup, send.
//!
//! Shared by the delivery path (priority fetches, served inline) and the
//! throttle worker (giant fetches). Nothing in here returns an error or
//! unwinds: every failure, a panicking catalog included, becomes a response
//! or a closed connection.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;

use ferry_core::{ChunkFetchRequest, FetchClass, Response, StreamChunkId};

use crate::catalog::{CatalogError, StreamCatalog};
use crate::channel::{describe_remote, Client};
use crate::respond::Responder;
use crate::throttle::BandwidthQuota;

pub struct ChunkFetcher {
    responder: Responder,
    catalog: Arc<dyn StreamCatalog>,
    quota: Arc<BandwidthQuota>,
    max_chunks_being_transferred: i64,
}

impl ChunkFetcher {
    pub fn new(
        responder: Responder,
        catalog: Arc<dyn StreamCatalog>,
        quota: Arc<BandwidthQuota>,
        max_chunks_being_transferred: i64,
    ) -> Self {
        Self {
            responder,
            catalog,
            quota,
            max_chunks_being_transferred,
        }
    }

    pub fn client(&self) -> &Client {
        self.responder.client()
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn catalog(&self) -> &Arc<dyn StreamCatalog> {
        &self.catalog
    }

    pub fn quota(&self) -> &Arc<BandwidthQuota> {
        &self.quota
    }

    /// Admission check. Closes the connection and returns false when the
    /// catalog already has the maximum number of chunks in flight.
    pub fn admit(&self) -> bool {
        let in_flight = self.catalog.chunks_being_transferred();
        if in_flight >= self.max_chunks_being_transferred {
            tracing::warn!(
                remote = %describe_remote(self.client().as_ref()),
                in_flight,
                max = self.max_chunks_being_transferred,
                "too many chunks being transferred, closing connection"
            );
            self.client().close();
            return false;
        }
        true
    }

    /// Serve one chunk fetch. Giant fetches are charged against the quota.
    pub fn serve(&self, request: ChunkFetchRequest, class: FetchClass) {
        let id = request.stream_chunk_id;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.serve_inner(request, class)));
        if let Err(payload) = outcome {
            let reason = panic_message(payload.as_ref());
            tracing::error!(
                remote = %describe_remote(self.client().as_ref()),
                chunk = %id,
                reason,
                "panic while serving chunk fetch"
            );
            self.responder.send(Response::ChunkFetchFailure {
                stream_chunk_id: id,
                error: format!("internal error serving chunk {id}: {reason}"),
            });
        }
    }

    fn serve_inner(&self, request: ChunkFetchRequest, class: FetchClass) {
        let id = request.stream_chunk_id;
        tracing::trace!(
            remote = %describe_remote(self.client().as_ref()),
            chunk = %id,
            ?class,
            "serving chunk fetch"
        );

        if !self.admit() {
            return;
        }

        let body = match self.lookup(&id) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(
                    remote = %describe_remote(self.client().as_ref()),
                    chunk = %id,
                    error = %e,
                    "error opening block for request"
                );
                self.responder.send(Response::ChunkFetchFailure {
                    stream_chunk_id: id,
                    error: e.to_string(),
                });
                return;
            }
        };

        if class == FetchClass::Giant {
            self.quota.debit(body.len() as i64);
        }

        self.catalog.chunk_being_sent(id.stream_id);
        let catalog = Arc::clone(&self.catalog);
        self.responder.send_then(
            Response::ChunkFetchSuccess {
                stream_chunk_id: id,
                body,
            },
            move |_| catalog.chunk_sent(id.stream_id),
        );
    }

    fn lookup(&self, id: &StreamChunkId) -> Result<Bytes, CatalogError> {
        self.catalog.check_authorization(self.client(), id.stream_id)?;
        self.catalog.register_channel(self.client(), id.stream_id);
        self.catalog.get_chunk(id.stream_id, id.chunk_index)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
