//! Decoded protocol messages.
//!
//! Framing and encoding live in the transport. Everything here arrives
//! already decoded, so the request handler only sees typed values.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Priority value a peer puts on a best-effort ("giant") fetch.
pub const GIANT_PRIORITY: i32 = -1;

// ── Chunk addressing ─────────────────────────────────────────────────────────

/// Identifies one chunk of one stream, plus the peer's urgency marker.
///
/// `priority >= 0` is priority class N and is served inline.
/// `priority < 0` is best-effort and goes through the bandwidth throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamChunkId {
    pub stream_id: i64,
    pub chunk_index: i32,
    pub priority: i32,
    /// Unix timestamp in milliseconds, stamped by the requester.
    pub submitted_at_millis: i64,
}

impl StreamChunkId {
    /// A priority-0 id stamped with the current time.
    pub fn new(stream_id: i64, chunk_index: i32) -> Self {
        Self {
            stream_id,
            chunk_index,
            priority: 0,
            submitted_at_millis: now_millis(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_best_effort(&self) -> bool {
        self.priority < 0
    }

    pub fn fetch_class(&self) -> FetchClass {
        if self.is_best_effort() {
            FetchClass::Giant
        } else {
            FetchClass::Priority
        }
    }
}

impl fmt::Display for StreamChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stream_id, self.chunk_index)
    }
}

/// How a chunk fetch is being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchClass {
    /// Served inline on the delivery path.
    Priority,
    /// Served by the throttle worker under the bandwidth quota.
    Giant,
}

/// Milliseconds since the Unix epoch. Zero if the clock is before 1970.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFetchRequest {
    pub stream_chunk_id: StreamChunkId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub request_id: u64,
    pub body: Bytes,
}

/// Fire-and-forget payload. No response is ever produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneWayMessage {
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub stream_id: String,
}

// ── Responses ────────────────────────────────────────────────────────────────

/// Everything the handler can write back to a peer.
///
/// Failure variants carry the originating request's identifier so the peer
/// can correlate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ChunkFetchSuccess {
        stream_chunk_id: StreamChunkId,
        body: Bytes,
    },
    ChunkFetchFailure {
        stream_chunk_id: StreamChunkId,
        error: String,
    },
    RpcResponse {
        request_id: u64,
        body: Bytes,
    },
    RpcFailure {
        request_id: u64,
        error: String,
    },
    StreamResponse {
        stream_id: String,
        byte_count: u64,
        body: Bytes,
    },
    StreamFailure {
        stream_id: String,
        error: String,
    },
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChunkFetchSuccess { .. } => "ChunkFetchSuccess",
            Self::ChunkFetchFailure { .. } => "ChunkFetchFailure",
            Self::RpcResponse { .. } => "RpcResponse",
            Self::RpcFailure { .. } => "RpcFailure",
            Self::StreamResponse { .. } => "StreamResponse",
            Self::StreamFailure { .. } => "StreamFailure",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ChunkFetchFailure { .. } | Self::RpcFailure { .. } | Self::StreamFailure { .. }
        )
    }

    /// Payload bytes carried by a success response, zero for failures.
    pub fn body_len(&self) -> usize {
        match self {
            Self::ChunkFetchSuccess { body, .. }
            | Self::RpcResponse { body, .. }
            | Self::StreamResponse { body, .. } => body.len(),
            _ => 0,
        }
    }
}

// ── Inbound envelope ─────────────────────────────────────────────────────────

/// A decoded inbound frame.
///
/// The decoder does not know which direction a frame is supposed to flow,
/// so responses can show up here too. The request handler rejects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ChunkFetchRequest(ChunkFetchRequest),
    RpcRequest(RpcRequest),
    OneWayMessage(OneWayMessage),
    StreamRequest(StreamRequest),
    Response(Response),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChunkFetchRequest(_) => "ChunkFetchRequest",
            Self::RpcRequest(_) => "RpcRequest",
            Self::OneWayMessage(_) => "OneWayMessage",
            Self::StreamRequest(_) => "StreamRequest",
            Self::Response(r) => r.kind(),
        }
    }
}

impl From<ChunkFetchRequest> for Message {
    fn from(req: ChunkFetchRequest) -> Self {
        Self::ChunkFetchRequest(req)
    }
}

impl From<RpcRequest> for Message {
    fn from(req: RpcRequest) -> Self {
        Self::RpcRequest(req)
    }
}

impl From<OneWayMessage> for Message {
    fn from(msg: OneWayMessage) -> Self {
        Self::OneWayMessage(msg)
    }
}

impl From<StreamRequest> for Message {
    fn from(req: StreamRequest) -> Self {
        Self::StreamRequest(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Self::Response(resp)
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown request type: {0}")]
    UnexpectedMessage(&'static str),
}
