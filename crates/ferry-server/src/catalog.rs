//! Stream catalog — the storage side of chunk and stream transfers.

use bytes::Bytes;

use crate::channel::Client;

/// Trait for the component that owns chunk/stream data.
///
/// The handler never caches anything it gets from here. Buffers are moved
/// straight into responses.
pub trait StreamCatalog: Send + Sync {
    /// Fails with [`CatalogError::Unauthorized`] if `client` may not read
    /// `stream_id`.
    fn check_authorization(&self, client: &Client, stream_id: i64) -> Result<(), CatalogError>;

    /// Associate the connection with a stream so the catalog can clean up
    /// when the connection goes away.
    fn register_channel(&self, client: &Client, stream_id: i64);

    fn get_chunk(&self, stream_id: i64, chunk_index: i32) -> Result<Bytes, CatalogError>;

    /// Chunks currently handed to the transport but not yet written.
    fn chunks_being_transferred(&self) -> i64;

    fn chunk_being_sent(&self, stream_id: i64);

    /// Called once per chunk_being_sent, whether or not the write succeeded.
    fn chunk_sent(&self, stream_id: i64);

    /// `Ok(None)` if the stream does not exist.
    fn open_stream(&self, stream_id: &str) -> Result<Option<Bytes>, CatalogError>;

    fn stream_being_sent(&self, stream_id: &str);

    fn stream_sent(&self, stream_id: &str);

    fn connection_terminated(&self, client: &Client) -> Result<(), CatalogError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("client {client} is not authorized to read stream {stream_id}")]
    Unauthorized { client: String, stream_id: i64 },
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}
