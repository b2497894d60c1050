//! ferry-core — decoded message types and configuration.
//! The server crate depends on this one.

pub mod config;
pub mod message;

pub use config::{ConfigError, FerryConfig, TransferConfig};
pub use message::{
    ChunkFetchRequest, FetchClass, Message, OneWayMessage, ProtocolError, Response, RpcRequest,
    StreamChunkId, StreamRequest, GIANT_PRIORITY,
};
