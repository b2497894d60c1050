//! ferry-server — per-connection request handling.
//!
//! One [`RequestHandler`] is created for each open connection. It routes
//! decoded requests to the stream catalog or the RPC service, serves
//! priority chunk fetches inline, and pushes best-effort fetches through a
//! bandwidth-throttled queue drained by a per-connection worker task.

pub mod catalog;
pub mod channel;
pub mod fetch;
pub mod handler;
pub mod respond;
pub mod rpc;
pub mod throttle;

pub use catalog::{CatalogError, StreamCatalog};
pub use channel::{Client, ResponseChannel, SendCompletion, TransportError};
pub use fetch::ChunkFetcher;
pub use handler::RequestHandler;
pub use respond::Responder;
pub use rpc::{RpcResponseCallback, RpcService};
pub use throttle::{BandwidthQuota, ThrottleStats, ThrottledFetchQueue};
