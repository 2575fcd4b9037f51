//! Gateway-side backend connections.
//!
//! - [`stream`]: opens TCP or stdio transports
//! - [`client`]: JSON-RPC request multiplexer over one transport
//! - [`connection`]: [`RemoteBackend`], the `BackendConnection` adapter
//! - [`supervisor`]: connect / discover / health / reconnect loop
//! - [`pool`]: every enabled backend plus the shared registry

pub mod client;
pub mod connection;
pub mod pool;
pub mod stream;
pub mod supervisor;

pub use connection::RemoteBackend;
pub use pool::BackendPool;
