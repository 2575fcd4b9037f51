//! JSON-RPC 2.0 plumbing shared by the gateway-side client and the
//! backend-side server.

pub mod error;
pub mod protocol;
pub mod transport;
