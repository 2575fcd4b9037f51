//! Session domain.
//!
//! - [`entities::Session`]: a caller-scoped call history
//! - [`entities::Turn`]: one recorded request/response exchange

pub mod entities;
