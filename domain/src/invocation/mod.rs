//! Invocation domain: the closed error taxonomy and result types.

pub mod error;
pub mod value_objects;
