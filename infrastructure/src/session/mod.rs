//! Session store adapters.

mod in_memory;
mod sweeper;

pub use in_memory::{DEFAULT_MAX_TURN_BYTES, InMemorySessionStore};
pub use sweeper::spawn_sweeper;
