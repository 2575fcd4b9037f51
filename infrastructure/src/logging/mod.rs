//! Logging infrastructure: structured call logging.
//!
//! Provides [`JsonlCallLogger`], a JSONL file writer that implements
//! the [`CallLogger`](toolgate_application::CallLogger) port.

mod call_log;

pub use call_log::JsonlCallLogger;
