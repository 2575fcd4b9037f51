//! Session Store port
//!
//! Process-wide mapping from session id to call history. Implementations
//! must let appends to different sessions proceed without contention and
//! serialize appends to the same session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use toolgate_domain::{Session, SessionSummary, Turn};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the session for `id`, creating it when absent.
    ///
    /// `None` generates a fresh unique id. An unknown id creates a new
    /// session under that id.
    async fn get_or_create(&self, id: Option<&str>, user_id: Option<&str>) -> Session;

    /// Append a turn. Returns `false` when the session no longer exists
    /// (evicted concurrently); the turn is dropped in that case.
    async fn append(&self, id: &str, turn: Turn) -> bool;

    /// Remove every session idle since before `older_than`. Returns the
    /// number removed.
    async fn evict(&self, older_than: DateTime<Utc>) -> usize;

    async fn get(&self, id: &str) -> Option<Session>;

    /// Summaries sorted by most recent activity first, optionally
    /// filtered by user.
    async fn list(&self, user_id: Option<&str>) -> Vec<SessionSummary>;

    async fn delete(&self, id: &str) -> bool;
}
