//! Session entities: per-caller call history kept for conversational context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User id assigned when the caller does not supply one.
pub const DEFAULT_USER_ID: &str = "default_user";

/// Maximum number of characters of the first request used as a title.
pub const TITLE_MAX_CHARS: usize = 50;

/// How a recorded turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Success { backend: String },
    Failure { kind: String },
}

/// One request/response exchange in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub request: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: TurnOutcome,
}

impl Turn {
    pub fn success(
        request: impl Into<String>,
        response: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            request: request.into(),
            response: response.into(),
            timestamp: Utc::now(),
            outcome: TurnOutcome::Success {
                backend: backend.into(),
            },
        }
    }

    pub fn failure(
        request: impl Into<String>,
        message: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            request: request.into(),
            response: message.into(),
            timestamp: Utc::now(),
            outcome: TurnOutcome::Failure { kind: kind.into() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TurnOutcome::Success { .. })
    }
}

/// A caller-scoped, time-bounded record of prior turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, user_id: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.unwrap_or(DEFAULT_USER_ID).to_string(),
            title: String::new(),
            turns: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a turn, refreshing activity and deriving a title from the
    /// first request.
    pub fn push_turn(&mut self, turn: Turn) {
        if self.title.is_empty() {
            self.title = title_from(&turn.request);
        }
        self.last_activity = turn.timestamp.max(self.last_activity);
        self.turns.push(turn);
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Idle since before `cutoff`.
    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_activity < cutoff
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            turn_count: self.turns.len(),
        }
    }
}

/// Lightweight listing entry for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turn_count: usize,
}

fn title_from(request: &str) -> String {
    let mut chars = request.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
