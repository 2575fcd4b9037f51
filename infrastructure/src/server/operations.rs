//! Long-running operation tracking.
//!
//! A tool registered as long-running does not hold its call open: the
//! executor starts it here and immediately answers `{handle, status:
//! "accepted"}`. Progress and the final outcome are then read through the
//! idempotent `operation_status` tool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use toolgate_domain::ExecutionError;
use tracing::{debug, warn};

use super::registration::{ProgressSink, ToolHandler};

/// Finished operations kept before the oldest are forgotten.
const MAX_FINISHED: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationError {
    pub kind: String,
    pub message: String,
}

/// Point-in-time view of one operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationStatus {
    pub handle: String,
    pub tool: String,
    pub status: OperationState,
    pub progress: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct OperationTracker {
    operations: Mutex<HashMap<String, OperationStatus>>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OperationStatus>> {
        self.operations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start `handler` in the background and return its handle.
    pub fn start(
        self: &Arc<Self>,
        tool: &str,
        handler: Arc<dyn ToolHandler>,
        arguments: Value,
    ) -> String {
        let handle = uuid::Uuid::new_v4().to_string();
        self.lock().insert(
            handle.clone(),
            OperationStatus {
                handle: handle.clone(),
                tool: tool.to_string(),
                status: OperationState::Running,
                progress: Vec::new(),
                result: None,
                error: None,
                started_at: Utc::now(),
                finished_at: None,
            },
        );

        let progress = {
            let tracker = Arc::downgrade(self);
            let handle = handle.clone();
            ProgressSink::new(move |chunk| {
                if let Some(tracker) = tracker.upgrade()
                    && let Some(op) = tracker.lock().get_mut(&handle)
                {
                    op.progress.push(chunk);
                }
            })
        };

        let tracker = Arc::clone(self);
        let task_handle = handle.clone();
        let tool_name = tool.to_string();
        tokio::spawn(async move {
            let work = tokio::spawn(async move { handler.call(arguments, progress).await });
            let outcome = match work.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ExecutionError::internal(format!("operation aborted: {}", e))),
            };
            if let Err(e) = &outcome {
                warn!(tool = %tool_name, handle = %task_handle, error = %e, "Operation failed");
            } else {
                debug!(tool = %tool_name, handle = %task_handle, "Operation finished");
            }
            tracker.finish(&task_handle, outcome);
        });

        handle
    }

    fn finish(&self, handle: &str, outcome: Result<Value, ExecutionError>) {
        let mut operations = self.lock();
        if let Some(op) = operations.get_mut(handle) {
            op.finished_at = Some(Utc::now());
            match outcome {
                Ok(value) => {
                    op.status = OperationState::Succeeded;
                    op.result = Some(value);
                }
                Err(e) => {
                    op.status = OperationState::Failed;
                    let kind = match &e {
                        ExecutionError::Failed { kind, .. } => kind.as_str().to_string(),
                        ExecutionError::InvalidArguments(_) => "invalid_arguments".to_string(),
                        ExecutionError::UnknownTool(_) => "not_found".to_string(),
                    };
                    op.error = Some(OperationError {
                        kind,
                        message: e.to_string(),
                    });
                }
            }
        }
        prune(&mut operations);
    }

    /// Current view of an operation.
    pub fn status(&self, handle: &str) -> Result<OperationStatus, ExecutionError> {
        self.lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| ExecutionError::not_found(format!("no operation with handle '{}'", handle)))
    }

    pub fn running(&self) -> usize {
        self.lock()
            .values()
            .filter(|op| op.status == OperationState::Running)
            .count()
    }
}

fn prune(operations: &mut HashMap<String, OperationStatus>) {
    let mut finished: Vec<(DateTime<Utc>, String)> = operations
        .values()
        .filter_map(|op| op.finished_at.map(|at| (at, op.handle.clone())))
        .collect();
    if finished.len() <= MAX_FINISHED {
        return;
    }
    finished.sort();
    let excess = finished.len() - MAX_FINISHED;
    for (_, handle) in finished.into_iter().take(excess) {
        operations.remove(&handle);
    }
}
