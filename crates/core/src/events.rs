use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::{ExecutionStatus, ExecutionSummary};
use crate::select::SelectionReason;

/// Notifications for the presentation layer. Fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum EngineEvent {
    DuplicateFound(DuplicateFoundEvent),
    PlanProgress(PlanProgressEvent),
    PlanExecutionComplete(PlanCompleteEvent),
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::DuplicateFound(_) => "duplicate-found",
            EngineEvent::PlanProgress(_) => "plan-progress",
            EngineEvent::PlanExecutionComplete(_) => "plan-execution-complete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateFoundEvent {
    pub group_id: String,
    pub identity_key: String,
    pub files: Vec<PathBuf>,
    pub kept: Option<PathBuf>,
    pub reason: SelectionReason,
    pub total_size: u64,
    pub reclaimable_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanProgressEvent {
    pub plan_id: String,
    pub execution_id: String,
    pub operation_index: usize,
    pub total_operations: usize,
    pub current_path: PathBuf,
    pub bytes: u64,
    pub percentage: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanCompleteEvent {
    pub plan_id: String,
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub dry_run: bool,
    pub summary: ExecutionSummary,
}

/// Receiver for engine events, passed into the engines explicitly.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &EngineEvent) {}
}

/// Renders events as log lines.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::DuplicateFound(found) => info!(
                "{}: {} file(s), {} reclaimable byte(s), keeping {:?}",
                event.name(),
                found.files.len(),
                found.reclaimable_bytes,
                found.kept
            ),
            EngineEvent::PlanProgress(progress) => info!(
                "{}: {}/{} ({:.0}%) {}",
                event.name(),
                progress.operation_index + 1,
                progress.total_operations,
                progress.percentage,
                progress.current_path.display()
            ),
            EngineEvent::PlanExecutionComplete(done) => {
                if done.summary.errors.is_empty() {
                    info!(
                        "{}: plan {} {:?}, {} completed",
                        event.name(),
                        done.plan_id,
                        done.status,
                        done.summary.completed
                    );
                } else {
                    warn!(
                        "{}: plan {} {:?}, {} completed, {} failed: {}",
                        event.name(),
                        done.plan_id,
                        done.status,
                        done.summary.completed,
                        done.summary.failed,
                        done.summary.errors.join(" | ")
                    );
                }
            }
        }
    }
}

/// Buffers events in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<EngineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &EngineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(_) => warn!("event buffer lock poisoned; dropping {}", event.name()),
        }
    }
}
