use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::PlanStatus;

/// Grouping ran before hashing finished for some records. Reported alongside
/// the result, the affected records are simply left out of hash grouping.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{} record(s) excluded until their content hash is available", .deferred.len())]
pub struct ScanIncomplete {
    pub deferred: Vec<PathBuf>,
}

/// A plan failed its conflict or ordering checks. Nothing has been mutated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("operation {operation_id} ({kind}) on {path} needs a destination")]
    MissingDestination {
        operation_id: String,
        kind: String,
        path: PathBuf,
    },
    #[error("more than one operation targets source {path}")]
    DuplicateSource { path: PathBuf },
    #[error("destination {destination} is already claimed")]
    DestinationCollision { destination: PathBuf },
    #[error("cannot delete {path}: {pending} pending operation(s) inside it")]
    DeleteWithPendingChildren { path: PathBuf, pending: usize },
    #[error("operations form a cycle: {}", display_paths(.paths))]
    CyclicOperations { paths: Vec<PathBuf> },
    #[error("cannot place {path} inside itself at {destination}")]
    MoveIntoOwnSubtree { path: PathBuf, destination: PathBuf },
    #[error("destination {destination} lies inside {moved}, which the plan moves or deletes")]
    DestinationInsideMovedSource {
        destination: PathBuf,
        moved: PathBuf,
    },
    #[error("plan is {status:?}; only ready plans can be previewed or executed")]
    PlanNotReady { status: PlanStatus },
    #[error("plan is {status:?}; only draft plans can be validated")]
    PlanNotDraft { status: PlanStatus },
    #[error("rule {rule_id}: invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        rule_id: String,
        pattern: String,
        reason: String,
    },
    #[error("rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("operation {operation_id} failed on {path}: {source}")]
    Io {
        operation_id: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("operation {operation_id}: destination {path} already exists")]
    Conflict { operation_id: String, path: PathBuf },
    #[error("invalid plan transition {from:?} -> {to:?}")]
    InvalidTransition { from: PlanStatus, to: PlanStatus },
    #[error("execution has nothing to roll back")]
    RollbackUnavailable,
    #[error("{path} was removed permanently and cannot be restored")]
    Irreversible { path: PathBuf },
}

impl ExecutionError {
    pub fn io(operation_id: &str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExecutionError::Io {
            operation_id: operation_id.to_string(),
            path: path.into(),
            source,
        }
    }
}
