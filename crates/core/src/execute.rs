use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::ExecutorConfig;
use crate::error::{ExecutionError, ValidationError};
use crate::events::{EngineEvent, EventSink, PlanCompleteEvent, PlanProgressEvent};
use crate::model::{
    ChangeSummary, ExecutionProgress, ExecutionStatus, ExecutionSummary, OperationKind,
    OperationStatus, OrganizationOperation, OrganizationPlan, PlanExecution, PlanStatus,
    ReversalAction, ReversalEntry, RollbackReport,
};
use crate::paths;
use crate::planner::validate_order;
use crate::preview::project;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ExecuteOptions {
    #[serde(default)]
    pub dry_run: bool,
    /// Stage deletes so they can be restored, and roll back automatically
    /// when an operation fails.
    #[serde(default)]
    pub create_backup: bool,
}

/// Applies ready plans one operation at a time.
pub struct PlanExecutor {
    config: ExecutorConfig,
    sink: Arc<dyn EventSink>,
    cancel_flag: Arc<AtomicBool>,
}

impl PlanExecutor {
    pub fn new(config: ExecutorConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = flag;
        self
    }

    /// Setting the returned flag stops execution before the next operation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Runs `plan`. Per-operation failures are reported inside the returned
    /// execution; `Err` means nothing was attempted.
    pub fn execute(
        &self,
        plan: &OrganizationPlan,
        options: &ExecuteOptions,
    ) -> Result<PlanExecution, ExecutionError> {
        if plan.status != PlanStatus::Ready {
            return Err(ValidationError::PlanNotReady {
                status: plan.status,
            }
            .into());
        }
        validate_order(&plan.operations)?;

        let mut execution = PlanExecution {
            id: Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            dry_run: options.dry_run,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            progress: ExecutionProgress {
                total_operations: plan.operations.len(),
                ..ExecutionProgress::default()
            },
            summary: ExecutionSummary::default(),
            changes: ChangeSummary::default(),
            operations: plan.operations.clone(),
            rollback_available: false,
            reversal_log: Vec::new(),
            rollback: None,
        };
        info!(
            "executing plan {} ({} operation(s), dry_run={}, backup={})",
            plan.id,
            plan.operations.len(),
            options.dry_run,
            options.create_backup
        );

        if options.dry_run {
            self.simulate(plan, &mut execution);
        } else {
            self.apply_all(options, &mut execution);
        }

        if execution.status == ExecutionStatus::Failed
            && options.create_backup
            && execution.rollback_available
        {
            warn!("plan {} failed; restoring previous state", plan.id);
            if let Err(err) = self.rollback(&mut execution) {
                warn!("automatic rollback of plan {} failed: {err}", plan.id);
            }
        }

        execution.completed_at = Some(Utc::now());
        self.sink
            .emit(&EngineEvent::PlanExecutionComplete(PlanCompleteEvent {
                plan_id: execution.plan_id.clone(),
                execution_id: execution.id.clone(),
                status: execution.status,
                dry_run: execution.dry_run,
                summary: execution.summary.clone(),
            }));
        Ok(execution)
    }

    fn simulate(&self, plan: &OrganizationPlan, execution: &mut PlanExecution) {
        project(plan, &mut execution.changes);
        execution.summary.directories_created = plan.metadata.new_directories.len() as u64;
        let total = execution.operations.len();
        for index in 0..total {
            if self.is_cancelled() {
                execution.status = ExecutionStatus::Cancelled;
                break;
            }
            let operation = &execution.operations[index];
            count_success(&mut execution.summary, operation);
            self.report_progress(execution, index);
        }
        execution.summary.not_attempted = (total as u64).saturating_sub(execution.summary.completed);
        if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Completed;
        }
    }

    fn apply_all(&self, options: &ExecuteOptions, execution: &mut PlanExecution) {
        let total = execution.operations.len();
        let backup_root = self.config.backup_dir.join(&execution.id);
        for index in 0..total {
            if self.is_cancelled() {
                info!("plan {} cancelled before operation {}", execution.plan_id, index + 1);
                execution.status = ExecutionStatus::Cancelled;
                break;
            }

            execution.operations[index].status = OperationStatus::Running;
            let operation = execution.operations[index].clone();
            let mut step = Step {
                log: &mut execution.reversal_log,
                summary: &mut execution.summary,
                changes: &mut execution.changes,
            };
            let outcome = step.apply(&operation, options, &backup_root);
            let slot = &mut execution.operations[index];
            match outcome {
                Ok(()) => {
                    debug!("operation {} completed", operation.id);
                    slot.status = OperationStatus::Completed;
                    count_success(&mut execution.summary, &operation);
                    execution.changes.record_operation(&operation);
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!("operation {} failed: {message}", operation.id);
                    slot.status = OperationStatus::Failed;
                    slot.error = Some(message.clone());
                    execution.summary.failed += 1;
                    execution.summary.errors.push(message);
                    execution.status = ExecutionStatus::Failed;
                }
            }
            self.report_progress(execution, index);
            if execution.status == ExecutionStatus::Failed {
                break;
            }
        }

        execution.summary.not_attempted = (total as u64)
            .saturating_sub(execution.summary.completed)
            .saturating_sub(execution.summary.failed);
        execution.rollback_available = rollback_possible(&execution.reversal_log);
        if execution.status == ExecutionStatus::Running {
            execution.status = ExecutionStatus::Completed;
        }
    }

    fn report_progress(&self, execution: &mut PlanExecution, index: usize) {
        let total = execution.operations.len();
        let operation = &execution.operations[index];
        let percentage = if total == 0 {
            100.0
        } else {
            (index + 1) as f32 / total as f32 * 100.0
        };
        execution.progress = ExecutionProgress {
            current_operation: index + 1,
            total_operations: total,
            current_file: Some(operation.source.clone()),
            percentage,
        };
        self.sink.emit(&EngineEvent::PlanProgress(PlanProgressEvent {
            plan_id: execution.plan_id.clone(),
            execution_id: execution.id.clone(),
            operation_index: index,
            total_operations: total,
            current_path: operation.source.clone(),
            bytes: operation.size_bytes,
            percentage,
        }));
    }

    /// Replays the applied reversal entries newest first. Entries that fail
    /// are reported and left applied so a later call can retry them.
    pub fn rollback(&self, execution: &mut PlanExecution) -> Result<RollbackReport, ExecutionError> {
        if execution.dry_run || !execution.rollback_available {
            return Err(ExecutionError::RollbackUnavailable);
        }
        for entry in execution.reversal_log.iter().filter(|entry| entry.applied) {
            if let ReversalAction::Irreversible { path } = &entry.action {
                return Err(ExecutionError::Irreversible { path: path.clone() });
            }
        }

        let mut order = (0..execution.reversal_log.len())
            .filter(|index| execution.reversal_log[*index].applied)
            .collect::<Vec<_>>();
        order.sort_by_key(|index| std::cmp::Reverse(execution.reversal_log[*index].seq));

        let mut report = RollbackReport::default();
        for index in order {
            let entry = &mut execution.reversal_log[index];
            match undo(&entry.action) {
                Ok(()) => {
                    entry.applied = false;
                    report.restored += 1;
                }
                Err(err) => {
                    warn!("rollback step {} failed: {err}", entry.seq);
                    report.failed += 1;
                    report
                        .errors
                        .push(format!("step {} ({:?}): {err}", entry.seq, entry.action));
                }
            }
        }

        if report.failed == 0 {
            let mut reverted = 0;
            for operation in &mut execution.operations {
                if operation.status == OperationStatus::Completed {
                    operation.status = OperationStatus::RolledBack;
                    reverted += 1;
                }
            }
            execution.summary.rolled_back += reverted;
            execution.status = ExecutionStatus::RolledBack;
        }
        execution.rollback_available = rollback_possible(&execution.reversal_log);
        info!(
            "rollback of execution {}: {} step(s) restored, {} failed",
            execution.id, report.restored, report.failed
        );
        execution.rollback = Some(report.clone());
        Ok(report)
    }
}

/// Forward state of one running execution.
struct Step<'a> {
    log: &'a mut Vec<ReversalEntry>,
    summary: &'a mut ExecutionSummary,
    changes: &'a mut ChangeSummary,
}

impl Step<'_> {
    /// Logs `action` unapplied and returns its index.
    fn record(&mut self, operation_id: Option<&str>, action: ReversalAction) -> usize {
        let seq = self.log.len() as u64;
        self.log.push(ReversalEntry {
            seq,
            operation_id: operation_id.map(str::to_string),
            action,
            applied: false,
        });
        self.log.len() - 1
    }

    fn apply(
        &mut self,
        operation: &OrganizationOperation,
        options: &ExecuteOptions,
        backup_root: &Path,
    ) -> Result<(), ExecutionError> {
        let id = operation.id.as_str();
        let source = operation.source.as_path();
        fs::symlink_metadata(source).map_err(|err| ExecutionError::io(id, source, err))?;

        match operation.kind {
            OperationKind::Move | OperationKind::Rename | OperationKind::Copy => {
                let Some(destination) = operation.destination_path() else {
                    return Err(ValidationError::MissingDestination {
                        operation_id: id.to_string(),
                        kind: format!("{:?}", operation.kind).to_lowercase(),
                        path: source.to_path_buf(),
                    }
                    .into());
                };
                if fs::symlink_metadata(destination).is_ok() {
                    return Err(ExecutionError::Conflict {
                        operation_id: id.to_string(),
                        path: destination.to_path_buf(),
                    });
                }
                self.ensure_parent(id, destination)?;

                if operation.kind == OperationKind::Copy {
                    let entry = self.record(
                        Some(id),
                        ReversalAction::Remove {
                            path: destination.to_path_buf(),
                        },
                    );
                    if let Err(err) = copy_path(source, destination) {
                        let _ = remove_path(destination);
                        return Err(ExecutionError::io(id, destination, err));
                    }
                    self.log[entry].applied = true;
                } else {
                    let entry = self.record(
                        Some(id),
                        ReversalAction::Move {
                            from: destination.to_path_buf(),
                            to: source.to_path_buf(),
                        },
                    );
                    move_path(source, destination).map_err(|err| ExecutionError::io(id, source, err))?;
                    self.log[entry].applied = true;
                }
            }
            OperationKind::Delete => {
                if options.create_backup {
                    fs::create_dir_all(backup_root)
                        .map_err(|err| ExecutionError::io(id, backup_root, err))?;
                    let staged = backup_root.join(format!(
                        "{}-{}",
                        self.log.len(),
                        paths::file_name(source)
                    ));
                    let entry = self.record(
                        Some(id),
                        ReversalAction::Move {
                            from: staged.clone(),
                            to: source.to_path_buf(),
                        },
                    );
                    move_path(source, &staged).map_err(|err| ExecutionError::io(id, source, err))?;
                    self.log[entry].applied = true;
                } else {
                    let entry = self.record(
                        Some(id),
                        ReversalAction::Irreversible {
                            path: source.to_path_buf(),
                        },
                    );
                    remove_path(source).map_err(|err| ExecutionError::io(id, source, err))?;
                    self.log[entry].applied = true;
                }
            }
        }
        Ok(())
    }

    /// Creates the missing ancestors of `destination`, shallowest first, each
    /// with its own reversal entry.
    fn ensure_parent(&mut self, id: &str, destination: &Path) -> Result<(), ExecutionError> {
        let mut missing = paths::ancestors(destination)
            .into_iter()
            .take_while(|dir| fs::symlink_metadata(dir).is_err())
            .collect::<Vec<PathBuf>>();
        missing.reverse();
        for dir in missing {
            let entry = self.record(Some(id), ReversalAction::RemoveDir { path: dir.clone() });
            fs::create_dir(&dir).map_err(|err| ExecutionError::io(id, &dir, err))?;
            self.log[entry].applied = true;
            self.summary.directories_created += 1;
            self.changes.record_directory(&dir);
        }
        Ok(())
    }
}

fn count_success(summary: &mut ExecutionSummary, operation: &OrganizationOperation) {
    summary.completed += 1;
    match operation.kind {
        OperationKind::Move => summary.files_moved += 1,
        OperationKind::Copy => summary.files_copied += 1,
        OperationKind::Rename => summary.files_renamed += 1,
        OperationKind::Delete => {
            summary.files_deleted += 1;
            summary.bytes_saved = summary.bytes_saved.saturating_add(operation.size_bytes);
        }
    }
}

fn rollback_possible(log: &[ReversalEntry]) -> bool {
    let applied = log.iter().filter(|entry| entry.applied);
    let mut any = false;
    for entry in applied {
        if matches!(entry.action, ReversalAction::Irreversible { .. }) {
            return false;
        }
        any = true;
    }
    any
}

fn undo(action: &ReversalAction) -> io::Result<()> {
    match action {
        ReversalAction::Move { from, to } => {
            if fs::symlink_metadata(to).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", to.display()),
                ));
            }
            move_path(from, to)
        }
        ReversalAction::Remove { path } => remove_path(path),
        ReversalAction::RemoveDir { path } => fs::remove_dir(path),
        ReversalAction::Irreversible { path } => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} was deleted permanently", path.display()),
        )),
    }
}

/// Rename, falling back to copy and remove across volumes.
fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                "rename {} -> {} failed ({rename_err}); copying instead",
                from.display(),
                to.display()
            );
            move_by_copy(from, to, remove_path)
        }
    }
}

/// Copies `from` to `to`, then removes `from` with `remove_source`. On error
/// the source is whole again and `to` is gone, unless restoring the source
/// itself failed, in which case the copy is kept.
fn move_by_copy<R>(from: &Path, to: &Path, remove_source: R) -> io::Result<()>
where
    R: Fn(&Path) -> io::Result<()>,
{
    if let Err(err) = copy_path(from, to) {
        let _ = remove_path(to);
        return Err(err);
    }
    let Err(remove_err) = remove_source(from) else {
        return Ok(());
    };
    match restore_missing(to, from) {
        Ok(()) => {
            if let Err(err) = remove_path(to) {
                warn!("could not drop partial copy {}: {err}", to.display());
            }
        }
        Err(err) => warn!(
            "could not restore {} from {}: {err}; keeping the copy",
            from.display(),
            to.display()
        ),
    }
    Err(remove_err)
}

/// Copies back every entry of `copy` that no longer exists under `original`.
fn restore_missing(copy: &Path, original: &Path) -> io::Result<()> {
    for entry in WalkDir::new(copy).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(copy)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let target = if relative.as_os_str().is_empty() {
            original.to_path_buf()
        } else {
            original.join(relative)
        };
        if fs::symlink_metadata(&target).is_ok() {
            continue;
        }
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_path(from: &Path, to: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(from)?;
    if !metadata.is_dir() {
        fs::copy(from, to)?;
        return Ok(());
    }
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
