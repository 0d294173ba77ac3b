use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedupe::DetectionMethod;

/// One filesystem entry as delivered by a scanner. Read-only to the engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size_bytes: u64,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disk: String,
    #[serde(default)]
    pub is_directory: bool,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            content_hash: None,
            created: None,
            modified: None,
            disk: String::new(),
            is_directory: false,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn on_disk(mut self, disk: impl Into<String>) -> Self {
        self.disk = disk.into();
        self
    }

    pub fn as_directory(mut self) -> Self {
        self.is_directory = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    File,
    Folder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateGroup {
    pub id: String,
    pub identity_key: String,
    pub method: DetectionMethod,
    pub kind: GroupKind,
    pub name: String,
    pub members: Vec<DuplicateItem>,
    pub total_size: u64,
    pub reclaimable_bytes: u64,
}

impl DuplicateGroup {
    pub fn kept(&self) -> Option<&DuplicateItem> {
        self.members.iter().find(|item| item.should_keep)
    }

    /// Recomputes `total_size` and `reclaimable_bytes` from the members.
    pub fn refresh_totals(&mut self) {
        self.total_size = self
            .members
            .iter()
            .map(|item| item.record.size_bytes)
            .sum();
        self.reclaimable_bytes = self
            .members
            .iter()
            .filter(|item| !item.should_keep)
            .map(|item| item.record.size_bytes)
            .sum();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateItem {
    #[serde(flatten)]
    pub record: FileRecord,
    pub is_original: bool,
    pub should_keep: bool,
}

impl DuplicateItem {
    pub fn new(record: FileRecord) -> Self {
        Self {
            record,
            is_original: false,
            should_keep: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SavingsSummary {
    pub total_size: u64,
    pub recoverable: u64,
    pub group_count: u64,
    pub reclaimable_items: u64,
    pub by_disk: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<GroupKind, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    pub condition: RuleCondition,
    pub action: RuleAction,
    #[serde(default)]
    pub scope: RuleScope,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleCondition {
    pub kind: ConditionKind,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Extension,
    Size,
    Age,
    Pattern,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    Matches,
    GreaterThan,
    LessThan,
    Between,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(u64),
    Range { min: u64, max: u64 },
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleAction {
    pub kind: ActionKind,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Move,
    Copy,
    Rename,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleScope {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    #[serde(default)]
    pub include_hidden: bool,
}

fn default_recursive() -> bool {
    true
}

impl Default for RuleScope {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            recursive: true,
            include_hidden: false,
        }
    }
}

/// Suggestion descriptor supplied by an external advisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub id: String,
    pub kind: SuggestionKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub from_paths: Vec<PathBuf>,
    #[serde(default)]
    pub to_path: Option<PathBuf>,
    #[serde(default)]
    pub affected_files: Vec<PathBuf>,
    #[serde(default)]
    pub estimated_time_secs: u64,
    pub confidence: f32,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Move,
    Group,
    Archive,
    Rename,
    Delete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Move,
    Copy,
    Rename,
    Delete,
}

impl OperationKind {
    /// Whether the operation removes its source from its current location.
    pub fn vacates_source(self) -> bool {
        match self {
            OperationKind::Move | OperationKind::Rename | OperationKind::Delete => true,
            OperationKind::Copy => false,
        }
    }

    pub fn needs_destination(self) -> bool {
        match self {
            OperationKind::Move | OperationKind::Copy | OperationKind::Rename => true,
            OperationKind::Delete => false,
        }
    }
}

impl From<ActionKind> for OperationKind {
    fn from(value: ActionKind) -> Self {
        match value {
            ActionKind::Move => OperationKind::Move,
            ActionKind::Copy => OperationKind::Copy,
            ActionKind::Rename => OperationKind::Rename,
            ActionKind::Delete => OperationKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationOrigin {
    Rule { rule_id: String },
    Suggestion { suggestion_id: String },
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationOperation {
    pub id: String,
    pub kind: OperationKind,
    pub source: PathBuf,
    #[serde(default)]
    pub destination: Option<PathBuf>,
    #[serde(default)]
    pub size_bytes: u64,
    pub origin: OperationOrigin,
    #[serde(default)]
    pub status: OperationStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl OrganizationOperation {
    pub fn new(kind: OperationKind, source: impl Into<PathBuf>, destination: Option<PathBuf>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            source: source.into(),
            destination,
            size_bytes: 0,
            origin: OperationOrigin::Manual,
            status: OperationStatus::Pending,
            error: None,
        }
    }

    pub fn move_to(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::Move, source, Some(destination.into()))
    }

    pub fn copy_to(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::Copy, source, Some(destination.into()))
    }

    pub fn rename_to(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::Rename, source, Some(destination.into()))
    }

    pub fn delete(source: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::Delete, source, None)
    }

    pub fn with_origin(mut self, origin: OperationOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn destination_path(&self) -> Option<&Path> {
        self.destination.as_deref()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Draft,
    Ready,
    Executing,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl PlanStatus {
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        match self {
            PlanStatus::Draft => matches!(next, PlanStatus::Ready),
            PlanStatus::Ready => matches!(next, PlanStatus::Executing),
            PlanStatus::Executing => matches!(
                next,
                PlanStatus::Completed
                    | PlanStatus::Failed
                    | PlanStatus::Cancelled
                    | PlanStatus::RolledBack
            ),
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled => {
                matches!(next, PlanStatus::RolledBack)
            }
            PlanStatus::RolledBack => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanMetadata {
    pub total_files: u64,
    pub total_size: u64,
    pub estimated_duration_secs: u64,
    #[serde(default)]
    pub affected_paths: Vec<PathBuf>,
    #[serde(default)]
    pub new_directories: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationPlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: PlanStatus,
    pub operations: Vec<OrganizationOperation>,
    #[serde(default)]
    pub metadata: PlanMetadata,
}

impl OrganizationPlan {
    pub fn draft(name: impl Into<String>, operations: Vec<OrganizationOperation>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            created_at: Utc::now(),
            status: PlanStatus::Draft,
            operations,
            metadata: PlanMetadata::default(),
        }
    }

    pub fn transition(&mut self, next: PlanStatus) -> Result<(), crate::error::ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::error::ExecutionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Move,
    Rename,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub description: String,
}

/// Filesystem delta of a plan. Copies count as creates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChangeSummary {
    pub creates: u64,
    pub moves: u64,
    pub renames: u64,
    pub deletes: u64,
    pub bytes_affected: u64,
    pub changes: Vec<Change>,
}

impl ChangeSummary {
    pub fn record_directory(&mut self, path: &Path) {
        self.creates += 1;
        self.changes.push(Change {
            kind: ChangeKind::Create,
            source: None,
            destination: Some(path.to_path_buf()),
            description: format!("Create directory {}", path.display()),
        });
    }

    pub fn record_operation(&mut self, operation: &OrganizationOperation) {
        let source = operation.source.display();
        let target = operation
            .destination_path()
            .map(|dest| dest.display().to_string())
            .unwrap_or_default();
        let (kind, description) = match operation.kind {
            OperationKind::Move => (ChangeKind::Move, format!("Move {source} to {target}")),
            OperationKind::Copy => (ChangeKind::Create, format!("Copy {source} to {target}")),
            OperationKind::Rename => (ChangeKind::Rename, format!("Rename {source} to {target}")),
            OperationKind::Delete => (ChangeKind::Delete, format!("Delete {source}")),
        };
        match kind {
            ChangeKind::Create => self.creates += 1,
            ChangeKind::Move => self.moves += 1,
            ChangeKind::Rename => self.renames += 1,
            ChangeKind::Delete => self.deletes += 1,
        }
        self.bytes_affected = self.bytes_affected.saturating_add(operation.size_bytes);
        self.changes.push(Change {
            kind,
            source: Some(operation.source.clone()),
            destination: operation.destination.clone(),
            description,
        });
    }

    /// Same counts, ignoring change descriptions.
    pub fn counts(&self) -> (u64, u64, u64, u64) {
        (self.creates, self.moves, self.renames, self.deletes)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExecutionProgress {
    pub current_operation: usize,
    pub total_operations: usize,
    pub current_file: Option<PathBuf>,
    pub percentage: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExecutionSummary {
    pub completed: u64,
    pub failed: u64,
    pub not_attempted: u64,
    pub rolled_back: u64,
    pub files_moved: u64,
    pub files_copied: u64,
    pub files_renamed: u64,
    pub files_deleted: u64,
    pub directories_created: u64,
    pub bytes_saved: u64,
    pub errors: Vec<String>,
}

/// Inverse of one forward step, recorded before the step runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReversalAction {
    Move { from: PathBuf, to: PathBuf },
    Remove { path: PathBuf },
    RemoveDir { path: PathBuf },
    Irreversible { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReversalEntry {
    pub seq: u64,
    pub operation_id: Option<String>,
    pub action: ReversalAction,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RollbackReport {
    pub restored: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanExecution {
    pub id: String,
    pub plan_id: String,
    pub dry_run: bool,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: ExecutionProgress,
    pub summary: ExecutionSummary,
    pub changes: ChangeSummary,
    pub operations: Vec<OrganizationOperation>,
    pub rollback_available: bool,
    pub reversal_log: Vec<ReversalEntry>,
    #[serde(default)]
    pub rollback: Option<RollbackReport>,
}
