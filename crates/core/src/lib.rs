pub mod config;
pub mod dedupe;
pub mod error;
pub mod events;
pub mod execute;
pub mod matcher;
pub mod model;
pub mod paths;
pub mod planner;
pub mod preview;
pub mod rules;
pub mod savings;
pub mod scan;
pub mod select;

pub use config::{CollisionPolicy, EngineConfig, ExecutorConfig, PlannerConfig};
pub use dedupe::{
    detect_duplicates, detect_duplicates_with_sink, group_by_key, DetectionMethod,
    DuplicateScan, DuplicateScanOptions, GroupingMethod,
};
pub use error::{ExecutionError, ScanIncomplete, ValidationError};
pub use events::{EngineEvent, EventSink, MemorySink, NullSink, TracingSink};
pub use execute::{ExecuteOptions, PlanExecutor};
pub use matcher::PathMatcher;
pub use model::{
    ChangeSummary, DuplicateGroup, DuplicateItem, ExecutionStatus, ExecutionSummary, FileRecord,
    GroupKind, OperationKind, OperationStatus, OrganizationOperation, OrganizationPlan,
    OrganizationRule, PlanExecution, PlanStatus, RollbackReport, SavingsSummary, Suggestion,
};
pub use planner::OrganizationPlanner;
pub use preview::preview_plan;
pub use rules::RuleEngine;
pub use savings::calculate_savings;
pub use scan::{hash_file, scan_paths, scan_with_callback, ScanOptions, ScanOutput};
pub use select::{apply_selection, select_original, set_kept, SelectionReason};
