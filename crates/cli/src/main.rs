use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand, ValueEnum};
use disk_tidy_core::{
    DetectionMethod, DuplicateGroup, DuplicateScanOptions, EngineConfig, ExecuteOptions,
    GroupingMethod, OrganizationOperation, OrganizationPlan, OrganizationRule, PlanExecution,
    PlanExecutor, Suggestion, TracingSink,
};
use disk_tidy_service::{PlanRequest, ScanRequest, Session};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "disk-tidy",
    version,
    about = "Find duplicate files, plan reorganizations, and apply them with rollback."
)]
struct Cli {
    /// Engine configuration JSON. Missing file means defaults.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Walk paths and write a file snapshot.
    Scan(ScanArgs),
    /// Group duplicate files in a snapshot and report reclaimable space.
    Duplicates(DuplicatesArgs),
    /// Build a validated plan from rules, suggestions, or duplicate groups.
    Plan(PlanArgs),
    /// Show what a plan would change without touching the filesystem.
    Preview(PreviewArgs),
    /// Execute a plan, or simulate it with --dry-run.
    Apply(ApplyArgs),
    /// Undo an execution recorded by `apply`.
    Rollback(RollbackArgs),
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliDetectionMethod {
    Hash,
    Name,
    Size,
    #[value(name = "name-and-size", alias = "name_and_size")]
    NameAndSize,
}

impl From<CliDetectionMethod> for DetectionMethod {
    fn from(value: CliDetectionMethod) -> Self {
        match value {
            CliDetectionMethod::Hash => DetectionMethod::Hash,
            CliDetectionMethod::Name => DetectionMethod::Name,
            CliDetectionMethod::Size => DetectionMethod::Size,
            CliDetectionMethod::NameAndSize => DetectionMethod::NameAndSize,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliGroupingMethod {
    Hash,
    Name,
    Type,
    Location,
}

impl From<CliGroupingMethod> for GroupingMethod {
    fn from(value: CliGroupingMethod) -> Self {
        match value {
            CliGroupingMethod::Hash => GroupingMethod::Hash,
            CliGroupingMethod::Name => GroupingMethod::Name,
            CliGroupingMethod::Type => GroupingMethod::Type,
            CliGroupingMethod::Location => GroupingMethod::Location,
        }
    }
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// One or more root paths to scan.
    #[arg(long = "paths", value_name = "PATH", num_args = 1.., action = ArgAction::Append, required = true)]
    paths: Vec<PathBuf>,

    /// Output snapshot path.
    #[arg(long, default_value = "disk-tidy-snapshot.json", value_name = "FILE")]
    output: PathBuf,

    /// Maximum traversal depth (root is depth 0).
    #[arg(long)]
    max_depth: Option<usize>,

    /// Exclude glob patterns (repeatable).
    #[arg(long = "exclude", value_name = "GLOB", num_args = 1.., action = ArgAction::Append)]
    exclude: Vec<String>,

    /// Skip content hashing; hash-based detection will defer every file.
    #[arg(long)]
    no_hash: bool,
}

#[derive(Debug, Args)]
struct DuplicatesArgs {
    /// Snapshot written by `scan`.
    #[arg(long, default_value = "disk-tidy-snapshot.json", value_name = "FILE")]
    snapshot: PathBuf,

    /// Identity used to group files. Defaults to the configured method.
    #[arg(long)]
    method: Option<CliDetectionMethod>,

    /// Ordering of the reported groups.
    #[arg(long)]
    group_by: Option<CliGroupingMethod>,

    /// Ignore files smaller than this.
    #[arg(long, value_name = "BYTES")]
    min_size: Option<u64>,

    /// Consider files inside dot-directories.
    #[arg(long)]
    include_hidden: bool,

    /// Optional JSON output for the groups.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// Snapshot written by `scan`.
    #[arg(long, default_value = "disk-tidy-snapshot.json", value_name = "FILE")]
    snapshot: PathBuf,

    /// Plan name.
    #[arg(long, default_value = "disk-tidy plan")]
    name: String,

    /// JSON array of organization rules.
    #[arg(long, value_name = "FILE")]
    rules: Option<PathBuf>,

    /// JSON array of accepted suggestions.
    #[arg(long, value_name = "FILE")]
    suggestions: Option<PathBuf>,

    /// Groups written by `duplicates`; every non-kept member is deleted.
    #[arg(long, value_name = "FILE")]
    reclaim: Option<PathBuf>,

    /// Only evaluate rules below these roots (repeatable).
    #[arg(long = "scope", value_name = "PATH", num_args = 1.., action = ArgAction::Append)]
    scope: Vec<PathBuf>,

    /// Output plan path.
    #[arg(long, default_value = "disk-tidy-plan.json", value_name = "FILE")]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    /// Plan written by `plan`.
    #[arg(long, default_value = "disk-tidy-plan.json", value_name = "FILE")]
    plan: PathBuf,
}

#[derive(Debug, Args)]
struct ApplyArgs {
    /// Plan written by `plan`.
    #[arg(long, default_value = "disk-tidy-plan.json", value_name = "FILE")]
    plan: PathBuf,

    /// Simulate without touching the filesystem.
    #[arg(long)]
    dry_run: bool,

    /// Stage deleted files in the backup directory so they can be restored.
    #[arg(long)]
    backup: bool,

    /// Output execution record, needed for `rollback`.
    #[arg(long, default_value = "disk-tidy-execution.json", value_name = "FILE")]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct RollbackArgs {
    /// Execution record written by `apply`.
    #[arg(long, default_value = "disk-tidy-execution.json", value_name = "FILE")]
    execution: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Scan(args) => run_scan_command(config, args),
        Commands::Duplicates(args) => run_duplicates_command(config, args),
        Commands::Plan(args) => run_plan_command(config, args),
        Commands::Preview(args) => run_preview_command(config, args),
        Commands::Apply(args) => run_apply_command(config, args),
        Commands::Rollback(args) => run_rollback_command(config, args),
    }
}

fn run_scan_command(config: EngineConfig, args: ScanArgs) -> Result<()> {
    let session = Session::new(config);
    let summary = session.scan(ScanRequest {
        paths: args.paths,
        max_depth: args.max_depth,
        excludes: args.exclude,
        hash_contents: !args.no_hash,
    })?;
    write_json(&args.output, &session.snapshot()?, "snapshot")?;

    println!("Snapshot written to {}", args.output.display());
    println!(
        "Recorded {} file(s), {} warning(s).",
        summary.records,
        summary.warnings.len()
    );
    for warning in &summary.warnings {
        println!("Warning: {warning}");
    }
    if summary.cancelled {
        println!("Scan was cancelled; the snapshot is partial.");
    }
    Ok(())
}

fn run_duplicates_command(config: EngineConfig, args: DuplicatesArgs) -> Result<()> {
    let mut options: DuplicateScanOptions = config.detection.clone();
    if let Some(method) = args.method {
        options.method = method.into();
    }
    if let Some(group_by) = args.group_by {
        options.group_by = group_by.into();
    }
    if args.min_size.is_some() {
        options.min_size = args.min_size;
    }
    options.include_hidden |= args.include_hidden;

    let session = Session::new(config);
    session.load_snapshot_file(&args.snapshot)?;
    let scan = session.detect_duplicates(Some(options))?;
    let savings = session.calculate_savings(&scan.groups);

    if scan.groups.is_empty() {
        println!("No duplicates found in {}", args.snapshot.display());
    } else {
        println!("Found {} duplicate group(s):", scan.groups.len());
        for group in &scan.groups {
            let kept = group
                .kept()
                .map(|item| item.record.path.display().to_string())
                .unwrap_or_default();
            println!(
                "- {} | {} member(s) | reclaim {} | keep {}",
                group.name,
                group.members.len(),
                human_bytes(group.reclaimable_bytes),
                kept
            );
        }
    }
    println!(
        "Reclaimable: {} of {} across {} item(s).",
        human_bytes(savings.recoverable),
        human_bytes(savings.total_size),
        savings.reclaimable_items
    );
    for (disk, bytes) in &savings.by_disk {
        println!("  {disk}: {}", human_bytes(*bytes));
    }
    if let Some(incomplete) = &scan.incomplete {
        println!("Note: {incomplete}");
    }
    for warning in &scan.warnings {
        println!("Warning: {warning}");
    }

    if let Some(output) = args.output {
        write_json(&output, &scan.groups, "duplicate groups")?;
        println!("Groups written to {}", output.display());
    }
    Ok(())
}

fn run_plan_command(config: EngineConfig, args: PlanArgs) -> Result<()> {
    let rules: Vec<OrganizationRule> = match &args.rules {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let suggestions: Vec<Suggestion> = match &args.suggestions {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let operations = match &args.reclaim {
        Some(path) => reclaim_operations(&read_json::<Vec<DuplicateGroup>>(path)?),
        None => Vec::new(),
    };
    if rules.is_empty() && suggestions.is_empty() && operations.is_empty() {
        bail!("nothing to plan: pass --rules, --suggestions or --reclaim");
    }

    let session = Session::new(config);
    session.load_snapshot_file(&args.snapshot)?;
    let plan = session.create_plan(PlanRequest {
        name: args.name,
        description: String::new(),
        rules,
        suggestions,
        operations,
        scope: args.scope,
    })?;
    write_json(&args.output, &plan, "plan")?;

    println!("Plan {} written to {}", plan.id, args.output.display());
    println!(
        "{} operation(s), {} affected, ~{}s, {} new director{}.",
        plan.operations.len(),
        human_bytes(plan.metadata.total_size),
        plan.metadata.estimated_duration_secs,
        plan.metadata.new_directories.len(),
        if plan.metadata.new_directories.len() == 1 { "y" } else { "ies" }
    );
    Ok(())
}

fn run_preview_command(config: EngineConfig, args: PreviewArgs) -> Result<()> {
    let session = Session::new(config);
    let plan = session.import_plan(read_json::<OrganizationPlan>(&args.plan)?)?;
    let summary = session.preview_plan(&plan.id)?;
    let (creates, moves, renames, deletes) = summary.counts();

    println!("Plan {} ({}):", plan.name, plan.id);
    println!(
        "creates {creates}, moves {moves}, renames {renames}, deletes {deletes}, bytes {}",
        human_bytes(summary.bytes_affected)
    );
    for change in &summary.changes {
        println!("- [{:?}] {}", change.kind, change.description);
    }
    Ok(())
}

fn run_apply_command(config: EngineConfig, args: ApplyArgs) -> Result<()> {
    let session = Session::with_forward_sink(config, Arc::new(TracingSink));
    let plan = session.import_plan(read_json::<OrganizationPlan>(&args.plan)?)?;
    let execution = session.execute_plan(
        &plan.id,
        ExecuteOptions {
            dry_run: args.dry_run,
            create_backup: args.backup,
        },
    )?;
    print_execution(&execution);
    write_json(&args.output, &execution, "execution")?;
    println!("Execution record written to {}", args.output.display());
    if execution.rollback_available {
        println!("Undo with: disk-tidy rollback --execution {}", args.output.display());
    }
    Ok(())
}

fn run_rollback_command(config: EngineConfig, args: RollbackArgs) -> Result<()> {
    let mut execution: PlanExecution = read_json(&args.execution)?;
    let executor = PlanExecutor::new(config.executor, Arc::new(TracingSink));
    let report = executor
        .rollback(&mut execution)
        .with_context(|| format!("failed to roll back {}", args.execution.display()))?;
    write_json(&args.execution, &execution, "execution")?;

    println!(
        "Rollback restored {} step(s), {} failed.",
        report.restored, report.failed
    );
    for error in &report.errors {
        println!("Error: {error}");
    }
    if report.failed > 0 {
        bail!("rollback incomplete; see {}", args.execution.display());
    }
    Ok(())
}

fn reclaim_operations(groups: &[DuplicateGroup]) -> Vec<OrganizationOperation> {
    groups
        .iter()
        .flat_map(|group| group.members.iter())
        .filter(|item| !item.should_keep)
        .map(|item| {
            OrganizationOperation::delete(item.record.path.clone())
                .with_size(item.record.size_bytes)
        })
        .collect()
}

fn print_execution(execution: &PlanExecution) {
    let summary = &execution.summary;
    println!(
        "Execution {} {:?}{}: {} completed, {} failed, {} not attempted.",
        execution.id,
        execution.status,
        if execution.dry_run { " (dry run)" } else { "" },
        summary.completed,
        summary.failed,
        summary.not_attempted
    );
    println!(
        "moved {}, copied {}, renamed {}, deleted {}, directories {}, saved {}",
        summary.files_moved,
        summary.files_copied,
        summary.files_renamed,
        summary.files_deleted,
        summary.directories_created,
        human_bytes(summary.bytes_saved)
    );
    for error in &summary.errors {
        println!("Error: {error}");
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, what: &str) -> Result<()> {
    let payload =
        serde_json::to_string_pretty(value).with_context(|| format!("failed to serialize {what}"))?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write {what} to {}", path.display()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0 B".to_string();
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use disk_tidy_core::{
        DetectionMethod, DuplicateGroup, DuplicateItem, FileRecord, GroupKind, OperationKind,
    };

    use super::{human_bytes, reclaim_operations};

    #[test]
    fn human_bytes_uses_binary_steps() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1536), "1.5 KB");
    }

    #[test]
    fn reclaim_deletes_only_non_kept_members() {
        let mut kept = DuplicateItem::new(FileRecord::new("/data/a.txt", 5));
        kept.is_original = true;
        kept.should_keep = true;
        let copy = DuplicateItem::new(FileRecord::new("/data/copy/a.txt", 5));
        let group = DuplicateGroup {
            id: "dup-test".to_string(),
            identity_key: "h".to_string(),
            method: DetectionMethod::Hash,
            kind: GroupKind::File,
            name: "a.txt".to_string(),
            members: vec![kept, copy],
            total_size: 10,
            reclaimable_bytes: 5,
        };

        let operations = reclaim_operations(&[group]);
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].kind, OperationKind::Delete);
        assert_eq!(operations[0].source.to_string_lossy(), "/data/copy/a.txt");
        assert_eq!(operations[0].size_bytes, 5);
    }
}
