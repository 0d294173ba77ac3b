use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use disk_tidy_core::{
    calculate_savings, detect_duplicates_with_sink, paths, scan_paths, ChangeSummary,
    DuplicateGroup, DuplicateScan, DuplicateScanOptions, EngineConfig, EngineEvent, EventSink,
    ExecuteOptions, ExecutionStatus, FileRecord, OrganizationOperation, OrganizationPlan,
    OrganizationPlanner, OrganizationRule, PlanExecution, PlanExecutor, PlanStatus, RuleEngine,
    SavingsSummary, ScanOptions, Suggestion,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default = "default_hash_contents")]
    pub hash_contents: bool,
}

fn default_hash_contents() -> bool {
    true
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            max_depth: None,
            excludes: Vec::new(),
            hash_contents: default_hash_contents(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub records: usize,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<OrganizationRule>,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    /// Operations chosen directly by the user, validated with the rest.
    #[serde(default)]
    pub operations: Vec<OrganizationOperation>,
    /// Restricts rule evaluation to records below these roots.
    #[serde(default)]
    pub scope: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub plan: OrganizationPlan,
    pub execution: Option<PlanExecution>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequencedEvent {
    pub seq: u64,
    pub name: String,
    pub event: EngineEvent,
}

#[derive(Default)]
struct EventBuffer {
    last_seq: u64,
    entries: VecDeque<SequencedEvent>,
}

/// Event sink that keeps events until the reader acknowledges them, and
/// optionally forwards each one. Sequence numbers keep increasing across
/// acknowledgements.
#[derive(Default)]
pub struct EventLog {
    buffer: Mutex<EventBuffer>,
    forward: Option<Arc<dyn EventSink>>,
}

impl EventLog {
    pub fn since(&self, from_seq: u64) -> Vec<SequencedEvent> {
        match self.buffer.lock() {
            Ok(buffer) => buffer
                .entries
                .iter()
                .filter(|entry| entry.seq > from_seq)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Drops every event up to and including `seq`. Returns how many remain.
    pub fn acknowledge(&self, seq: u64) -> usize {
        match self.buffer.lock() {
            Ok(mut buffer) => {
                while buffer.entries.front().is_some_and(|entry| entry.seq <= seq) {
                    buffer.entries.pop_front();
                }
                buffer.entries.len()
            }
            Err(_) => 0,
        }
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: &EngineEvent) {
        match self.buffer.lock() {
            Ok(mut buffer) => {
                buffer.last_seq += 1;
                let seq = buffer.last_seq;
                buffer.entries.push_back(SequencedEvent {
                    seq,
                    name: event.name().to_string(),
                    event: event.clone(),
                });
            }
            Err(_) => warn!("event log lock poisoned; dropping {}", event.name()),
        }
        if let Some(forward) = &self.forward {
            forward.emit(event);
        }
    }
}

struct PlanEntry {
    plan: OrganizationPlan,
    execution: Option<PlanExecution>,
    /// Flag of the run in progress, if any. Every run gets a fresh one.
    cancel_flag: Option<Arc<AtomicBool>>,
}

struct SessionState {
    config: EngineConfig,
    events: Arc<EventLog>,
    snapshot: Mutex<Vec<FileRecord>>,
    plans: Mutex<HashMap<String, PlanEntry>>,
}

/// Command surface for one user session. Cloning shares the same state.
#[derive(Clone)]
pub struct Session {
    state: Arc<SessionState>,
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    /// Same as [`Session::new`], also forwarding every event to `sink`.
    pub fn with_forward_sink(config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::build(config, Some(sink))
    }

    fn build(config: EngineConfig, forward: Option<Arc<dyn EventSink>>) -> Self {
        Self {
            state: Arc::new(SessionState {
                config,
                events: Arc::new(EventLog {
                    buffer: Mutex::new(EventBuffer::default()),
                    forward,
                }),
                snapshot: Mutex::new(Vec::new()),
                plans: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    /// Replaces the current snapshot. Plans already created keep theirs.
    pub fn load_snapshot(&self, records: Vec<FileRecord>) -> Result<usize> {
        let mut snapshot = lock(&self.state.snapshot, "snapshot")?;
        *snapshot = records;
        Ok(snapshot.len())
    }

    /// Loads a snapshot previously written as a JSON array of records.
    pub fn load_snapshot_file(&self, path: &Path) -> Result<usize> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let records: Vec<FileRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
        self.load_snapshot(records)
    }

    pub fn snapshot(&self) -> Result<Vec<FileRecord>> {
        Ok(lock(&self.state.snapshot, "snapshot")?.clone())
    }

    pub fn scan(&self, request: ScanRequest) -> Result<ScanSummary> {
        let output = scan_paths(&ScanOptions {
            paths: request.paths,
            max_depth: request.max_depth,
            excludes: request.excludes,
            hash_contents: request.hash_contents,
            ..ScanOptions::default()
        })
        .context("scan failed")?;
        let summary = ScanSummary {
            records: output.records.len(),
            warnings: output.warnings,
            cancelled: output.cancelled,
        };
        self.load_snapshot(output.records)?;
        Ok(summary)
    }

    /// Groups the current snapshot. `None` uses the configured detection
    /// defaults.
    pub fn detect_duplicates(&self, options: Option<DuplicateScanOptions>) -> Result<DuplicateScan> {
        let options = options.unwrap_or_else(|| self.state.config.detection.clone());
        let records = self.snapshot()?;
        let scan = detect_duplicates_with_sink(&records, &options, self.state.events.as_ref());
        if let Some(incomplete) = &scan.incomplete {
            warn!("{incomplete}");
        }
        Ok(scan)
    }

    pub fn calculate_savings(&self, groups: &[DuplicateGroup]) -> SavingsSummary {
        calculate_savings(groups)
    }

    pub fn create_plan(&self, request: PlanRequest) -> Result<OrganizationPlan> {
        let records = self.snapshot()?;
        let scoped = if request.scope.is_empty() {
            records.clone()
        } else {
            records
                .iter()
                .filter(|record| {
                    request
                        .scope
                        .iter()
                        .any(|root| paths::is_same_or_ancestor(root, &record.path))
                })
                .cloned()
                .collect()
        };

        let engine = RuleEngine::new(&request.rules).context("invalid organization rules")?;
        let mut candidates = request.operations;
        candidates.extend(engine.evaluate(&scoped, Utc::now()));
        let planner = OrganizationPlanner::new(self.state.config.planner.clone());
        let mut plan = planner
            .plan(&request.name, candidates, &request.suggestions, &records)
            .with_context(|| format!("plan '{}' failed validation", request.name))?;
        plan.description = request.description;

        info!(
            "created plan {} ({} operation(s))",
            plan.id,
            plan.operations.len()
        );
        self.register(plan.clone())?;
        Ok(plan)
    }

    /// Registers a plan built elsewhere, e.g. read back from a JSON file.
    /// It is validated again against the current snapshot and the directories
    /// on disk, so only `Draft` and `Ready` plans are accepted.
    pub fn import_plan(&self, plan: OrganizationPlan) -> Result<OrganizationPlan> {
        if !matches!(plan.status, PlanStatus::Draft | PlanStatus::Ready) {
            bail!("plan {} is {:?} and cannot be imported", plan.id, plan.status);
        }
        let mut draft = plan;
        draft.status = PlanStatus::Draft;
        let records = self.snapshot()?;
        let planner = OrganizationPlanner::new(self.state.config.planner.clone());
        let ready = planner
            .prepare(&draft, &records)
            .with_context(|| format!("imported plan {} failed validation", draft.id))?;
        self.register(ready.clone())?;
        Ok(ready)
    }

    fn register(&self, plan: OrganizationPlan) -> Result<()> {
        let mut plans = lock(&self.state.plans, "plan registry")?;
        if plans.contains_key(&plan.id) {
            bail!("plan {} is already registered", plan.id);
        }
        plans.insert(
            plan.id.clone(),
            PlanEntry {
                plan,
                execution: None,
                cancel_flag: None,
            },
        );
        Ok(())
    }

    pub fn preview_plan(&self, plan_id: &str) -> Result<ChangeSummary> {
        let plans = lock(&self.state.plans, "plan registry")?;
        let entry = find(&plans, plan_id)?;
        Ok(disk_tidy_core::preview_plan(&entry.plan)?)
    }

    /// Runs a plan to completion on the calling thread. A plan runs for real
    /// at most once; dry runs leave it `Ready`.
    pub fn execute_plan(&self, plan_id: &str, options: ExecuteOptions) -> Result<PlanExecution> {
        let (plan, cancel_flag) = self.begin_run(plan_id, &options)?;
        self.finish_run(plan_id, &plan, cancel_flag, options)
    }

    /// Starts a run on a worker thread; progress arrives through
    /// [`Session::poll_events`]. The run can be cancelled as soon as this
    /// returns.
    pub fn start_execution(&self, plan_id: &str, options: ExecuteOptions) -> Result<()> {
        let (plan, cancel_flag) = self.begin_run(plan_id, &options)?;
        let session = self.clone();
        let plan_id = plan_id.to_string();
        thread::spawn(move || {
            if let Err(err) = session.finish_run(&plan_id, &plan, cancel_flag, options) {
                warn!("background execution of plan {plan_id} failed: {err:#}");
            }
        });
        Ok(())
    }

    fn begin_run(
        &self,
        plan_id: &str,
        options: &ExecuteOptions,
    ) -> Result<(OrganizationPlan, Arc<AtomicBool>)> {
        let mut plans = lock(&self.state.plans, "plan registry")?;
        let entry = find_mut(&mut plans, plan_id)?;
        if entry.cancel_flag.is_some() {
            bail!("plan {plan_id} is already running");
        }
        if entry.plan.status != PlanStatus::Ready {
            bail!("plan {plan_id} is {:?} and cannot be executed", entry.plan.status);
        }
        let ready = entry.plan.clone();
        if !options.dry_run {
            entry.plan.transition(PlanStatus::Executing)?;
        }
        let cancel_flag = Arc::new(AtomicBool::new(false));
        entry.cancel_flag = Some(Arc::clone(&cancel_flag));
        Ok((ready, cancel_flag))
    }

    fn finish_run(
        &self,
        plan_id: &str,
        plan: &OrganizationPlan,
        cancel_flag: Arc<AtomicBool>,
        options: ExecuteOptions,
    ) -> Result<PlanExecution> {
        let executor = self.executor().with_cancel_flag(cancel_flag);
        let outcome = executor.execute(plan, &options);

        let mut plans = lock(&self.state.plans, "plan registry")?;
        let entry = find_mut(&mut plans, plan_id)?;
        entry.cancel_flag = None;
        let execution = match outcome {
            Ok(execution) => execution,
            Err(err) => {
                if !options.dry_run {
                    entry.plan.status = PlanStatus::Ready;
                }
                return Err(err).with_context(|| format!("plan {plan_id} could not start"));
            }
        };
        if options.dry_run {
            return Ok(execution);
        }

        let next = match execution.status {
            ExecutionStatus::Completed => PlanStatus::Completed,
            ExecutionStatus::Failed => PlanStatus::Failed,
            ExecutionStatus::Cancelled => PlanStatus::Cancelled,
            ExecutionStatus::RolledBack => PlanStatus::RolledBack,
            ExecutionStatus::Running => PlanStatus::Failed,
        };
        entry.plan.transition(next)?;
        entry.execution = Some(execution.clone());
        Ok(execution)
    }

    /// Asks the run in progress to stop before its next operation. Without a
    /// run in progress this does nothing; the next run starts uncancelled.
    pub fn cancel_plan(&self, plan_id: &str) -> Result<PlanStatus> {
        let plans = lock(&self.state.plans, "plan registry")?;
        let entry = find(&plans, plan_id)?;
        match &entry.cancel_flag {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                info!("cancellation requested for plan {plan_id}");
            }
            None => debug!("plan {plan_id} has no run in progress"),
        }
        Ok(entry.plan.status)
    }

    /// Undoes the plan's execution. `Ok(false)` when nothing can be rolled
    /// back or some steps could not be restored.
    pub fn rollback_plan(&self, plan_id: &str) -> Result<bool> {
        let executor = self.executor();
        let mut plans = lock(&self.state.plans, "plan registry")?;
        let entry = find_mut(&mut plans, plan_id)?;
        let Some(execution) = entry.execution.as_mut() else {
            return Ok(false);
        };
        if !execution.rollback_available {
            return Ok(false);
        }

        let report = executor
            .rollback(execution)
            .with_context(|| format!("rollback of plan {plan_id} failed"))?;
        if report.failed > 0 {
            warn!(
                "rollback of plan {plan_id} left {} step(s) unrestored",
                report.failed
            );
            return Ok(false);
        }
        entry.plan.transition(PlanStatus::RolledBack)?;
        Ok(true)
    }

    pub fn get_plan(&self, plan_id: &str) -> Result<PlanSnapshot> {
        let plans = lock(&self.state.plans, "plan registry")?;
        let entry = find(&plans, plan_id)?;
        Ok(PlanSnapshot {
            plan: entry.plan.clone(),
            execution: entry.execution.clone(),
        })
    }

    pub fn poll_events(&self, from_seq: u64) -> Vec<SequencedEvent> {
        self.state.events.since(from_seq)
    }

    /// Releases events the reader has consumed, up to and including `seq`.
    pub fn acknowledge_events(&self, seq: u64) -> usize {
        self.state.events.acknowledge(seq)
    }

    fn executor(&self) -> PlanExecutor {
        let sink: Arc<dyn EventSink> = self.state.events.clone();
        PlanExecutor::new(self.state.config.executor.clone(), sink)
    }
}

fn find<'a>(plans: &'a HashMap<String, PlanEntry>, plan_id: &str) -> Result<&'a PlanEntry> {
    plans
        .get(plan_id)
        .ok_or_else(|| anyhow!("plan not found: {plan_id}"))
}

fn find_mut<'a>(
    plans: &'a mut HashMap<String, PlanEntry>,
    plan_id: &str,
) -> Result<&'a mut PlanEntry> {
    plans
        .get_mut(plan_id)
        .ok_or_else(|| anyhow!("plan not found: {plan_id}"))
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow!("{what} lock poisoned"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use disk_tidy_core::model::{
        ActionKind, ConditionKind, ConditionOperator, ConditionValue, RuleAction, RuleCondition,
        RuleScope, SuggestionKind,
    };
    use disk_tidy_core::{
        DuplicateScanOptions, EngineConfig, EngineEvent, EventSink, ExecuteOptions,
        ExecutionStatus, ExecutorConfig, OrganizationRule, PlanStatus, Suggestion,
    };
    use tempfile::{tempdir, TempDir};

    use super::{PlanRequest, ScanRequest, Session};

    fn session(backup: &TempDir) -> Session {
        Session::new(EngineConfig {
            executor: ExecutorConfig {
                backup_dir: backup.path().to_path_buf(),
            },
            ..EngineConfig::default()
        })
    }

    fn txt_rule(destination: PathBuf, scope: PathBuf) -> OrganizationRule {
        OrganizationRule {
            id: "txt".to_string(),
            name: "Text files".to_string(),
            enabled: true,
            priority: 0,
            condition: RuleCondition {
                kind: ConditionKind::Extension,
                operator: ConditionOperator::Equals,
                value: ConditionValue::Text("txt".to_string()),
                case_sensitive: false,
            },
            action: RuleAction {
                kind: ActionKind::Move,
                destination: Some(destination.to_string_lossy().to_string()),
                pattern: None,
            },
            scope: RuleScope {
                paths: vec![scope],
                ..RuleScope::default()
            },
        }
    }

    #[test]
    fn scan_detect_and_poll_events() {
        let dir = tempdir().expect("tempdir");
        let backup = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.bin"), b"same bytes").expect("write");
        fs::write(dir.path().join("b.bin"), b"same bytes").expect("write");
        fs::write(dir.path().join("c.bin"), b"different").expect("write");

        let session = session(&backup);
        let summary = session
            .scan(ScanRequest {
                paths: vec![dir.path().to_path_buf()],
                ..ScanRequest::default()
            })
            .expect("scan");
        assert_eq!(summary.records, 3);

        let scan = session
            .detect_duplicates(Some(DuplicateScanOptions {
                include_hidden: true,
                ..DuplicateScanOptions::default()
            }))
            .expect("detect");
        assert_eq!(scan.groups.len(), 1);
        assert_eq!(session.calculate_savings(&scan.groups).recoverable, 10);

        let events = session.poll_events(0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[0].name, "duplicate-found");
        assert!(session.poll_events(1).is_empty());
    }

    #[test]
    fn plan_lifecycle_runs_once_and_rolls_back() {
        let dir = tempdir().expect("tempdir");
        let backup = tempdir().expect("tempdir");
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).expect("mkdir");
        fs::write(inbox.join("note.txt"), b"note").expect("write");
        fs::write(inbox.join("photo.jpg"), b"jpg").expect("write");

        let session = session(&backup);
        session
            .scan(ScanRequest {
                paths: vec![dir.path().to_path_buf()],
                ..ScanRequest::default()
            })
            .expect("scan");

        let plan = session
            .create_plan(PlanRequest {
                name: "tidy".to_string(),
                description: "move notes".to_string(),
                rules: vec![txt_rule(dir.path().join("notes"), inbox.clone())],
                ..PlanRequest::default()
            })
            .expect("plan");
        assert_eq!(plan.status, PlanStatus::Ready);
        assert_eq!(plan.operations.len(), 1);

        let preview = session.preview_plan(&plan.id).expect("preview");
        assert_eq!(preview.counts(), (1, 1, 0, 0));

        let dry = session
            .execute_plan(
                &plan.id,
                ExecuteOptions {
                    dry_run: true,
                    create_backup: false,
                },
            )
            .expect("dry run");
        assert_eq!(dry.changes.counts(), preview.counts());
        assert_eq!(
            session.get_plan(&plan.id).expect("plan").plan.status,
            PlanStatus::Ready
        );

        let execution = session
            .execute_plan(&plan.id, ExecuteOptions::default())
            .expect("execute");
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(dir.path().join("notes/note.txt").exists());
        assert!(session
            .execute_plan(&plan.id, ExecuteOptions::default())
            .is_err());

        let events = session.poll_events(0);
        assert!(events
            .iter()
            .any(|entry| matches!(entry.event, EngineEvent::PlanExecutionComplete(_))));

        assert!(session.rollback_plan(&plan.id).expect("rollback"));
        assert!(inbox.join("note.txt").exists());
        assert!(!dir.path().join("notes").exists());
        let snapshot = session.get_plan(&plan.id).expect("plan");
        assert_eq!(snapshot.plan.status, PlanStatus::RolledBack);
        assert!(!session.rollback_plan(&plan.id).expect("second rollback"));
    }

    /// Cancels the first run that reports progress, then stays quiet.
    #[derive(Default)]
    struct CancelFirstRun {
        session: Mutex<Option<Session>>,
        fired: AtomicBool,
    }

    impl EventSink for CancelFirstRun {
        fn emit(&self, event: &EngineEvent) {
            let EngineEvent::PlanProgress(progress) = event else {
                return;
            };
            if self.fired.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(session) = self.session.lock().expect("sink lock").as_ref() {
                session.cancel_plan(&progress.plan_id).expect("cancel");
            }
        }
    }

    fn scan_into(session: &Session, root: &Path) {
        session
            .scan(ScanRequest {
                paths: vec![root.to_path_buf()],
                ..ScanRequest::default()
            })
            .expect("scan");
    }

    #[test]
    fn cancelled_dry_run_leaves_the_real_run_alone() {
        let dir = tempdir().expect("tempdir");
        let backup = tempdir().expect("tempdir");
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).expect("mkdir");
        fs::write(inbox.join("a.txt"), b"a").expect("write");
        fs::write(inbox.join("b.txt"), b"b").expect("write");

        let canceller = Arc::new(CancelFirstRun::default());
        let session = Session::with_forward_sink(
            EngineConfig {
                executor: ExecutorConfig {
                    backup_dir: backup.path().to_path_buf(),
                },
                ..EngineConfig::default()
            },
            canceller.clone(),
        );
        *canceller.session.lock().expect("sink lock") = Some(session.clone());
        scan_into(&session, dir.path());
        let plan = session
            .create_plan(PlanRequest {
                name: "notes".to_string(),
                rules: vec![txt_rule(dir.path().join("notes"), inbox.clone())],
                ..PlanRequest::default()
            })
            .expect("plan");
        assert_eq!(plan.operations.len(), 2);

        let dry = session
            .execute_plan(
                &plan.id,
                ExecuteOptions {
                    dry_run: true,
                    create_backup: false,
                },
            )
            .expect("dry run");
        assert_eq!(dry.status, ExecutionStatus::Cancelled);
        assert_eq!(dry.summary.not_attempted, 1);
        assert_eq!(
            session.get_plan(&plan.id).expect("plan").plan.status,
            PlanStatus::Ready
        );

        let real = session
            .execute_plan(&plan.id, ExecuteOptions::default())
            .expect("real run");
        assert_eq!(real.status, ExecutionStatus::Completed);
        assert_eq!(
            session.get_plan(&plan.id).expect("plan").plan.status,
            PlanStatus::Completed
        );
        assert!(dir.path().join("notes/a.txt").exists());
        assert!(dir.path().join("notes/b.txt").exists());
    }

    #[test]
    fn cancel_without_a_run_does_not_stop_the_next_one() {
        let dir = tempdir().expect("tempdir");
        let backup = tempdir().expect("tempdir");
        fs::write(dir.path().join("x.txt"), b"x").expect("write");
        let session = session(&backup);
        scan_into(&session, dir.path());
        let plan = session
            .create_plan(PlanRequest {
                name: "background".to_string(),
                rules: vec![txt_rule(dir.path().join("out"), dir.path().to_path_buf())],
                ..PlanRequest::default()
            })
            .expect("plan");

        assert_eq!(session.cancel_plan(&plan.id).expect("cancel"), PlanStatus::Ready);
        session
            .start_execution(&plan.id, ExecuteOptions::default())
            .expect("start");
        assert!(session
            .start_execution(&plan.id, ExecuteOptions::default())
            .is_err());

        let started = Instant::now();
        let snapshot = loop {
            let snapshot = session.get_plan(&plan.id).expect("plan");
            if snapshot.execution.is_some() {
                break snapshot;
            }
            assert!(started.elapsed() < Duration::from_secs(30));
            std::thread::sleep(Duration::from_millis(25));
        };
        assert_eq!(snapshot.plan.status, PlanStatus::Completed);
        assert!(dir.path().join("out/x.txt").exists());
    }

    #[test]
    fn imported_plan_previews_what_execution_does() {
        let dir = tempdir().expect("tempdir");
        let backup = tempdir().expect("tempdir");
        let inbox = dir.path().join("inbox");
        let documents = dir.path().join("documents");
        fs::create_dir_all(&inbox).expect("mkdir");
        fs::create_dir_all(&documents).expect("mkdir");
        fs::write(inbox.join("letter.txt"), b"dear").expect("write");

        let planning = session(&backup);
        scan_into(&planning, dir.path());
        let plan = planning
            .create_plan(PlanRequest {
                name: "file letters".to_string(),
                rules: vec![txt_rule(documents.clone(), inbox.clone())],
                ..PlanRequest::default()
            })
            .expect("plan");
        assert!(plan.metadata.new_directories.is_empty());
        assert_eq!(
            planning.preview_plan(&plan.id).expect("preview").counts(),
            (0, 1, 0, 0)
        );

        let saved = serde_json::to_string(&plan).expect("json");
        let applying = session(&backup);
        let imported = applying
            .import_plan(serde_json::from_str(&saved).expect("plan json"))
            .expect("import");
        let preview = applying.preview_plan(&imported.id).expect("preview");
        assert_eq!(preview.counts(), (0, 1, 0, 0));

        let execution = applying
            .execute_plan(&imported.id, ExecuteOptions::default())
            .expect("execute");
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.changes.counts(), preview.counts());
        assert!(documents.join("letter.txt").exists());
    }

    #[test]
    fn acknowledged_events_are_released() {
        let backup = tempdir().expect("tempdir");
        let session = session(&backup);
        session
            .load_snapshot(vec![
                disk_tidy_core::FileRecord::new("/data/a.txt", 4).with_hash("h1"),
                disk_tidy_core::FileRecord::new("/data/b.txt", 4).with_hash("h1"),
                disk_tidy_core::FileRecord::new("/data/c.bin", 9).with_hash("h2"),
                disk_tidy_core::FileRecord::new("/data/d.bin", 9).with_hash("h2"),
            ])
            .expect("snapshot");

        session.detect_duplicates(None).expect("detect");
        assert_eq!(session.poll_events(0).len(), 2);
        assert_eq!(session.acknowledge_events(1), 1);
        let remaining = session.poll_events(0);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].seq, 2);

        session.detect_duplicates(None).expect("detect again");
        let seqs = session
            .poll_events(0)
            .iter()
            .map(|entry| entry.seq)
            .collect::<Vec<_>>();
        assert_eq!(seqs, vec![2, 3, 4]);
        assert_eq!(session.acknowledge_events(4), 0);
        assert!(session.poll_events(0).is_empty());
    }

    #[test]
    fn snapshot_file_round_trips_through_json() {
        let dir = tempdir().expect("tempdir");
        let backup = tempdir().expect("tempdir");
        let records = vec![
            disk_tidy_core::FileRecord::new("/data/a.txt", 10).with_hash("h1"),
            disk_tidy_core::FileRecord::new("/data/b.txt", 10).with_hash("h1"),
        ];
        let path = dir.path().join("snapshot.json");
        fs::write(&path, serde_json::to_string(&records).expect("json")).expect("write");

        let session = session(&backup);
        assert_eq!(session.load_snapshot_file(&path).expect("load"), 2);
        assert_eq!(session.snapshot().expect("snapshot"), records);
        assert!(session
            .load_snapshot_file(&dir.path().join("missing.json"))
            .is_err());
    }

    #[test]
    fn invalid_plans_are_not_stored() {
        let backup = tempdir().expect("tempdir");
        let session = session(&backup);
        let conflicting = |id: &str, kind: SuggestionKind, to: Option<PathBuf>| Suggestion {
            id: id.to_string(),
            kind,
            title: id.to_string(),
            description: String::new(),
            from_paths: Vec::new(),
            to_path: to,
            affected_files: vec![PathBuf::from("/data/report.pdf")],
            estimated_time_secs: 5,
            confidence: 0.9,
            reason: String::new(),
        };
        let err = session
            .create_plan(PlanRequest {
                name: "conflict".to_string(),
                suggestions: vec![
                    conflicting("move", SuggestionKind::Move, Some(PathBuf::from("/archive"))),
                    conflicting("delete", SuggestionKind::Delete, None),
                ],
                ..PlanRequest::default()
            })
            .expect_err("duplicate source");
        assert!(format!("{err:#}").contains("more than one operation"));

        let imported = session
            .import_plan(disk_tidy_core::OrganizationPlan::draft(
                "manual",
                vec![disk_tidy_core::OrganizationOperation::delete("/data/old.log")],
            ))
            .expect("import");
        assert_eq!(imported.status, PlanStatus::Ready);
        assert!(session.import_plan(imported.clone()).is_err());
        assert_eq!(
            session.preview_plan(&imported.id).expect("preview").counts(),
            (0, 0, 0, 1)
        );

        let missing = session.preview_plan("nope").expect_err("missing plan");
        assert!(missing.to_string().contains("plan not found"));
    }
}
