use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{CollisionPolicy, PlannerConfig};
use crate::error::ValidationError;
use crate::model::{
    FileRecord, OperationKind, OperationOrigin, OperationStatus, OrganizationOperation,
    OrganizationPlan, PlanMetadata, PlanStatus, Suggestion, SuggestionKind,
};
use crate::paths;

/// Turns candidate operations into validated, ordered plans.
#[derive(Debug, Clone, Default)]
pub struct OrganizationPlanner {
    config: PlannerConfig,
}

impl OrganizationPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Draft plan holding rule candidates followed by suggestion operations.
    pub fn draft(
        &self,
        name: &str,
        candidates: Vec<OrganizationOperation>,
        suggestions: &[Suggestion],
        records: &[FileRecord],
    ) -> OrganizationPlan {
        let mut operations = candidates;
        for suggestion in suggestions {
            operations.extend(self.suggestion_operations(suggestion, records));
        }
        OrganizationPlan::draft(name, operations)
    }

    /// `draft` followed by `prepare`.
    pub fn plan(
        &self,
        name: &str,
        candidates: Vec<OrganizationOperation>,
        suggestions: &[Suggestion],
        records: &[FileRecord],
    ) -> Result<OrganizationPlan, ValidationError> {
        let draft = self.draft(name, candidates, suggestions, records);
        self.prepare(&draft, records)
    }

    /// Maps an accepted suggestion onto concrete operations. Suggestions below
    /// the configured confidence produce nothing.
    pub fn suggestion_operations(
        &self,
        suggestion: &Suggestion,
        records: &[FileRecord],
    ) -> Vec<OrganizationOperation> {
        if suggestion.confidence < self.config.min_suggestion_confidence {
            debug!(
                "suggestion {} skipped: confidence {:.2} below {:.2}",
                suggestion.id, suggestion.confidence, self.config.min_suggestion_confidence
            );
            return Vec::new();
        }

        let sources = if suggestion.affected_files.is_empty() {
            &suggestion.from_paths
        } else {
            &suggestion.affected_files
        };
        let sizes = size_index(records);
        let origin = OperationOrigin::Suggestion {
            suggestion_id: suggestion.id.clone(),
        };
        let finish = |operation: OrganizationOperation| {
            let size = sizes
                .get(&paths::path_key(&operation.source))
                .copied()
                .unwrap_or(0);
            operation.with_origin(origin.clone()).with_size(size)
        };

        match suggestion.kind {
            SuggestionKind::Move | SuggestionKind::Group | SuggestionKind::Archive => {
                let Some(target_dir) = suggestion.to_path.as_deref() else {
                    warn!("suggestion {} has no target path", suggestion.id);
                    return Vec::new();
                };
                sources
                    .iter()
                    .map(|source| {
                        finish(OrganizationOperation::move_to(
                            source.clone(),
                            target_dir.join(paths::file_name(source)),
                        ))
                    })
                    .collect()
            }
            SuggestionKind::Rename => {
                let (Some(source), Some(target)) = (sources.first(), suggestion.to_path.as_deref())
                else {
                    warn!("suggestion {} has no rename source or target", suggestion.id);
                    return Vec::new();
                };
                if sources.len() > 1 {
                    warn!(
                        "suggestion {} names {} sources; renaming only {}",
                        suggestion.id,
                        sources.len(),
                        source.display()
                    );
                }
                let destination = if paths::depth(target) <= 1 {
                    match paths::parent(source) {
                        Some(dir) => dir.join(target),
                        None => target.to_path_buf(),
                    }
                } else {
                    target.to_path_buf()
                };
                vec![finish(OrganizationOperation::rename_to(
                    source.clone(),
                    destination,
                ))]
            }
            SuggestionKind::Delete => sources
                .iter()
                .map(|source| finish(OrganizationOperation::delete(source.clone())))
                .collect(),
        }
    }

    /// Validates and orders a draft. On success returns the same plan id in
    /// `Ready` with frozen metadata; on failure the draft is left untouched.
    pub fn prepare(
        &self,
        draft: &OrganizationPlan,
        records: &[FileRecord],
    ) -> Result<OrganizationPlan, ValidationError> {
        if draft.status != PlanStatus::Draft {
            return Err(ValidationError::PlanNotDraft {
                status: draft.status,
            });
        }

        let mut operations = normalize(&draft.operations, records)?;
        reject_structural_conflicts(&operations)?;
        let uniquified = self.resolve_collisions(&mut operations, records)?;
        let operations = topological_order(operations)?;
        validate_order(&operations)?;

        let metadata = self.metadata(&operations, records);
        let mut plan = draft.clone();
        plan.operations = operations;
        plan.metadata = metadata;
        plan.status = PlanStatus::Ready;

        info!(
            "plan {} ready: {} operation(s), {} byte(s), {} new director(ies), {} destination(s) uniquified",
            plan.id,
            plan.operations.len(),
            plan.metadata.total_size,
            plan.metadata.new_directories.len(),
            uniquified
        );
        Ok(plan)
    }

    fn resolve_collisions(
        &self,
        operations: &mut [OrganizationOperation],
        records: &[FileRecord],
    ) -> Result<usize, ValidationError> {
        let live = records
            .iter()
            .map(|record| paths::path_key(&record.path))
            .collect::<HashSet<_>>();
        let vacated = operations
            .iter()
            .filter(|operation| operation.kind.vacates_source())
            .map(|operation| paths::path_key(&operation.source))
            .collect::<HashSet<_>>();
        let taken = |key: &str, claimed: &HashSet<String>| {
            claimed.contains(key) || (live.contains(key) && !vacated.contains(key))
        };

        let mut claimed = HashSet::new();
        let mut uniquified = 0;
        for operation in operations.iter_mut() {
            let Some(destination) = operation.destination.clone() else {
                continue;
            };
            let mut key = paths::path_key(&destination);
            if taken(&key, &claimed) {
                let uniquify = self.config.collision_policy == CollisionPolicy::Uniquify
                    && operation.kind != OperationKind::Rename;
                if !uniquify {
                    return Err(ValidationError::DestinationCollision { destination });
                }
                let mut counter = 1;
                let mut candidate = paths::uniquified(&destination, counter);
                while claimed.contains(&paths::path_key(&candidate))
                    || live.contains(&paths::path_key(&candidate))
                {
                    counter += 1;
                    candidate = paths::uniquified(&destination, counter);
                }
                debug!(
                    "destination {} taken; using {}",
                    destination.display(),
                    candidate.display()
                );
                key = paths::path_key(&candidate);
                operation.destination = Some(candidate);
                uniquified += 1;
            }
            claimed.insert(key);
        }
        Ok(uniquified)
    }

    fn metadata(&self, operations: &[OrganizationOperation], records: &[FileRecord]) -> PlanMetadata {
        let total_files = operations.len() as u64;
        let total_size = operations
            .iter()
            .map(|operation| operation.size_bytes)
            .fold(0_u64, u64::saturating_add);

        let transfer_secs = if self.config.throughput_bytes_per_sec == 0 {
            0
        } else {
            total_size / self.config.throughput_bytes_per_sec
        };
        let estimated_duration_secs = total_files * self.config.per_operation_overhead_secs
            + total_files / 100
            + transfer_secs;

        let mut affected = BTreeMap::new();
        for operation in operations {
            let touched = std::iter::once(operation.source.as_path()).chain(operation.destination_path());
            for path in touched {
                if let Some(dir) = paths::parent(path) {
                    affected.entry(paths::path_key(&dir)).or_insert(dir);
                }
            }
        }

        PlanMetadata {
            total_files,
            total_size,
            estimated_duration_secs,
            affected_paths: affected.into_values().collect(),
            new_directories: new_directories(operations, records),
        }
    }
}

/// Checks the ordering and uniqueness guarantees of a prepared plan. The
/// previewer and executor call this before projecting or applying anything.
pub fn validate_order(operations: &[OrganizationOperation]) -> Result<(), ValidationError> {
    let mut sources = HashSet::new();
    let mut destinations = HashSet::new();
    for operation in operations {
        if operation.kind.needs_destination() && operation.destination.is_none() {
            return Err(missing_destination(operation));
        }
        if !sources.insert(paths::path_key(&operation.source)) {
            return Err(ValidationError::DuplicateSource {
                path: operation.source.clone(),
            });
        }
        if let Some(destination) = operation.destination_path() {
            if !destinations.insert(paths::path_key(destination)) {
                return Err(ValidationError::DestinationCollision {
                    destination: destination.to_path_buf(),
                });
            }
        }
    }

    for (index, later) in operations.iter().enumerate() {
        if let Some(earlier) = operations[..index]
            .iter()
            .find(|earlier| must_precede(later, earlier))
        {
            return Err(ValidationError::CyclicOperations {
                paths: vec![later.source.clone(), earlier.source.clone()],
            });
        }
    }
    Ok(())
}

/// True when `first` has to run before `second`.
pub fn must_precede(first: &OrganizationOperation, second: &OrganizationOperation) -> bool {
    // Children are handled before the directory that contains them.
    if paths::is_ancestor(&second.source, &first.source) {
        return true;
    }
    // A path has to be vacated before something else lands on it.
    if first.kind.vacates_source() {
        if let Some(target) = second.destination_path() {
            if paths::path_key(target) == paths::path_key(&first.source) {
                return true;
            }
        }
    }
    if let Some(produced) = first.destination_path() {
        // Sources that only exist once `first` has placed them.
        if paths::is_ancestor(produced, &second.source) {
            return true;
        }
        // Destinations nested under a directory `first` creates.
        if let Some(target) = second.destination_path() {
            if paths::is_ancestor(produced, target) {
                return true;
            }
        }
    }
    false
}

fn missing_destination(operation: &OrganizationOperation) -> ValidationError {
    ValidationError::MissingDestination {
        operation_id: operation.id.clone(),
        kind: format!("{:?}", operation.kind).to_lowercase(),
        path: operation.source.clone(),
    }
}

fn size_index(records: &[FileRecord]) -> HashMap<String, u64> {
    records
        .iter()
        .map(|record| (paths::path_key(&record.path), record.size_bytes))
        .collect()
}

/// Fresh copies with pending status, snapshot sizes, and no-ops removed.
fn normalize(
    operations: &[OrganizationOperation],
    records: &[FileRecord],
) -> Result<Vec<OrganizationOperation>, ValidationError> {
    let sizes = size_index(records);
    let mut out = Vec::with_capacity(operations.len());
    for operation in operations {
        if operation.kind.needs_destination() && operation.destination.is_none() {
            return Err(missing_destination(operation));
        }
        if let Some(destination) = operation.destination_path() {
            if paths::path_key(destination) == paths::path_key(&operation.source) {
                debug!("dropping no-op {:?} of {}", operation.kind, operation.source.display());
                continue;
            }
        }
        let mut operation = operation.clone();
        operation.status = OperationStatus::Pending;
        operation.error = None;
        if operation.size_bytes == 0 {
            if let Some(size) = sizes.get(&paths::path_key(&operation.source)) {
                operation.size_bytes = *size;
            }
        }
        out.push(operation);
    }
    Ok(out)
}

fn reject_structural_conflicts(operations: &[OrganizationOperation]) -> Result<(), ValidationError> {
    let mut sources = HashSet::new();
    for operation in operations {
        if !sources.insert(paths::path_key(&operation.source)) {
            return Err(ValidationError::DuplicateSource {
                path: operation.source.clone(),
            });
        }
        if let Some(destination) = operation.destination_path() {
            if paths::is_ancestor(&operation.source, destination) {
                return Err(ValidationError::MoveIntoOwnSubtree {
                    path: operation.source.clone(),
                    destination: destination.to_path_buf(),
                });
            }
        }
    }

    for delete in operations
        .iter()
        .filter(|operation| operation.kind == OperationKind::Delete)
    {
        let pending = operations
            .iter()
            .filter(|other| other.id != delete.id)
            .filter(|other| {
                paths::is_ancestor(&delete.source, &other.source)
                    || other
                        .destination_path()
                        .is_some_and(|target| paths::is_same_or_ancestor(&delete.source, target))
            })
            .count();
        if pending > 0 {
            return Err(ValidationError::DeleteWithPendingChildren {
                path: delete.source.clone(),
                pending,
            });
        }
    }

    for operation in operations {
        let Some(destination) = operation.destination_path() else {
            continue;
        };
        if let Some(moved) = operations.iter().find(|other| {
            other.id != operation.id
                && other.kind.vacates_source()
                && paths::is_ancestor(&other.source, destination)
        }) {
            return Err(ValidationError::DestinationInsideMovedSource {
                destination: destination.to_path_buf(),
                moved: moved.source.clone(),
            });
        }
    }
    Ok(())
}

/// Kahn's algorithm over `must_precede`, taking the lowest input index among
/// ready operations so unconstrained operations keep their relative order.
fn topological_order(
    operations: Vec<OrganizationOperation>,
) -> Result<Vec<OrganizationOperation>, ValidationError> {
    let count = operations.len();
    let mut successors = vec![Vec::new(); count];
    let mut indegree = vec![0_usize; count];
    for (a, first) in operations.iter().enumerate() {
        for (b, second) in operations.iter().enumerate() {
            if a != b && must_precede(first, second) {
                successors[a].push(b);
                indegree[b] += 1;
            }
        }
    }

    let mut ready = (0..count)
        .filter(|index| indegree[*index] == 0)
        .collect::<BTreeSet<_>>();
    let mut order = Vec::with_capacity(count);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &successor in &successors[next] {
            indegree[successor] -= 1;
            if indegree[successor] == 0 {
                ready.insert(successor);
            }
        }
    }

    if order.len() < count {
        let placed = order.iter().copied().collect::<HashSet<_>>();
        let paths = (0..count)
            .filter(|index| !placed.contains(index))
            .map(|index| operations[index].source.clone())
            .collect();
        return Err(ValidationError::CyclicOperations { paths });
    }

    let mut slots = operations.into_iter().map(Some).collect::<Vec<_>>();
    Ok(order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect())
}

/// Directories the plan will have to create, shallowest first. A directory
/// already exists when the snapshot holds something inside it or it is
/// present on disk.
fn new_directories(operations: &[OrganizationOperation], records: &[FileRecord]) -> Vec<PathBuf> {
    let mut known = HashSet::new();
    for record in records {
        if record.is_directory {
            known.insert(paths::path_key(&record.path));
        }
        for dir in paths::ancestors(&record.path) {
            known.insert(paths::path_key(&dir));
        }
    }

    let mut created: BTreeMap<(usize, String), PathBuf> = BTreeMap::new();
    for operation in operations {
        let Some(destination) = operation.destination_path() else {
            continue;
        };
        for dir in paths::ancestors(destination) {
            let key = paths::path_key(&dir);
            if known.contains(&key)
                || is_volume_root(&dir)
                || fs::symlink_metadata(&dir).is_ok()
            {
                break;
            }
            created.entry((paths::depth(&dir), key)).or_insert(dir);
        }
        if operation.kind != OperationKind::Delete {
            // The placed entry itself may serve as a parent for later operations.
            known.insert(paths::path_key(destination));
        }
    }
    created.into_values().collect()
}

fn is_volume_root(dir: &Path) -> bool {
    let segments = paths::segments(dir);
    segments.len() == 1 && segments[0].ends_with(':')
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{must_precede, validate_order, OrganizationPlanner};
    use crate::config::{CollisionPolicy, PlannerConfig};
    use crate::error::ValidationError;
    use crate::model::{
        FileRecord, OperationOrigin, OrganizationOperation, OrganizationPlan, PlanStatus,
        Suggestion, SuggestionKind,
    };

    fn planner() -> OrganizationPlanner {
        OrganizationPlanner::new(PlannerConfig::default())
    }

    fn prepare(ops: Vec<OrganizationOperation>, records: &[FileRecord]) -> Result<OrganizationPlan, ValidationError> {
        planner().prepare(&OrganizationPlan::draft("test", ops), records)
    }

    #[test]
    fn swapping_two_paths_is_a_cycle() {
        let records = vec![FileRecord::new("/d/A", 1), FileRecord::new("/d/B", 1)];
        let draft = OrganizationPlan::draft(
            "swap",
            vec![
                OrganizationOperation::move_to("/d/A", "/d/B"),
                OrganizationOperation::move_to("/d/B", "/d/A"),
            ],
        );
        let err = planner().prepare(&draft, &records).expect_err("cycle");
        assert!(matches!(err, ValidationError::CyclicOperations { ref paths } if paths.len() == 2));
        assert_eq!(draft.status, PlanStatus::Draft);
    }

    #[test]
    fn descendants_run_before_their_ancestors() {
        let records = vec![
            FileRecord::new("/src/album", 0).as_directory(),
            FileRecord::new("/src/album/a.jpg", 5),
        ];
        let plan = prepare(
            vec![
                OrganizationOperation::move_to("/src/album", "/dst/album"),
                OrganizationOperation::move_to("/src/album/a.jpg", "/pics/a.jpg"),
            ],
            &records,
        )
        .expect("valid plan");
        assert_eq!(plan.status, PlanStatus::Ready);
        assert_eq!(plan.operations[0].source, PathBuf::from("/src/album/a.jpg"));
        assert_eq!(plan.operations[1].source, PathBuf::from("/src/album"));
        assert!(validate_order(&plan.operations).is_ok());
        assert!(validate_order(&[plan.operations[1].clone(), plan.operations[0].clone()]).is_err());
    }

    #[test]
    fn vacating_move_precedes_move_onto_its_path() {
        let first = OrganizationOperation::move_to("/a/x.txt", "/b/x.txt");
        let second = OrganizationOperation::move_to("/c/x.txt", "/a/x.txt");
        assert!(must_precede(&first, &second));
        assert!(!must_precede(&second, &first));

        let records = vec![FileRecord::new("/a/x.txt", 1), FileRecord::new("/c/x.txt", 1)];
        let plan = prepare(vec![second, first], &records).expect("valid plan");
        assert_eq!(plan.operations[0].source, PathBuf::from("/a/x.txt"));
        assert_eq!(
            plan.operations[1].destination.as_deref(),
            Some(Path::new("/a/x.txt"))
        );
    }

    #[test]
    fn move_collisions_are_uniquified_in_candidate_order() {
        let records = vec![
            FileRecord::new("/in/one/report.pdf", 10),
            FileRecord::new("/in/two/report.pdf", 20),
            FileRecord::new("/docs/report.pdf", 30),
        ];
        let plan = prepare(
            vec![
                OrganizationOperation::move_to("/in/one/report.pdf", "/docs/report.pdf"),
                OrganizationOperation::copy_to("/in/two/report.pdf", "/docs/report.pdf"),
            ],
            &records,
        )
        .expect("valid plan");
        let destinations = plan
            .operations
            .iter()
            .filter_map(|op| op.destination.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            destinations,
            vec![
                PathBuf::from("/docs/report (1).pdf"),
                PathBuf::from("/docs/report (2).pdf")
            ]
        );
        assert_eq!(plan.metadata.total_size, 30);
        assert!(plan.metadata.new_directories.is_empty());
    }

    #[test]
    fn reject_policy_and_rename_collisions_fail() {
        let records = vec![FileRecord::new("/a/x", 1), FileRecord::new("/b/x", 1)];
        let strict = OrganizationPlanner::new(PlannerConfig {
            collision_policy: CollisionPolicy::Reject,
            ..PlannerConfig::default()
        });
        let draft = OrganizationPlan::draft(
            "strict",
            vec![OrganizationOperation::move_to("/a/x", "/b/x")],
        );
        assert!(matches!(
            strict.prepare(&draft, &records),
            Err(ValidationError::DestinationCollision { .. })
        ));

        let rename = prepare(vec![OrganizationOperation::rename_to("/a/x", "/a/y")], &[
            FileRecord::new("/a/x", 1),
            FileRecord::new("/a/y", 1),
        ]);
        assert!(matches!(rename, Err(ValidationError::DestinationCollision { .. })));
    }

    #[test]
    fn delete_with_pending_children_is_rejected() {
        let err = prepare(
            vec![
                OrganizationOperation::delete("/old"),
                OrganizationOperation::move_to("/old/keep.txt", "/new/keep.txt"),
            ],
            &[],
        )
        .expect_err("pending child");
        assert_eq!(
            err,
            ValidationError::DeleteWithPendingChildren {
                path: PathBuf::from("/old"),
                pending: 1
            }
        );
    }

    #[test]
    fn structural_conflicts_are_rejected() {
        assert!(matches!(
            prepare(vec![OrganizationOperation::move_to("/a", "/a/b/a")], &[]),
            Err(ValidationError::MoveIntoOwnSubtree { .. })
        ));
        assert!(matches!(
            prepare(
                vec![
                    OrganizationOperation::move_to("/x.txt", "/y.txt"),
                    OrganizationOperation::delete("/x.txt"),
                ],
                &[]
            ),
            Err(ValidationError::DuplicateSource { .. })
        ));
        assert!(matches!(
            prepare(
                vec![
                    OrganizationOperation::move_to("/proj", "/archive/proj"),
                    OrganizationOperation::copy_to("/notes.txt", "/proj/notes.txt"),
                ],
                &[]
            ),
            Err(ValidationError::DestinationInsideMovedSource { .. })
        ));
        assert!(matches!(
            prepare(
                vec![OrganizationOperation::new(
                    crate::model::OperationKind::Move,
                    "/x",
                    None
                )],
                &[]
            ),
            Err(ValidationError::MissingDestination { .. })
        ));
    }

    #[test]
    fn metadata_is_frozen_at_ready() {
        let records = vec![
            FileRecord::new("/in/a.bin", 1_000),
            FileRecord::new("/in/b.bin", 2_000),
        ];
        let plan = prepare(
            vec![
                OrganizationOperation::move_to("/in/a.bin", "/out/new/a.bin"),
                OrganizationOperation::move_to("/in/b.bin", "/in/b.bin"),
                OrganizationOperation::delete("/in/b.bin"),
            ],
            &records,
        )
        .expect("valid plan");
        assert_eq!(plan.metadata.total_files, 2);
        assert_eq!(plan.metadata.total_size, 3_000);
        assert_eq!(plan.metadata.estimated_duration_secs, 20);
        assert_eq!(
            plan.metadata.new_directories,
            vec![PathBuf::from("/out"), PathBuf::from("/out/new")]
        );
        assert_eq!(
            plan.metadata.affected_paths,
            vec![PathBuf::from("/in"), PathBuf::from("/out/new")]
        );

        assert!(matches!(
            planner().prepare(&plan, &records),
            Err(ValidationError::PlanNotDraft { .. })
        ));
    }

    #[test]
    fn suggestions_become_operations_above_threshold() {
        let suggestion = Suggestion {
            id: "s1".to_string(),
            kind: SuggestionKind::Group,
            title: "Group invoices".to_string(),
            description: String::new(),
            from_paths: vec![PathBuf::from("/downloads")],
            to_path: Some(PathBuf::from("/docs/invoices")),
            affected_files: vec![
                PathBuf::from("/downloads/inv1.pdf"),
                PathBuf::from("/downloads/inv2.pdf"),
            ],
            estimated_time_secs: 30,
            confidence: 0.9,
            reason: "similar names".to_string(),
        };
        let records = vec![FileRecord::new("/downloads/inv1.pdf", 7)];
        let ops = planner().suggestion_operations(&suggestion, &records);
        assert_eq!(ops.len(), 2);
        assert_eq!(
            ops[0].destination.as_deref(),
            Some(Path::new("/docs/invoices/inv1.pdf"))
        );
        assert_eq!(ops[0].size_bytes, 7);
        assert_eq!(
            ops[0].origin,
            OperationOrigin::Suggestion {
                suggestion_id: "s1".to_string()
            }
        );

        let rename = Suggestion {
            kind: SuggestionKind::Rename,
            affected_files: vec![PathBuf::from("/downloads/inv1.pdf")],
            to_path: Some(PathBuf::from("invoice-2024-01.pdf")),
            ..suggestion.clone()
        };
        let ops = planner().suggestion_operations(&rename, &records);
        assert_eq!(
            ops[0].destination.as_deref(),
            Some(Path::new("/downloads/invoice-2024-01.pdf"))
        );

        let weak = Suggestion {
            confidence: 0.2,
            ..suggestion
        };
        assert!(planner().suggestion_operations(&weak, &records).is_empty());
    }

    #[test]
    fn case_only_renames_are_kept() {
        let records = vec![FileRecord::new("/pics/Photo.JPG", 12)];
        let plan = prepare(
            vec![OrganizationOperation::rename_to("/pics/Photo.JPG", "/pics/photo.jpg")],
            &records,
        )
        .expect("valid plan");
        assert_eq!(plan.operations.len(), 1);
        assert_eq!(
            plan.operations[0].destination.as_deref(),
            Some(Path::new("/pics/photo.jpg"))
        );
    }

    #[test]
    fn paths_differing_in_case_are_not_nested() {
        let records = vec![
            FileRecord::new("/data/Old", 0).as_directory(),
            FileRecord::new("/data/old/x.txt", 3),
        ];
        let plan = prepare(
            vec![
                OrganizationOperation::delete("/data/Old"),
                OrganizationOperation::move_to("/data/old/x.txt", "/data/keep/x.txt"),
            ],
            &records,
        )
        .expect("no pending children");
        assert_eq!(plan.operations[0].source, PathBuf::from("/data/Old"));
    }

    #[test]
    fn directories_present_on_disk_are_not_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let documents = dir.path().join("documents");
        std::fs::create_dir_all(&documents).expect("mkdir");
        let source = dir.path().join("inbox/a.txt");
        let target = documents.join("2024/a.txt");

        let plan = prepare(
            vec![OrganizationOperation::move_to(source.clone(), target)],
            &[],
        )
        .expect("valid plan");
        assert_eq!(plan.metadata.new_directories, vec![documents.join("2024")]);
    }
}
