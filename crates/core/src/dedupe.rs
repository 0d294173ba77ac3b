use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ScanIncomplete;
use crate::events::{DuplicateFoundEvent, EngineEvent, EventSink};
use crate::matcher::PathMatcher;
use crate::model::{DuplicateGroup, DuplicateItem, FileRecord, GroupKind};
use crate::paths;
use crate::select::{apply_selection, SelectionReason};

// Matched only directly under the filesystem root or a drive letter.
const UNIX_SYSTEM_ROOTS: &[&str] = &["proc", "sys", "dev"];
const DRIVE_SYSTEM_ROOTS: &[&str] = &["windows", "$recycle.bin", "system volume information"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    #[default]
    Hash,
    Name,
    Size,
    NameAndSize,
    Custom,
}

/// Ordering applied to the resulting groups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupingMethod {
    #[default]
    Hash,
    Name,
    Type,
    Location,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DuplicateScanOptions {
    #[serde(default)]
    pub disks: Vec<String>,
    #[serde(default)]
    pub min_size: Option<u64>,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub include_system: bool,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default)]
    pub method: DetectionMethod,
    #[serde(default)]
    pub group_by: GroupingMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DuplicateScan {
    pub groups: Vec<DuplicateGroup>,
    pub reasons: BTreeMap<String, SelectionReason>,
    pub incomplete: Option<ScanIncomplete>,
    pub warnings: Vec<String>,
}

/// Groups `records` by the identity key of `options.method`.
pub fn detect_duplicates(records: &[FileRecord], options: &DuplicateScanOptions) -> DuplicateScan {
    let method = options.method;
    group_by_key(records, options, method, |record| identity_key(record, method))
}

/// Same as [`detect_duplicates`], emitting `duplicate-found` per group.
pub fn detect_duplicates_with_sink(
    records: &[FileRecord],
    options: &DuplicateScanOptions,
    sink: &dyn EventSink,
) -> DuplicateScan {
    let scan = detect_duplicates(records, options);
    for group in &scan.groups {
        sink.emit(&EngineEvent::DuplicateFound(DuplicateFoundEvent {
            group_id: group.id.clone(),
            identity_key: group.identity_key.clone(),
            files: group
                .members
                .iter()
                .map(|item| item.record.path.clone())
                .collect(),
            kept: group.kept().map(|item| item.record.path.clone()),
            reason: scan
                .reasons
                .get(&group.id)
                .copied()
                .unwrap_or(SelectionReason::SoleCandidate),
            total_size: group.total_size,
            reclaimable_bytes: group.reclaimable_bytes,
        }));
    }
    scan
}

/// Groups records with a caller-chosen key. Records for which `key` returns
/// `None` are deferred rather than grouped.
pub fn group_by_key<F>(
    records: &[FileRecord],
    options: &DuplicateScanOptions,
    method: DetectionMethod,
    key: F,
) -> DuplicateScan
where
    F: Fn(&FileRecord) -> Option<String>,
{
    let mut warnings = Vec::new();
    let filter = RecordFilter::new(options, &mut warnings);

    let mut partitions: BTreeMap<(GroupKind, String), Vec<&FileRecord>> = BTreeMap::new();
    let mut deferred = Vec::new();
    let mut considered = 0_usize;
    for record in records.iter().filter(|record| filter.accepts(record)) {
        considered += 1;
        match key(record) {
            Some(identity) => partitions
                .entry((kind_of(record), identity))
                .or_default()
                .push(record),
            None => deferred.push(record.path.clone()),
        }
    }

    let mut built = partitions
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|((kind, identity), members)| build_group(kind, identity, method, members))
        .collect::<Vec<_>>();

    sort_groups(&mut built, options.group_by);

    let mut reasons = BTreeMap::new();
    let groups = built
        .into_iter()
        .map(|(group, reason)| {
            reasons.insert(group.id.clone(), reason);
            group
        })
        .collect::<Vec<_>>();

    info!(
        "duplicate detection: {} record(s) considered, {} group(s), {} deferred",
        considered,
        groups.len(),
        deferred.len()
    );

    let incomplete = if deferred.is_empty() {
        None
    } else {
        debug!("{} record(s) still awaiting content hashes", deferred.len());
        Some(ScanIncomplete { deferred })
    };

    DuplicateScan {
        groups,
        reasons,
        incomplete,
        warnings,
    }
}

pub fn identity_key(record: &FileRecord, method: DetectionMethod) -> Option<String> {
    match method {
        DetectionMethod::Hash => record.content_hash.clone(),
        DetectionMethod::Name => Some(paths::file_name(&record.path).to_lowercase()),
        DetectionMethod::Size => Some(record.size_bytes.to_string()),
        DetectionMethod::NameAndSize => Some(format!(
            "{}|{}",
            paths::file_name(&record.path).to_lowercase(),
            record.size_bytes
        )),
        DetectionMethod::Custom => None,
    }
}

fn kind_of(record: &FileRecord) -> GroupKind {
    if record.is_directory {
        GroupKind::Folder
    } else {
        GroupKind::File
    }
}

fn build_group(
    kind: GroupKind,
    identity: String,
    method: DetectionMethod,
    mut members: Vec<&FileRecord>,
) -> (DuplicateGroup, SelectionReason) {
    members.sort_by(|a, b| a.path.cmp(&b.path));
    let mut group = DuplicateGroup {
        id: group_id(kind, method, &identity),
        identity_key: identity,
        method,
        kind,
        name: String::new(),
        members: members
            .into_iter()
            .cloned()
            .map(DuplicateItem::new)
            .collect(),
        total_size: 0,
        reclaimable_bytes: 0,
    };
    let reason = apply_selection(&mut group);
    (group, reason)
}

// Stable across runs so re-detection yields the same ids.
fn group_id(kind: GroupKind, method: DetectionMethod, identity: &str) -> String {
    let seed = format!("{kind:?}:{method:?}:{identity}");
    let digest = blake3::hash(seed.as_bytes()).to_hex();
    format!("dup-{}", &digest[..16])
}

fn sort_groups(groups: &mut [(DuplicateGroup, SelectionReason)], grouping: GroupingMethod) {
    groups.sort_by(|(a, _), (b, _)| {
        let primary = match grouping {
            GroupingMethod::Hash => a.identity_key.cmp(&b.identity_key),
            GroupingMethod::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            GroupingMethod::Type => extension_of(a).cmp(&extension_of(b)),
            GroupingMethod::Location => kept_location(a).cmp(&kept_location(b)),
        };
        primary
            .then_with(|| b.reclaimable_bytes.cmp(&a.reclaimable_bytes))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn extension_of(group: &DuplicateGroup) -> String {
    paths::split_name(&group.name)
        .1
        .map(str::to_lowercase)
        .unwrap_or_default()
}

fn kept_location(group: &DuplicateGroup) -> (String, String) {
    group
        .kept()
        .map(|item| {
            (
                item.record.disk.clone(),
                item.record.path.to_string_lossy().to_string(),
            )
        })
        .unwrap_or_default()
}

struct RecordFilter<'a> {
    options: &'a DuplicateScanOptions,
    file_types: Vec<String>,
    excludes: PathMatcher,
}

impl<'a> RecordFilter<'a> {
    fn new(options: &'a DuplicateScanOptions, warnings: &mut Vec<String>) -> Self {
        let file_types = options
            .file_types
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            options,
            file_types,
            excludes: PathMatcher::new(&options.exclude_paths, warnings),
        }
    }

    fn accepts(&self, record: &FileRecord) -> bool {
        let options = self.options;
        if !options.disks.is_empty()
            && !options
                .disks
                .iter()
                .any(|disk| disk.eq_ignore_ascii_case(&record.disk))
        {
            return false;
        }
        if options.min_size.is_some_and(|min| record.size_bytes < min) {
            return false;
        }
        if options.max_size.is_some_and(|max| record.size_bytes > max) {
            return false;
        }
        if !options.include_hidden && paths::is_hidden(&record.path) {
            return false;
        }
        if !options.include_system && is_system_path(&record.path) {
            return false;
        }
        if !self.file_types.is_empty() && !record.is_directory {
            let ext = paths::extension_lower(&record.path).unwrap_or_default();
            if !self.file_types.contains(&ext) {
                return false;
            }
        }
        !self.excludes.matches(&record.path)
    }
}

fn is_system_path(path: &Path) -> bool {
    let segments = paths::segments(path);
    let raw = path.to_string_lossy();
    match segments.as_slice() {
        [drive, top, ..] if is_drive(drive) => DRIVE_SYSTEM_ROOTS
            .iter()
            .any(|system| top.eq_ignore_ascii_case(system)),
        [top, ..] if raw.starts_with('/') => UNIX_SYSTEM_ROOTS.contains(&top.as_str()),
        _ => false,
    }
}

fn is_drive(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
