use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{DuplicateGroup, FileRecord};
use crate::paths;

const TRANSIENT_SEGMENTS: &[&str] = &["temp", "cache", "backup", "tmp"];
const ORGANIZED_SEGMENTS: &[&str] = &["documents", "projects", "work"];

/// Criterion that separated the kept member from the runner-up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    NotTransient,
    EarlierCreation,
    OrganizedLocation,
    ShallowerPath,
    PathOrder,
    SoleCandidate,
    UserOverride,
}

/// Orders two candidates; `Less` means `a` is the better original.
pub fn compare_candidates(a: &FileRecord, b: &FileRecord) -> Ordering {
    decide(a, b).0
}

fn decide(a: &FileRecord, b: &FileRecord) -> (Ordering, SelectionReason) {
    let transient = in_transient_location(&a.path).cmp(&in_transient_location(&b.path));
    if transient != Ordering::Equal {
        return (transient, SelectionReason::NotTransient);
    }

    let created = match (a.created, b.created) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    if created != Ordering::Equal {
        return (created, SelectionReason::EarlierCreation);
    }

    let organized = in_organized_location(&b.path).cmp(&in_organized_location(&a.path));
    if organized != Ordering::Equal {
        return (organized, SelectionReason::OrganizedLocation);
    }

    let depth = paths::depth(&a.path).cmp(&paths::depth(&b.path));
    if depth != Ordering::Equal {
        return (depth, SelectionReason::ShallowerPath);
    }

    (
        a.path.to_string_lossy().cmp(&b.path.to_string_lossy()),
        SelectionReason::PathOrder,
    )
}

pub fn in_transient_location(path: &Path) -> bool {
    directory_segment_matches(path, TRANSIENT_SEGMENTS)
}

pub fn in_organized_location(path: &Path) -> bool {
    directory_segment_matches(path, ORGANIZED_SEGMENTS)
}

// Only directory segments count; the entry's own name never does.
fn directory_segment_matches(path: &Path, words: &[&str]) -> bool {
    let mut segments = paths::segments(path);
    segments.pop();
    segments.iter().any(|segment| {
        words
            .iter()
            .any(|word| segment.eq_ignore_ascii_case(word))
    })
}

/// Index of the member to keep, plus the criterion that decided it.
pub fn select_original(records: &[&FileRecord]) -> Option<(usize, SelectionReason)> {
    let mut best: Option<usize> = None;
    for (index, candidate) in records.iter().enumerate() {
        best = match best {
            Some(current) if compare_candidates(records[current], candidate) != Ordering::Greater => {
                Some(current)
            }
            _ => Some(index),
        };
    }
    let winner = best?;

    let runner_up = records
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != winner)
        .min_by(|(_, a), (_, b)| compare_candidates(a, b))
        .map(|(_, record)| *record);

    let reason = match runner_up {
        Some(other) => decide(records[winner], other).1,
        None => SelectionReason::SoleCandidate,
    };
    Some((winner, reason))
}

/// Marks exactly one member as kept and refreshes the group totals.
pub fn apply_selection(group: &mut DuplicateGroup) -> SelectionReason {
    let records = group
        .members
        .iter()
        .map(|item| &item.record)
        .collect::<Vec<_>>();
    let Some((winner, reason)) = select_original(&records) else {
        return SelectionReason::SoleCandidate;
    };

    for (index, item) in group.members.iter_mut().enumerate() {
        item.is_original = index == winner;
        item.should_keep = index == winner;
    }
    if let Some(kept) = group.kept() {
        group.name = paths::file_name(&kept.record.path);
    }
    group.refresh_totals();
    reason
}

/// Moves the keep flag to the member at `path`. `is_original` stays on the
/// selector's choice. Returns false when no member matches.
pub fn set_kept(group: &mut DuplicateGroup, path: &Path) -> bool {
    let key = paths::path_key(path);
    if !group
        .members
        .iter()
        .any(|item| paths::path_key(&item.record.path) == key)
    {
        return false;
    }
    for item in &mut group.members {
        item.should_keep = paths::path_key(&item.record.path) == key;
    }
    group.refresh_totals();
    true
}
