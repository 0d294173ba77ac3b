use crate::model::{DuplicateGroup, SavingsSummary};

/// Aggregates reclaimable bytes across `groups`.
///
/// Everything is re-derived from member flags, so the result tracks keep
/// overrides without any cached counters.
pub fn calculate_savings(groups: &[DuplicateGroup]) -> SavingsSummary {
    let mut summary = SavingsSummary::default();
    for group in groups {
        summary.group_count += 1;
        for item in &group.members {
            let size = item.record.size_bytes;
            summary.total_size = summary.total_size.saturating_add(size);
            if item.should_keep {
                continue;
            }
            summary.recoverable = summary.recoverable.saturating_add(size);
            summary.reclaimable_items += 1;
            *summary
                .by_disk
                .entry(item.record.disk.clone())
                .or_insert(0) += size;
            *summary.by_kind.entry(group.kind).or_insert(0) += size;
        }
    }
    summary
}
