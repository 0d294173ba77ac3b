use tracing::debug;

use crate::error::ValidationError;
use crate::model::{ChangeSummary, OrganizationPlan, PlanStatus};
use crate::planner::validate_order;

/// Projects the filesystem delta of a ready plan without touching disk.
///
/// The projection walks the plan exactly as the executor's dry run does:
/// same ordering check, the planned directories first, then one change per
/// operation.
pub fn preview_plan(plan: &OrganizationPlan) -> Result<ChangeSummary, ValidationError> {
    if plan.status != PlanStatus::Ready {
        return Err(ValidationError::PlanNotReady {
            status: plan.status,
        });
    }
    validate_order(&plan.operations)?;

    let mut summary = ChangeSummary::default();
    project(plan, &mut summary);
    debug!(
        "preview of plan {}: {} create(s), {} move(s), {} rename(s), {} delete(s)",
        plan.id, summary.creates, summary.moves, summary.renames, summary.deletes
    );
    Ok(summary)
}

pub(crate) fn project(plan: &OrganizationPlan, summary: &mut ChangeSummary) {
    for dir in &plan.metadata.new_directories {
        summary.record_directory(dir);
    }
    for operation in &plan.operations {
        summary.record_operation(operation);
    }
}
