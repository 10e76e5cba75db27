//! Turns pending scores rows into self-contained task descriptors.

use super::registry::ModelRegistry;
use super::task::TaskDescriptor;
use crate::db::queries::{RowState, ScoreRow};
use crate::error::Result;
use tracing::trace;

/// Build a task for every pending row, in row order.
///
/// Scored and failed rows are skipped. Any row referencing an emodel that is
/// not registered aborts enumeration, so no run starts with an incomplete
/// task list.
pub fn create_tasks(rows: &[ScoreRow], registry: &ModelRegistry) -> Result<Vec<TaskDescriptor>> {
    let mut tasks = Vec::new();

    for row in rows.iter().filter(|r| r.state() == RowState::Pending) {
        let emodel_dir = registry.resolve_dir(&row.emodel)?;
        let params = registry.params(&row.emodel)?;
        let morphology_path = std::path::absolute(row.morphology_path())?;

        trace!(id = row.id, emodel = %row.emodel, "Enumerated combination");

        tasks.push(TaskDescriptor {
            id: row.id,
            emodel: row.emodel.clone(),
            emodel_dir: emodel_dir.to_path_buf(),
            params: params.clone(),
            morphology_path,
        });
    }

    Ok(tasks)
}
