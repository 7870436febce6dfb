//! Batch-level aggregation
//!
//! Counts are recomputed from a snapshot of the task records on every read and
//! never cached, so the summary cannot drift from the records it describes.

use crate::task::TaskRecord;
use crate::types::{BatchSummary, CopyStatus, CreateStatus};

impl BatchSummary {
    /// Derive the summary from a set of task records
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut summary = BatchSummary::default();
        let mut terminal = 0;

        for task in tasks {
            summary.total_count += 1;
            match task.create_status {
                CreateStatus::Pending => {}
                CreateStatus::Success => {
                    summary.created_count += 1;
                    summary.success_count += 1;
                }
                CreateStatus::Failed => {
                    summary.created_count += 1;
                    summary.failure_count += 1;
                }
            }
            if task.copy_status == CopyStatus::Completed {
                summary.copy_completed_count += 1;
            }
            if task.stalled {
                summary.stalled_count += 1;
            }
            if task.is_terminal() {
                terminal += 1;
            }
        }

        summary.done = summary.total_count > 0 && terminal == summary.total_count;
        summary
    }

    /// Tasks whose provisioning has not resolved yet
    pub fn pending_count(&self) -> usize {
        self.total_count - self.created_count
    }
}
