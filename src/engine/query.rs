//! Read-only projections for display and history components.
//!
//! Summaries are computed from an owned snapshot taken under a short read
//! lock, so concurrent updates to other tasks never tear a summary.

use crate::error::{Error, Result, TaskError};
use crate::task::TaskRecord;
use crate::types::{
    BatchId, BatchSummary, CorrelationKey, Diagnostics, SubscriptionState, TaskId,
};

use super::SyncEngine;

impl SyncEngine {
    /// Batch-level counts and the done flag
    pub async fn get_batch_summary(&self, batch_id: BatchId) -> Result<BatchSummary> {
        let snapshot = self.list_tasks(batch_id).await?;
        Ok(BatchSummary::from_tasks(&snapshot))
    }

    /// Snapshot of one task by its authoritative id
    pub async fn get_task(&self, task_id: &TaskId) -> Result<TaskRecord> {
        self.registry
            .read()
            .await
            .task(task_id)
            .cloned()
            .ok_or_else(|| TaskError::UnknownTask(task_id.clone()).into())
    }

    /// Snapshot of one task by its correlation key, usable before provisioning resolves
    pub async fn get_task_by_key(&self, batch_id: BatchId, key: &CorrelationKey) -> Result<TaskRecord> {
        let registry = self.registry.read().await;
        let job = registry.batch(batch_id).ok_or(Error::BatchNotFound(batch_id))?;
        job.task_by_key(key).cloned().ok_or_else(|| {
            TaskError::UnknownKey {
                batch_id,
                key: key.clone(),
            }
            .into()
        })
    }

    /// The authoritative id for a correlation key, once provisioned
    pub async fn task_id_for(&self, batch_id: BatchId, key: &CorrelationKey) -> Result<Option<TaskId>> {
        Ok(self.get_task_by_key(batch_id, key).await?.task_id)
    }

    /// Snapshots of every task in a batch, in the order the targets were given
    pub async fn list_tasks(&self, batch_id: BatchId) -> Result<Vec<TaskRecord>> {
        self.registry
            .read()
            .await
            .batch(batch_id)
            .map(|job| job.snapshot())
            .ok_or(Error::BatchNotFound(batch_id))
    }

    /// Ids of every live batch, ascending
    pub async fn list_batches(&self) -> Vec<BatchId> {
        let mut ids = self.registry.read().await.batch_ids();
        ids.sort_unstable();
        ids
    }

    /// Current subscription state of a task
    pub async fn subscription_state(&self, task_id: &TaskId) -> SubscriptionState {
        self.subscriptions
            .lock()
            .await
            .get(task_id)
            .map(|handle| *handle.state.borrow())
            .unwrap_or_default()
    }

    /// Diagnostic counters (ignored events, rejected results, drops, stalls)
    pub async fn diagnostics(&self) -> Diagnostics {
        self.registry.read().await.diagnostics()
    }
}
