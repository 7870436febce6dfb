//! Batch registry
//!
//! [`BatchJob`] owns the canonical task records of one batch. [`BatchRegistry`]
//! holds every live batch plus a `TaskId → BatchId` index so progress events,
//! which only carry a task id, find their record. Both are plain synchronous
//! state; the engine serializes access behind a lock and never holds it across
//! an await point.

use crate::error::{Error, Result, TaskError};
use crate::task::TaskRecord;
use crate::types::{
    BatchId, BatchSummary, CorrelationKey, DeviceTarget, Diagnostics, MeetingRef, ProgressEvent,
    ProvisionResult, TaskId,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One batch: a meeting distributed to a fixed set of devices
#[derive(Clone, Debug)]
pub struct BatchJob {
    batch_id: BatchId,
    meeting: MeetingRef,
    total_count: usize,
    created_at: DateTime<Utc>,
    tasks: HashMap<CorrelationKey, TaskRecord>,
    // Seeding order, for listing
    order: Vec<CorrelationKey>,
    by_task_id: HashMap<TaskId, CorrelationKey>,
}

impl BatchJob {
    /// Seed a batch with one pending task per target
    ///
    /// Fails fast if the targets are empty or contain a duplicate serial, since
    /// either would break `total_count == number of tasks`.
    pub fn create(batch_id: BatchId, meeting: MeetingRef, targets: &[DeviceTarget]) -> Result<Self> {
        if targets.is_empty() {
            return Err(Error::InvalidBatch(format!(
                "batch {batch_id} has no device targets"
            )));
        }

        let mut tasks = HashMap::with_capacity(targets.len());
        let mut order = Vec::with_capacity(targets.len());
        for target in targets {
            let record = TaskRecord::placeholder(batch_id, &meeting, target);
            let key = record.key.clone();
            if tasks.insert(key.clone(), record).is_some() {
                tracing::error!(batch_id = %batch_id, key = %key, "Duplicate device target");
                return Err(Error::InvalidBatch(format!(
                    "batch {batch_id} lists device {key} more than once"
                )));
            }
            order.push(key);
        }

        Ok(Self {
            batch_id,
            meeting,
            total_count: targets.len(),
            created_at: Utc::now(),
            tasks,
            order,
            by_task_id: HashMap::new(),
        })
    }

    /// Batch ID
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// The meeting being distributed
    pub fn meeting(&self) -> &MeetingRef {
        &self.meeting
    }

    /// Number of device targets, fixed at creation
    pub fn total_count(&self) -> usize {
        self.total_count
    }

    /// When the batch was seeded
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Resolve the provisioning result for the task with this key
    pub fn resolve_create(
        &mut self,
        key: &CorrelationKey,
        result: ProvisionResult,
    ) -> std::result::Result<&TaskRecord, TaskError> {
        let batch_id = self.batch_id;
        let record = self
            .tasks
            .get_mut(key)
            .ok_or_else(|| TaskError::UnknownKey {
                batch_id,
                key: key.clone(),
            })?;

        if let ProvisionResult::Provisioned { task_id } = &result
            && self.by_task_id.contains_key(task_id)
        {
            return Err(TaskError::DuplicateTaskId(task_id.clone()));
        }

        record.resolve(result)?;
        if let Some(task_id) = &record.task_id {
            self.by_task_id.insert(task_id.clone(), key.clone());
        }
        Ok(record)
    }

    /// Merge a progress event into the task; `Ok(false)` when nothing changed
    pub fn update_progress(
        &mut self,
        task_id: &TaskId,
        event: &ProgressEvent,
    ) -> std::result::Result<bool, TaskError> {
        Ok(self.task_mut(task_id)?.apply_progress(event))
    }

    /// Mark the task's transfer completed; `Ok(false)` if it already was
    pub fn mark_completed(&mut self, task_id: &TaskId) -> std::result::Result<bool, TaskError> {
        Ok(self.task_mut(task_id)?.complete())
    }

    pub(crate) fn mark_stalled(
        &mut self,
        task_id: &TaskId,
        reason: String,
    ) -> std::result::Result<(), TaskError> {
        self.task_mut(task_id)?.mark_stalled(reason);
        Ok(())
    }

    pub(crate) fn clear_stall(&mut self, task_id: &TaskId) -> std::result::Result<(), TaskError> {
        self.task_mut(task_id)?.clear_stall();
        Ok(())
    }

    /// Look up a task by its authoritative id
    pub fn task(&self, task_id: &TaskId) -> Option<&TaskRecord> {
        self.by_task_id
            .get(task_id)
            .and_then(|key| self.tasks.get(key))
    }

    /// Look up a task by its correlation key
    pub fn task_by_key(&self, key: &CorrelationKey) -> Option<&TaskRecord> {
        self.tasks.get(key)
    }

    /// Tasks in seeding order
    pub fn tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.order.iter().filter_map(|key| self.tasks.get(key))
    }

    /// Ids of every provisioned task
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.by_task_id.keys()
    }

    /// Owned copy of every task, in seeding order
    pub fn snapshot(&self) -> Vec<TaskRecord> {
        self.tasks().cloned().collect()
    }

    /// Current batch summary
    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_tasks(self.tasks.values())
    }

    fn task_mut(&mut self, task_id: &TaskId) -> std::result::Result<&mut TaskRecord, TaskError> {
        self.by_task_id
            .get(task_id)
            .and_then(|key| self.tasks.get_mut(key))
            .ok_or_else(|| TaskError::UnknownTask(task_id.clone()))
    }
}

/// Every live batch, indexed by batch id and by task id
#[derive(Debug, Default)]
pub struct BatchRegistry {
    batches: HashMap<BatchId, BatchJob>,
    task_index: HashMap<TaskId, BatchId>,
    diagnostics: Diagnostics,
}

impl BatchRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a new batch
    pub fn create_batch(
        &mut self,
        batch_id: BatchId,
        meeting: MeetingRef,
        targets: &[DeviceTarget],
    ) -> Result<&BatchJob> {
        if self.batches.contains_key(&batch_id) {
            return Err(Error::InvalidBatch(format!("batch {batch_id} already exists")));
        }
        let job = BatchJob::create(batch_id, meeting, targets)?;
        Ok(self.batches.entry(batch_id).or_insert(job))
    }

    /// Resolve a task's provisioning result
    ///
    /// A second result for the same task is rejected with `AlreadyResolved` and
    /// counted; the record keeps its first resolution.
    pub fn resolve_create(
        &mut self,
        batch_id: BatchId,
        key: &CorrelationKey,
        result: ProvisionResult,
    ) -> Result<TaskRecord> {
        if let ProvisionResult::Provisioned { task_id } = &result
            && self.task_index.contains_key(task_id)
        {
            return Err(TaskError::DuplicateTaskId(task_id.clone()).into());
        }

        let job = self
            .batches
            .get_mut(&batch_id)
            .ok_or(Error::BatchNotFound(batch_id))?;

        match job.resolve_create(key, result) {
            Ok(record) => {
                let record = record.clone();
                if let Some(task_id) = &record.task_id {
                    self.task_index.insert(task_id.clone(), batch_id);
                }
                Ok(record)
            }
            Err(e @ TaskError::AlreadyResolved { .. }) => {
                self.diagnostics.already_resolved += 1;
                tracing::warn!(
                    batch_id = %batch_id,
                    key = %key,
                    error = %e,
                    "Rejected second creation result for resolved task"
                );
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Merge a progress event into whichever batch owns the task
    ///
    /// Returns the updated record when it changed, `None` when the event was a
    /// no-op or its task is unknown. Unknown tasks are counted, never raised.
    pub fn update_progress(&mut self, task_id: &TaskId, event: &ProgressEvent) -> Option<TaskRecord> {
        let job = self.job_for_task(task_id)?;
        match job.update_progress(task_id, event) {
            Ok(true) => job.task(task_id).cloned(),
            Ok(false) => None,
            Err(_) => {
                self.note_unknown(task_id);
                None
            }
        }
    }

    /// Mark a task's transfer completed
    ///
    /// Returns the owning batch and whether the record changed, or `None` for an
    /// unknown task.
    pub fn mark_completed(&mut self, task_id: &TaskId) -> Option<(BatchId, bool)> {
        let job = self.job_for_task(task_id)?;
        let batch_id = job.batch_id();
        match job.mark_completed(task_id) {
            Ok(changed) => Some((batch_id, changed)),
            Err(_) => {
                self.note_unknown(task_id);
                None
            }
        }
    }

    /// Flag a task as stalled; returns the owning batch
    ///
    /// `None` for unknown tasks and for tasks that already reached a terminal state.
    pub fn mark_stalled(&mut self, task_id: &TaskId, reason: String) -> Option<BatchId> {
        let job = self.job_for_task(task_id)?;
        if job.task(task_id)?.is_terminal() {
            return None;
        }
        let batch_id = job.batch_id();
        job.mark_stalled(task_id, reason).ok()?;
        self.diagnostics.stalled_tasks += 1;
        Some(batch_id)
    }

    /// Clear a task's stall flag
    pub fn clear_stall(&mut self, task_id: &TaskId) -> Result<()> {
        let batch_id = self.locate(task_id).ok_or_else(|| TaskError::UnknownTask(task_id.clone()))?;
        let job = self
            .batches
            .get_mut(&batch_id)
            .ok_or(Error::BatchNotFound(batch_id))?;
        job.clear_stall(task_id)?;
        Ok(())
    }

    /// Count a progress channel that dropped before completion
    pub fn record_stream_drop(&mut self) {
        self.diagnostics.stream_drops += 1;
    }

    /// Remove a batch; later events for its tasks become unknown
    pub fn discard(&mut self, batch_id: BatchId) -> Option<BatchJob> {
        let job = self.batches.remove(&batch_id)?;
        for task_id in job.task_ids() {
            self.task_index.remove(task_id);
        }
        Some(job)
    }

    /// Look up a batch
    pub fn batch(&self, batch_id: BatchId) -> Option<&BatchJob> {
        self.batches.get(&batch_id)
    }

    /// Ids of every live batch
    pub fn batch_ids(&self) -> Vec<BatchId> {
        self.batches.keys().copied().collect()
    }

    /// Batch that owns a task
    pub fn locate(&self, task_id: &TaskId) -> Option<BatchId> {
        self.task_index.get(task_id).copied()
    }

    /// Look up a task in any live batch
    pub fn task(&self, task_id: &TaskId) -> Option<&TaskRecord> {
        let batch_id = self.locate(task_id)?;
        self.batches.get(&batch_id)?.task(task_id)
    }

    /// Diagnostic counters
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    fn job_for_task(&mut self, task_id: &TaskId) -> Option<&mut BatchJob> {
        match self.task_index.get(task_id).copied() {
            Some(batch_id) => self.batches.get_mut(&batch_id),
            None => {
                self.note_unknown(task_id);
                None
            }
        }
    }

    fn note_unknown(&mut self, task_id: &TaskId) {
        self.diagnostics.ignored_events += 1;
        tracing::debug!(task_id = %task_id, "Dropped event for unknown task");
    }
}
