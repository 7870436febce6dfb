//! Batch creation and provisioning fan-out.

use crate::error::{Error, Result};
use crate::registry::BatchJob;
use crate::task::TaskRecord;
use crate::types::{
    BatchId, CorrelationKey, CreateStatus, DeviceTarget, Event, MeetingRef, ProvisionResult,
};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::SyncEngine;

impl SyncEngine {
    /// Seed a batch with one pending task per target
    ///
    /// Performs no I/O: the returned batch exists only locally until its tasks
    /// are resolved through [`resolve_create`](Self::resolve_create) or
    /// provisioned by [`start_batch`](Self::start_batch).
    ///
    /// # Errors
    ///
    /// - `Error::ShuttingDown` after [`shutdown`](Self::shutdown)
    /// - `Error::InvalidBatch` for an empty target list or a repeated device serial
    pub async fn create_batch(&self, meeting: MeetingRef, targets: &[DeviceTarget]) -> Result<BatchId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let batch_id = BatchId::new(self.next_batch_id.fetch_add(1, Ordering::SeqCst) + 1);
        let total_count = {
            let mut registry = self.registry.write().await;
            registry
                .create_batch(batch_id, meeting, targets)?
                .total_count()
        };

        self.batch_tokens
            .lock()
            .await
            .insert(batch_id, self.shutdown_token.child_token());

        tracing::info!(batch_id = %batch_id, total_count, "Batch created");
        self.emit_event(Event::BatchCreated {
            batch_id,
            total_count,
        });
        Ok(batch_id)
    }

    /// Seed a batch and provision every target in the background
    ///
    /// Each target gets one `provision_task` call (at most
    /// `provision_concurrency` in flight). Results feed
    /// [`resolve_create`](Self::resolve_create), so every task that provisions
    /// successfully is subscribed automatically. Progress is reported through
    /// [`subscribe`](Self::subscribe).
    pub async fn start_batch(&self, meeting: MeetingRef, targets: Vec<DeviceTarget>) -> Result<BatchId> {
        let batch_id = self.create_batch(meeting.clone(), &targets).await?;
        let cancel = self
            .batch_tokens
            .lock()
            .await
            .get(&batch_id)
            .cloned()
            .unwrap_or_else(|| self.shutdown_token.child_token());

        for target in targets {
            let engine = self.clone();
            let meeting = meeting.clone();
            let cancel = cancel.clone();
            self.tracker.spawn(async move {
                engine.provision_one(batch_id, meeting, target, cancel).await;
            });
        }

        Ok(batch_id)
    }

    /// Resolve a task's provisioning result
    ///
    /// On success the task is linked to its `TaskId` and subscribed. On failure
    /// the error is recorded on the task; the rest of the batch is unaffected.
    ///
    /// # Errors
    ///
    /// - `TaskError::AlreadyResolved` if the task already has a result (the
    ///   first result is kept)
    /// - `TaskError::UnknownKey` / `Error::BatchNotFound` for a bad address
    pub async fn resolve_create(
        &self,
        batch_id: BatchId,
        key: &CorrelationKey,
        result: ProvisionResult,
    ) -> Result<TaskRecord> {
        let (record, summary) = {
            let mut registry = self.registry.write().await;
            let record = registry.resolve_create(batch_id, key, result)?;
            let summary = registry.batch(batch_id).map(BatchJob::summary);
            (record, summary)
        };

        match (&record.create_status, &record.task_id) {
            (CreateStatus::Success, Some(task_id)) => {
                tracing::info!(
                    batch_id = %batch_id,
                    key = %key,
                    task_id = %task_id,
                    "Task provisioned"
                );
                self.emit_event(Event::TaskProvisioned {
                    batch_id,
                    key: key.clone(),
                    task_id: task_id.clone(),
                });
                if let Err(e) = self.subscribe_task(task_id).await {
                    tracing::warn!(task_id = %task_id, error = %e, "Could not subscribe provisioned task");
                }
            }
            _ => {
                let error = record.create_error.clone().unwrap_or_default();
                tracing::warn!(
                    batch_id = %batch_id,
                    key = %key,
                    error = %error,
                    "Task provisioning failed"
                );
                self.emit_event(Event::ProvisioningFailed {
                    batch_id,
                    key: key.clone(),
                    error,
                });
                if let Some(summary) = summary.filter(|s| s.done) {
                    self.emit_batch_done(batch_id, summary);
                }
            }
        }

        Ok(record)
    }

    async fn provision_one(
        &self,
        batch_id: BatchId,
        meeting: MeetingRef,
        target: DeviceTarget,
        cancel: CancellationToken,
    ) {
        let key = target.correlation_key();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(batch_id = %batch_id, key = %key, "Provisioning abandoned, batch cancelled");
                return;
            }
            outcome = async {
                let _permit = self.provision_limit.acquire().await.ok();
                self.transport.provision_task(&meeting, &target).await
            } => outcome,
        };

        let result = match outcome {
            Ok(task_id) => ProvisionResult::Provisioned { task_id },
            Err(e) => ProvisionResult::Failed {
                error: failure_message(&e),
            },
        };

        if let Err(e) = self.resolve_create(batch_id, &key, result).await {
            tracing::warn!(batch_id = %batch_id, key = %key, error = %e, "Could not record provisioning result");
        }
    }
}

/// Message shown to the operator for a failed provisioning call
fn failure_message(error: &Error) -> String {
    match error {
        Error::Transport { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
