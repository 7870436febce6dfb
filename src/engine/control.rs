//! Subscription control: cancel, discard, resync.
//!
//! Cancellation never waits on the network: it flips the cancellation token
//! and marks the subscription closed, and the worker releases its channel in
//! the background. Every operation here is safe to repeat.

use crate::error::{Result, TaskError};
use crate::types::{BatchId, CopyStatus, Event, SubscriptionState, TaskId};

use super::SyncEngine;

impl SyncEngine {
    /// Cancel one task's subscription
    ///
    /// Returns true if a live subscription was torn down. Unknown tasks and
    /// tasks whose subscription already closed are a no-op.
    pub async fn cancel_task(&self, task_id: &TaskId) -> bool {
        let subscriptions = self.subscriptions.lock().await;
        let Some(handle) = subscriptions.get(task_id) else {
            return false;
        };
        handle.cancel.cancel();
        let closed = self.transition(task_id, &handle.state, SubscriptionState::Closed);
        if closed {
            tracing::info!(task_id = %task_id, "Subscription cancelled");
        }
        closed
    }

    /// Cancel every subscription in a batch
    ///
    /// Pending provisioning calls are abandoned and no new subscriptions start
    /// for the batch. Returns true on the first cancellation of a live batch;
    /// repeated calls and unknown batches are a no-op.
    pub async fn cancel_batch(&self, batch_id: BatchId) -> bool {
        {
            let batch_tokens = self.batch_tokens.lock().await;
            match batch_tokens.get(&batch_id) {
                Some(token) if !token.is_cancelled() => token.cancel(),
                _ => return false,
            }
        }

        let subscriptions = self.subscriptions.lock().await;
        for (task_id, handle) in subscriptions.iter().filter(|(_, h)| h.batch_id == batch_id) {
            self.transition(task_id, &handle.state, SubscriptionState::Closed);
        }
        drop(subscriptions);

        tracing::info!(batch_id = %batch_id, "Batch cancelled");
        self.emit_event(Event::BatchCancelled { batch_id });
        true
    }

    /// Cancel a batch and drop it from the registry
    ///
    /// Events that arrive later for its tasks are counted as ignored. Returns
    /// true if the batch existed.
    pub async fn discard_batch(&self, batch_id: BatchId) -> bool {
        self.cancel_batch(batch_id).await;

        let removed = self.registry.write().await.discard(batch_id);
        self.batch_tokens.lock().await.remove(&batch_id);
        self.subscriptions
            .lock()
            .await
            .retain(|_, handle| handle.batch_id != batch_id);

        if removed.is_none() {
            return false;
        }
        tracing::info!(batch_id = %batch_id, "Batch discarded");
        self.emit_event(Event::BatchDiscarded { batch_id });
        true
    }

    /// Start a fresh subscription for one device
    ///
    /// Intended for stalled or cancelled tasks: clears the stall flag and opens
    /// a new channel while keeping the progress already recorded. A task whose
    /// subscription is still healthy is left alone.
    ///
    /// # Errors
    ///
    /// - `TaskError::UnknownTask` if no live batch owns `task_id`
    /// - `TaskError::InvalidTransition` if the transfer already completed or the
    ///   batch was cancelled
    pub async fn resync_task(&self, task_id: &TaskId) -> Result<()> {
        let record = self.get_task(task_id).await?;
        if record.copy_status == CopyStatus::Completed {
            return Err(TaskError::InvalidTransition {
                task_id: task_id.clone(),
                operation: "resync".to_string(),
                reason: "transfer already completed".to_string(),
            }
            .into());
        }

        let batch_live = self
            .batch_tokens
            .lock()
            .await
            .get(&record.batch_id)
            .is_some_and(|token| !token.is_cancelled());
        if !batch_live {
            return Err(TaskError::InvalidTransition {
                task_id: task_id.clone(),
                operation: "resync".to_string(),
                reason: format!("batch {} was cancelled", record.batch_id),
            }
            .into());
        }

        {
            let mut subscriptions = self.subscriptions.lock().await;
            if let Some(handle) = subscriptions.get(task_id) {
                let state = *handle.state.borrow();
                let healthy = matches!(
                    state,
                    SubscriptionState::Subscribing | SubscriptionState::Subscribed
                );
                if healthy && !record.stalled {
                    tracing::debug!(task_id = %task_id, "Subscription healthy, resync skipped");
                    return Ok(());
                }
                handle.cancel.cancel();
            }
            subscriptions.remove(task_id);
        }

        self.registry.write().await.clear_stall(task_id)?;
        tracing::info!(
            task_id = %task_id,
            percent = record.progress_percent,
            "Resyncing task"
        );
        self.subscribe_task(task_id).await?;
        Ok(())
    }
}
