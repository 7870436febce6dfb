//! Shutdown coordination and completion waiting.

use crate::error::{Error, Result};
use crate::types::{BatchId, BatchSummary, Event, SubscriptionState};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use super::SyncEngine;

/// How long shutdown waits for workers to release their channels
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl SyncEngine {
    /// Gracefully shut down the engine
    ///
    /// 1. Stops accepting new batches
    /// 2. Cancels every batch (and with it every subscription and pending
    ///    provisioning call)
    /// 3. Waits up to 30 seconds for workers to release their channels
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Calling it again is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);
        self.shutdown_token.cancel();

        {
            let subscriptions = self.subscriptions.lock().await;
            for (task_id, handle) in subscriptions.iter() {
                self.transition(task_id, &handle.state, SubscriptionState::Closed);
            }
        }

        self.tracker.close();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tracker.wait()).await {
            Ok(()) => tracing::info!("All subscription workers finished"),
            Err(_) => tracing::warn!(
                remaining = self.tracker.len(),
                "Timeout waiting for subscription workers, proceeding with shutdown"
            ),
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Wait until every task in the batch failed provisioning or completed
    ///
    /// Resolves immediately if the batch is already done. A stalled task keeps
    /// the batch open until it is resynced and completes.
    ///
    /// # Errors
    ///
    /// - `Error::BatchNotFound` if the batch does not exist or is discarded while waiting
    /// - `Error::BatchCancelled` if the batch is (or gets) cancelled before it is done
    /// - `Error::ShuttingDown` if the engine shuts down before the batch is done
    pub async fn wait_for_batch(&self, batch_id: BatchId) -> Result<BatchSummary> {
        // Subscribe before checking so a BatchDone emitted in between is not missed
        let mut events = self.subscribe();

        let summary = self.get_batch_summary(batch_id).await?;
        if summary.done {
            return Ok(summary);
        }

        let cancel = self
            .batch_tokens
            .lock()
            .await
            .get(&batch_id)
            .cloned()
            .unwrap_or_else(|| self.shutdown_token.child_token());

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.settle_cancelled(batch_id).await,
                received = events.recv() => received,
            };

            match received {
                Ok(Event::BatchDone {
                    batch_id: done_id,
                    summary,
                }) if done_id == batch_id => return Ok(summary),
                Ok(Event::BatchDiscarded {
                    batch_id: discarded_id,
                }) if discarded_id == batch_id => return Err(Error::BatchNotFound(batch_id)),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(batch_id = %batch_id, skipped, "Event receiver lagged, rechecking batch");
                    let summary = self.get_batch_summary(batch_id).await?;
                    if summary.done {
                        return Ok(summary);
                    }
                }
                Err(RecvError::Closed) => return Err(Error::BatchNotFound(batch_id)),
            }
        }
    }

    /// A batch that finished just before its cancellation still counts as done
    async fn settle_cancelled(&self, batch_id: BatchId) -> Result<BatchSummary> {
        let summary = self.get_batch_summary(batch_id).await?;
        if summary.done {
            return Ok(summary);
        }
        if self.shutdown_token.is_cancelled() {
            Err(Error::ShuttingDown)
        } else {
            Err(Error::BatchCancelled(batch_id))
        }
    }

    pub(crate) fn emit_batch_done(&self, batch_id: BatchId, summary: BatchSummary) {
        tracing::info!(
            batch_id = %batch_id,
            success = summary.success_count,
            failed = summary.failure_count,
            completed = summary.copy_completed_count,
            "Batch done"
        );
        self.emit_event(Event::BatchDone { batch_id, summary });
    }
}
