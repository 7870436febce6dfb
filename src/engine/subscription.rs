//! Progress subscriptions.
//!
//! Each provisioned task gets at most one live subscription, run as a tracked
//! worker task. The worker opens the task's progress channel (with bounded
//! backoff), folds every event into the task record, reconnects when the
//! channel drops, and releases each channel it opened exactly once, whichever
//! way the subscription ends.

use crate::error::{Error, Result, TaskError};
use crate::registry::BatchJob;
use crate::retry::{backoff_delay, with_retry};
use crate::transport::{ProgressChannel, SyncTransport};
use crate::types::{BatchId, ChannelEvent, CopyStatus, Event, ProgressEvent, SubscriptionState, TaskId};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::SyncEngine;

/// Entry in the subscription handle table
#[derive(Clone)]
pub(crate) struct SubscriptionHandle {
    /// Batch the task belongs to
    pub(crate) batch_id: BatchId,
    /// Current state, written by the worker and by cancellation
    pub(crate) state: Arc<watch::Sender<SubscriptionState>>,
    /// Child of the batch's cancellation scope
    pub(crate) cancel: CancellationToken,
}

/// An open progress channel that must be handed back to the transport
struct ChannelLease {
    transport: Arc<dyn SyncTransport>,
    task_id: TaskId,
    channel: ProgressChannel,
}

impl ChannelLease {
    /// Close the channel; consuming `self` makes a second release impossible
    async fn release(self) {
        let ChannelLease {
            transport,
            task_id,
            channel,
        } = self;
        drop(channel);
        transport.close_progress_channel(&task_id).await;
        tracing::debug!(task_id = %task_id, "Released progress channel");
    }
}

/// How one opened channel ended
enum PumpOutcome {
    Completed,
    Cancelled,
    Dropped(Error),
}

/// How far a transfer has got, for telling a productive channel from a replay
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
struct ProgressMark {
    percent: f32,
    copied_bytes: u64,
}

impl SyncEngine {
    /// Open a progress subscription for a provisioned task
    ///
    /// Returns `Ok(true)` if a new subscription was started. A task that already
    /// has a subscription (live or closed), has completed, or whose batch was
    /// cancelled is left alone and yields `Ok(false)`.
    ///
    /// # Errors
    ///
    /// `TaskError::UnknownTask` if no live batch owns `task_id`.
    pub async fn subscribe_task(&self, task_id: &TaskId) -> Result<bool> {
        let (batch_id, completed) = {
            let registry = self.registry.read().await;
            let record = registry
                .task(task_id)
                .ok_or_else(|| TaskError::UnknownTask(task_id.clone()))?;
            (record.batch_id, record.copy_status == CopyStatus::Completed)
        };
        if completed {
            return Ok(false);
        }

        let batch_token = self.batch_tokens.lock().await.get(&batch_id).cloned();
        let Some(batch_token) = batch_token.filter(|token| !token.is_cancelled()) else {
            tracing::debug!(task_id = %task_id, batch_id = %batch_id, "Batch cancelled, not subscribing");
            return Ok(false);
        };

        let handle = {
            let mut subscriptions = self.subscriptions.lock().await;
            if subscriptions.contains_key(task_id) {
                tracing::debug!(task_id = %task_id, "Subscription already exists");
                return Ok(false);
            }
            let (state_tx, _state_rx) = watch::channel(SubscriptionState::Unsubscribed);
            let handle = SubscriptionHandle {
                batch_id,
                state: Arc::new(state_tx),
                cancel: batch_token.child_token(),
            };
            subscriptions.insert(task_id.clone(), handle.clone());
            handle
        };

        let engine = self.clone();
        let task_id = task_id.clone();
        self.tracker.spawn(async move {
            engine.run_subscription(task_id, handle).await;
        });
        Ok(true)
    }

    /// Move a subscription to `next`, emitting an event if it changed
    ///
    /// `Closed` is terminal: once there, further transitions are ignored.
    pub(crate) fn transition(
        &self,
        task_id: &TaskId,
        state: &watch::Sender<SubscriptionState>,
        next: SubscriptionState,
    ) -> bool {
        let changed = state.send_if_modified(|current| {
            if *current == SubscriptionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            self.emit_event(Event::SubscriptionChanged {
                task_id: task_id.clone(),
                state: next,
            });
        }
        changed
    }

    async fn run_subscription(self, task_id: TaskId, handle: SubscriptionHandle) {
        let SubscriptionHandle { state, cancel, .. } = handle;
        // Consecutive drops without the transfer advancing
        let mut drops: u32 = 0;
        let mut mark = self.progress_mark(&task_id).await;

        loop {
            self.transition(&task_id, &state, SubscriptionState::Subscribing);

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                opened = with_retry(&self.config.retry, || {
                    self.transport.open_progress_channel(&task_id)
                }) => opened,
            };

            let channel = match opened {
                Ok(channel) => channel,
                Err(e) => {
                    self.stall(&task_id, e.to_string()).await;
                    return;
                }
            };

            let mut lease = ChannelLease {
                transport: self.transport.clone(),
                task_id: task_id.clone(),
                channel,
            };
            self.transition(&task_id, &state, SubscriptionState::Subscribed);

            let outcome = self.pump(&task_id, &mut lease.channel, &cancel).await;
            lease.release().await;

            let error = match outcome {
                PumpOutcome::Completed | PumpOutcome::Cancelled => break,
                PumpOutcome::Dropped(error) => error,
            };

            // A channel that only replays known state does not earn a fresh budget
            let current = self.progress_mark(&task_id).await;
            if current > mark {
                drops = 0;
                mark = current;
            }
            drops += 1;
            self.registry.write().await.record_stream_drop();

            if drops > self.config.subscription.max_reconnects {
                self.stall(&task_id, error.to_string()).await;
                return;
            }

            let delay = backoff_delay(&self.config.retry, drops);
            tracing::warn!(
                task_id = %task_id,
                attempt = drops,
                max_reconnects = self.config.subscription.max_reconnects,
                delay_ms = delay.as_millis(),
                error = %error,
                "Progress channel dropped, reconnecting"
            );
            self.emit_event(Event::StreamDropped {
                task_id: task_id.clone(),
                attempt: drops,
                error: error.to_string(),
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.transition(&task_id, &state, SubscriptionState::Closed);
    }

    async fn pump(
        &self,
        task_id: &TaskId,
        channel: &mut ProgressChannel,
        cancel: &CancellationToken,
    ) -> PumpOutcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PumpOutcome::Cancelled,
                next = self.next_event(task_id, channel) => next,
            };

            match next {
                Ok(ChannelEvent::Progress(event)) => {
                    self.update_progress(task_id, &event).await;
                }
                Ok(ChannelEvent::Completed) => {
                    self.mark_completed(task_id).await;
                    return PumpOutcome::Completed;
                }
                Err(error) => return PumpOutcome::Dropped(error),
            }
        }
    }

    async fn progress_mark(&self, task_id: &TaskId) -> Option<ProgressMark> {
        self.registry
            .read()
            .await
            .task(task_id)
            .map(|record| ProgressMark {
                percent: record.progress_percent,
                copied_bytes: record.copied_bytes,
            })
    }

    async fn next_event(&self, task_id: &TaskId, channel: &mut ProgressChannel) -> Result<ChannelEvent> {
        let next = match self.config.subscription.idle_timeout {
            Some(idle) => tokio::time::timeout(idle, channel.next())
                .await
                .map_err(|_| Error::ChannelIdle {
                    task_id: task_id.clone(),
                    idle_secs: idle.as_secs(),
                })?,
            None => channel.next().await,
        };
        next.unwrap_or_else(|| {
            Err(Error::ChannelClosed {
                task_id: task_id.clone(),
            })
        })
    }

    /// Merge a progress event into a task
    ///
    /// Subscription workers route every channel event through here; hosts that
    /// read progress themselves can call it directly. Returns true if the record
    /// changed. Events for unknown tasks (for example after the batch was
    /// discarded) are dropped and counted in [`Diagnostics::ignored_events`].
    ///
    /// [`Diagnostics::ignored_events`]: crate::types::Diagnostics::ignored_events
    pub async fn update_progress(&self, task_id: &TaskId, event: &ProgressEvent) -> bool {
        let updated = self.registry.write().await.update_progress(task_id, event);
        let Some(record) = updated else {
            return false;
        };

        tracing::debug!(
            task_id = %task_id,
            percent = record.progress_percent,
            copied_bytes = record.copied_bytes,
            "Progress"
        );
        self.emit_event(Event::TaskProgress {
            batch_id: record.batch_id,
            task_id: task_id.clone(),
            percent: record.progress_percent,
            speed_bytes: record.speed_bytes,
            eta_seconds: record.eta_seconds,
        });
        true
    }

    /// Record a task's transfer as completed
    ///
    /// Percent is forced to 100 regardless of the last progress event. Returns
    /// true on the first completion; repeats and unknown tasks return false, and
    /// unknown tasks are counted as ignored events.
    pub async fn mark_completed(&self, task_id: &TaskId) -> bool {
        let completed = {
            let mut registry = self.registry.write().await;
            registry.mark_completed(task_id).map(|(batch_id, changed)| {
                let summary = registry.batch(batch_id).map(BatchJob::summary);
                (batch_id, changed, summary)
            })
        };

        let Some((batch_id, true, summary)) = completed else {
            return false;
        };

        tracing::info!(batch_id = %batch_id, task_id = %task_id, "Transfer completed");
        self.emit_event(Event::TaskCompleted {
            batch_id,
            task_id: task_id.clone(),
        });
        if let Some(summary) = summary.filter(|s| s.done) {
            self.emit_batch_done(batch_id, summary);
        }
        true
    }

    async fn stall(&self, task_id: &TaskId, reason: String) {
        let stalled = self
            .registry
            .write()
            .await
            .mark_stalled(task_id, reason.clone());

        if let Some(batch_id) = stalled {
            tracing::warn!(
                batch_id = %batch_id,
                task_id = %task_id,
                reason = %reason,
                "Progress channel exhausted reconnects, task stalled"
            );
            self.emit_event(Event::TaskStalled {
                batch_id,
                task_id: task_id.clone(),
                reason,
            });
        }
    }
}
