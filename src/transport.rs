//! Transport seam
//!
//! The engine tracks the state of a transfer but never moves bytes itself. The
//! host plugs in a [`SyncTransport`] that provisions tasks on devices and opens
//! per-task progress channels; the engine consumes what it reports.

use crate::error::Result;
use crate::types::{ChannelEvent, DeviceTarget, MeetingRef, TaskId};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A push source of progress events for one task
///
/// An `Err` item means the channel broke; the engine closes it and reconnects.
/// The stream ending without [`ChannelEvent::Completed`] is treated the same way.
pub type ProgressChannel = BoxStream<'static, Result<ChannelEvent>>;

/// Collaborator that provisions tasks and streams their progress
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use futures::stream::{self, StreamExt};
/// use meeting_sync::transport::{ProgressChannel, SyncTransport};
/// use meeting_sync::types::{ChannelEvent, DeviceTarget, MeetingRef, TaskId};
///
/// struct InstantTransport;
///
/// #[async_trait]
/// impl SyncTransport for InstantTransport {
///     async fn provision_task(
///         &self,
///         meeting: &MeetingRef,
///         target: &DeviceTarget,
///     ) -> meeting_sync::Result<TaskId> {
///         Ok(TaskId::new(format!("{}-{}", meeting.meeting_id, target.serial)))
///     }
///
///     async fn open_progress_channel(
///         &self,
///         _task_id: &TaskId,
///     ) -> meeting_sync::Result<ProgressChannel> {
///         Ok(stream::iter(vec![Ok(ChannelEvent::Completed)]).boxed())
///     }
///
///     async fn close_progress_channel(&self, _task_id: &TaskId) {}
/// }
/// ```
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Allocate a transfer job for a device and return its task id
    ///
    /// An error here resolves the task's creation status to failed with the
    /// error's message.
    async fn provision_task(&self, meeting: &MeetingRef, target: &DeviceTarget) -> Result<TaskId>;

    /// Open the progress channel for a provisioned task
    ///
    /// Failures classified as retryable (see [`IsRetryable`](crate::retry::IsRetryable))
    /// are retried with backoff.
    async fn open_progress_channel(&self, task_id: &TaskId) -> Result<ProgressChannel>;

    /// Release the resources behind a channel returned by `open_progress_channel`
    ///
    /// Called exactly once for every channel that was opened.
    async fn close_progress_channel(&self, task_id: &TaskId);
}
