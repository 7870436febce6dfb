//! Core types for meeting-sync

use serde::{Deserialize, Serialize};

/// Identifier of a batch, assigned by the engine when the batch is created
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl BatchId {
    /// Create a new BatchId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for BatchId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BatchId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Authoritative task identifier returned by the provisioning call
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-local key that addresses a task before its [`TaskId`] is known
///
/// Derived from the target device serial, so it is unique within a batch.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(pub String);

impl CorrelationKey {
    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The meeting whose materials are being distributed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRef {
    /// Meeting identifier
    pub meeting_id: String,
    /// Human-readable meeting name
    pub meeting_name: String,
}

impl MeetingRef {
    /// Create a new meeting reference
    pub fn new(meeting_id: impl Into<String>, meeting_name: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            meeting_name: meeting_name.into(),
        }
    }
}

/// A device that should receive the meeting package
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTarget {
    /// Device serial number (unique per device)
    pub serial: String,
    /// Display name of the device
    pub name: String,
}

impl DeviceTarget {
    /// Create a new device target
    pub fn new(serial: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            name: name.into(),
        }
    }

    /// The correlation key used for this target before provisioning resolves
    pub fn correlation_key(&self) -> CorrelationKey {
        CorrelationKey(self.serial.clone())
    }
}

/// Provisioning (creation) status of a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateStatus {
    /// Waiting for the provisioning call to return
    #[default]
    Pending,
    /// Provisioned, a task id was assigned
    Success,
    /// Provisioning failed
    Failed,
}

/// Transfer (copy) status of a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStatus {
    /// No progress observed yet
    #[default]
    Idle,
    /// Progress events are arriving
    Copying,
    /// Transfer finished
    Completed,
}

/// Outcome of a provisioning call, fed into `resolve_create`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProvisionResult {
    /// The device accepted the task
    Provisioned {
        /// Authoritative task id
        task_id: TaskId,
    },
    /// The device rejected the task
    Failed {
        /// Error message reported by the device
        error: String,
    },
}

/// A progress update from a task's progress channel
///
/// Every field is optional; absent fields leave the record untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Progress percentage (0.0 to 100.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f32>,
    /// Bytes copied so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied_bytes: Option<u64>,
    /// Total bytes to copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    /// Instantaneous speed in bytes per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_bytes: Option<u64>,
    /// Estimated seconds remaining
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    /// Most recently touched file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
}

impl ProgressEvent {
    /// A progress event carrying only a percentage
    pub fn percent(progress_percent: f32) -> Self {
        Self {
            progress_percent: Some(progress_percent),
            ..Default::default()
        }
    }
}

/// An item delivered by a progress channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Intermediate progress
    Progress(ProgressEvent),
    /// Transfer finished
    Completed,
}

/// Lifecycle of a task's progress subscription
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No subscription was ever opened
    #[default]
    Unsubscribed,
    /// Opening (or re-opening) the progress channel
    Subscribing,
    /// Channel open, events flowing
    Subscribed,
    /// Torn down; terminal
    Closed,
}

/// Event emitted to observers during a batch's lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A batch was seeded with one pending task per target
    BatchCreated {
        /// Batch ID
        batch_id: BatchId,
        /// Number of device targets
        total_count: usize,
    },

    /// A task was provisioned and received its task id
    TaskProvisioned {
        /// Batch ID
        batch_id: BatchId,
        /// Client-local correlation key
        key: CorrelationKey,
        /// Authoritative task id
        task_id: TaskId,
    },

    /// A task failed provisioning
    ProvisioningFailed {
        /// Batch ID
        batch_id: BatchId,
        /// Client-local correlation key
        key: CorrelationKey,
        /// Error reported by the device
        error: String,
    },

    /// A task's subscription changed state
    SubscriptionChanged {
        /// Task ID
        task_id: TaskId,
        /// New subscription state
        state: SubscriptionState,
    },

    /// A task reported progress
    TaskProgress {
        /// Batch ID
        batch_id: BatchId,
        /// Task ID
        task_id: TaskId,
        /// Progress percentage after the merge (0.0 to 100.0)
        percent: f32,
        /// Current speed in bytes per second
        speed_bytes: u64,
        /// Estimated seconds remaining
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
    },

    /// A task's transfer completed
    TaskCompleted {
        /// Batch ID
        batch_id: BatchId,
        /// Task ID
        task_id: TaskId,
    },

    /// A task's progress channel dropped and will be reopened
    StreamDropped {
        /// Task ID
        task_id: TaskId,
        /// Reconnect attempt number (1-based)
        attempt: u32,
        /// Why the channel dropped
        error: String,
    },

    /// A task exhausted its reconnect attempts
    TaskStalled {
        /// Batch ID
        batch_id: BatchId,
        /// Task ID
        task_id: TaskId,
        /// Last error observed on the channel
        reason: String,
    },

    /// Every task in the batch reached a terminal state
    BatchDone {
        /// Batch ID
        batch_id: BatchId,
        /// Final summary
        summary: BatchSummary,
    },

    /// The batch's subscriptions were cancelled
    BatchCancelled {
        /// Batch ID
        batch_id: BatchId,
    },

    /// The batch was discarded from the registry
    BatchDiscarded {
        /// Batch ID
        batch_id: BatchId,
    },

    /// The engine is shutting down
    Shutdown,
}

/// Batch-level summary derived from the task records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of device targets
    pub total_count: usize,
    /// Tasks whose provisioning resolved (success or failure)
    pub created_count: usize,
    /// Tasks provisioned successfully
    pub success_count: usize,
    /// Tasks that failed provisioning
    pub failure_count: usize,
    /// Tasks whose transfer completed
    pub copy_completed_count: usize,
    /// Tasks whose progress channel stalled
    pub stalled_count: usize,
    /// Every task failed provisioning or completed its transfer
    pub done: bool,
}

/// Engine diagnostic counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Progress or completion events dropped because their task was unknown
    pub ignored_events: u64,
    /// Creation results rejected because the task was already resolved
    pub already_resolved: u64,
    /// Progress channels that dropped before completion
    pub stream_drops: u64,
    /// Tasks that exhausted their reconnect attempts
    pub stalled_tasks: u64,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_key_is_device_serial() {
        let target = DeviceTarget::new("SN-001", "Boardroom tablet");
        assert_eq!(target.correlation_key(), CorrelationKey::from("SN-001"));
    }

    #[test]
    fn progress_event_deserializes_partial_payload() {
        let event: ProgressEvent =
            serde_json::from_str(r#"{"progress_percent": 42.5, "current_file": "agenda.pdf"}"#)
                .unwrap();
        assert_eq!(event.progress_percent, Some(42.5));
        assert_eq!(event.current_file.as_deref(), Some("agenda.pdf"));
        assert!(event.copied_bytes.is_none());
    }

    #[test]
    fn channel_event_is_tagged() {
        let json = serde_json::to_value(ChannelEvent::Completed).unwrap();
        assert_eq!(json["type"], "completed");
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(CreateStatus::Failed).unwrap(),
            serde_json::json!("failed")
        );
        assert_eq!(
            serde_json::to_value(CopyStatus::Copying).unwrap(),
            serde_json::json!("copying")
        );
    }

    #[test]
    fn batch_id_round_trips_through_display() {
        let id = BatchId::new(17);
        assert_eq!(id.to_string().parse::<BatchId>().unwrap(), id);
    }
}
