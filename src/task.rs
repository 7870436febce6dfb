//! Per-device task record and its two-phase state machine
//!
//! A task first resolves its provisioning status (`pending → success | failed`,
//! exactly once), then, if provisioned, moves through the transfer phase
//! (`idle → copying → completed`). Progress merges are idempotent: applying the
//! same [`ProgressEvent`] twice leaves the record as applying it once.

use crate::error::TaskError;
use crate::types::{
    BatchId, CopyStatus, CorrelationKey, CreateStatus, DeviceTarget, MeetingRef, ProgressEvent,
    ProvisionResult, TaskId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot-able state of one device's sync task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Client-local key, valid from the moment the batch is seeded
    pub key: CorrelationKey,
    /// Authoritative id, present once provisioning succeeds
    pub task_id: Option<TaskId>,
    /// Owning batch
    pub batch_id: BatchId,
    /// Meeting identifier
    pub meeting_id: String,
    /// Meeting name
    pub meeting_name: String,
    /// Target device serial
    pub device_serial: String,
    /// Target device name
    pub device_name: String,
    /// Provisioning status
    pub create_status: CreateStatus,
    /// Provisioning error, set only when `create_status` is `Failed`
    pub create_error: Option<String>,
    /// Transfer status, meaningful once provisioned
    pub copy_status: CopyStatus,
    /// Progress percentage (0.0 to 100.0), never decreases
    pub progress_percent: f32,
    /// Bytes copied so far
    pub copied_bytes: u64,
    /// Total bytes to copy
    pub total_bytes: u64,
    /// Last reported speed in bytes per second
    pub speed_bytes: u64,
    /// Last reported estimate of seconds remaining
    pub eta_seconds: Option<u64>,
    /// Most recently touched file
    pub current_file: Option<String>,
    /// The progress channel exhausted its reconnects
    pub stalled: bool,
    /// Last channel error when stalled
    pub stall_reason: Option<String>,
    /// When the placeholder was seeded
    pub created_at: DateTime<Utc>,
    /// When provisioning resolved
    pub resolved_at: Option<DateTime<Utc>>,
    /// When the first progress event was applied
    pub started_at: Option<DateTime<Utc>>,
    /// When the transfer completed
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Seed a pending placeholder for a target
    pub(crate) fn placeholder(batch_id: BatchId, meeting: &MeetingRef, target: &DeviceTarget) -> Self {
        Self {
            key: target.correlation_key(),
            task_id: None,
            batch_id,
            meeting_id: meeting.meeting_id.clone(),
            meeting_name: meeting.meeting_name.clone(),
            device_serial: target.serial.clone(),
            device_name: target.name.clone(),
            create_status: CreateStatus::Pending,
            create_error: None,
            copy_status: CopyStatus::Idle,
            progress_percent: 0.0,
            copied_bytes: 0,
            total_bytes: 0,
            speed_bytes: 0,
            eta_seconds: None,
            current_file: None,
            stalled: false,
            stall_reason: None,
            created_at: Utc::now(),
            resolved_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Resolve the provisioning phase; a second call is rejected
    pub(crate) fn resolve(&mut self, result: ProvisionResult) -> Result<(), TaskError> {
        if self.create_status != CreateStatus::Pending {
            return Err(TaskError::AlreadyResolved {
                key: self.key.clone(),
                status: self.create_status,
            });
        }

        match result {
            ProvisionResult::Provisioned { task_id } => {
                self.task_id = Some(task_id);
                self.create_status = CreateStatus::Success;
            }
            ProvisionResult::Failed { error } => {
                self.create_status = CreateStatus::Failed;
                self.create_error = Some(error);
            }
        }
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    /// Merge a progress event; returns whether the record changed
    ///
    /// Ignored unless the task is provisioned and its transfer has not completed.
    pub(crate) fn apply_progress(&mut self, event: &ProgressEvent) -> bool {
        if self.create_status != CreateStatus::Success
            || self.copy_status == CopyStatus::Completed
        {
            return false;
        }

        let before = self.clone();

        if self.copy_status == CopyStatus::Idle {
            self.copy_status = CopyStatus::Copying;
            self.started_at.get_or_insert_with(Utc::now);
        }

        if let Some(percent) = event.progress_percent.filter(|p| p.is_finite()) {
            self.progress_percent = self.progress_percent.max(percent.clamp(0.0, 100.0));
        }
        if let Some(copied) = event.copied_bytes {
            self.copied_bytes = copied;
        }
        if let Some(total) = event.total_bytes {
            self.total_bytes = total;
        }
        if let Some(speed) = event.speed_bytes {
            self.speed_bytes = speed;
        }
        if let Some(eta) = event.eta_seconds {
            self.eta_seconds = Some(eta);
        }
        if let Some(file) = &event.current_file {
            self.current_file = Some(file.clone());
        }

        *self != before
    }

    /// Authoritative completion; returns false if already completed
    pub(crate) fn complete(&mut self) -> bool {
        if self.create_status != CreateStatus::Success
            || self.copy_status == CopyStatus::Completed
        {
            return false;
        }

        self.copy_status = CopyStatus::Completed;
        self.progress_percent = 100.0;
        self.eta_seconds = Some(0);
        if self.total_bytes > 0 {
            self.copied_bytes = self.total_bytes;
        }
        self.stalled = false;
        self.stall_reason = None;
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        true
    }

    pub(crate) fn mark_stalled(&mut self, reason: String) {
        if !self.is_terminal() {
            self.stalled = true;
            self.stall_reason = Some(reason);
        }
    }

    pub(crate) fn clear_stall(&mut self) {
        self.stalled = false;
        self.stall_reason = None;
    }

    /// Provisioning failed or the transfer completed
    pub fn is_terminal(&self) -> bool {
        self.create_status == CreateStatus::Failed || self.copy_status == CopyStatus::Completed
    }
}
