//! Playback transport: replays pre-recorded channel sessions per device

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use meeting_sync::{
    ChannelEvent, DeviceTarget, Error, MeetingRef, ProgressChannel, ProgressEvent, Result,
    SyncTransport, TaskId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One opened channel's worth of items, delivered with a small gap between them
pub type Session = Vec<Result<ChannelEvent>>;

/// Transport that provisions `task-{serial}` and replays sessions on each open
///
/// A session that runs out without `Completed` ends the stream, which the
/// engine treats as a dropped channel and reconnects.
#[derive(Default)]
pub struct PlaybackTransport {
    failures: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashMap<TaskId, VecDeque<Session>>>,
    opens: Mutex<HashMap<TaskId, u32>>,
    closes: Mutex<HashMap<TaskId, u32>>,
}

impl PlaybackTransport {
    pub fn fail(&self, serial: &str, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(serial.to_string(), error.to_string());
    }

    /// Queue a session for the next open of `serial`'s channel
    pub fn session(&self, serial: &str, items: Session) {
        self.sessions
            .lock()
            .unwrap()
            .entry(task_id(serial))
            .or_default()
            .push_back(items);
    }

    pub fn opens(&self, serial: &str) -> u32 {
        self.opens.lock().unwrap().get(&task_id(serial)).copied().unwrap_or(0)
    }

    pub fn closes(&self, serial: &str) -> u32 {
        self.closes.lock().unwrap().get(&task_id(serial)).copied().unwrap_or(0)
    }
}

pub fn task_id(serial: &str) -> TaskId {
    TaskId::new(format!("task-{serial}"))
}

pub fn percent(value: f32) -> Result<ChannelEvent> {
    Ok(ChannelEvent::Progress(ProgressEvent::percent(value)))
}

pub fn completed() -> Result<ChannelEvent> {
    Ok(ChannelEvent::Completed)
}

pub fn broken(message: &str) -> Result<ChannelEvent> {
    Err(Error::transient(message))
}

#[async_trait]
impl SyncTransport for PlaybackTransport {
    async fn provision_task(&self, _meeting: &MeetingRef, target: &DeviceTarget) -> Result<TaskId> {
        let failure = self.failures.lock().unwrap().get(&target.serial).cloned();
        match failure {
            Some(error) => Err(Error::permanent(error)),
            None => Ok(task_id(&target.serial)),
        }
    }

    async fn open_progress_channel(&self, task_id: &TaskId) -> Result<ProgressChannel> {
        *self.opens.lock().unwrap().entry(task_id.clone()).or_default() += 1;

        // A device with nothing left to replay stays silent
        let items = self
            .sessions
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(VecDeque::pop_front);

        Ok(match items {
            Some(items) => stream::iter(items)
                .then(|item| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    item
                })
                .boxed(),
            None => stream::pending::<Result<ChannelEvent>>().boxed(),
        })
    }

    async fn close_progress_channel(&self, task_id: &TaskId) {
        *self.closes.lock().unwrap().entry(task_id.clone()).or_default() += 1;
    }
}
