//! Shared test helpers: a scripted transport and engine constructors.

use crate::config::{Config, RetryConfig, SubscriptionConfig};
use crate::engine::SyncEngine;
use crate::error::{Error, Result};
use crate::task::TaskRecord;
use crate::transport::{ProgressChannel, SyncTransport};
use crate::types::{ChannelEvent, DeviceTarget, Event, MeetingRef, ProgressEvent, TaskId};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Upper bound for any single wait in a test
const WAIT: Duration = Duration::from_secs(5);

pub(crate) type EventSender = mpsc::UnboundedSender<Result<ChannelEvent>>;

#[derive(Default)]
struct Script {
    provision_failures: HashMap<String, String>,
    provision_delay: Option<Duration>,
    open_failures: HashMap<TaskId, u32>,
    replays: HashMap<TaskId, (Vec<ChannelEvent>, String)>,
    channels: HashMap<TaskId, Vec<Option<EventSender>>>,
    provision_calls: u32,
    opens: HashMap<TaskId, u32>,
    closes: HashMap<TaskId, u32>,
}

/// Transport driven entirely by the test
///
/// Provisioning assigns `task-{serial}` unless told to fail. Each opened
/// progress channel is backed by an unbounded mpsc channel whose sender the
/// test retrieves with [`ScriptedTransport::sender_for`].
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Provisioning for `serial` fails with `error`
    pub(crate) fn fail_provision(&self, serial: &str, error: &str) {
        self.script
            .lock()
            .unwrap()
            .provision_failures
            .insert(serial.to_string(), error.to_string());
    }

    /// Every provisioning call sleeps for `delay` first
    pub(crate) fn delay_provisioning(&self, delay: Duration) {
        self.script.lock().unwrap().provision_delay = Some(delay);
    }

    /// The next `count` opens for `task_id` fail with a transient error
    pub(crate) fn fail_opens(&self, task_id: &TaskId, count: u32) {
        self.script
            .lock()
            .unwrap()
            .open_failures
            .insert(task_id.clone(), count);
    }

    /// Every channel opened for `task_id` delivers `events`, then fails with `error`
    pub(crate) fn replay_then_fail(&self, task_id: &TaskId, events: Vec<ChannelEvent>, error: &str) {
        self.script
            .lock()
            .unwrap()
            .replays
            .insert(task_id.clone(), (events, error.to_string()));
    }

    pub(crate) fn provision_calls(&self) -> u32 {
        self.script.lock().unwrap().provision_calls
    }

    pub(crate) fn opens(&self, task_id: &TaskId) -> u32 {
        self.script.lock().unwrap().opens.get(task_id).copied().unwrap_or(0)
    }

    pub(crate) fn closes(&self, task_id: &TaskId) -> u32 {
        self.script.lock().unwrap().closes.get(task_id).copied().unwrap_or(0)
    }

    /// Drop the transport's side of every channel opened for `task_id`
    ///
    /// The stream ends once the test drops its own senders too.
    pub(crate) fn hang_up(&self, task_id: &TaskId) {
        if let Some(senders) = self.script.lock().unwrap().channels.get_mut(task_id) {
            senders.iter_mut().for_each(|sender| *sender = None);
        }
    }

    /// Sender feeding the `nth` (zero-based) channel opened for `task_id`
    ///
    /// Waits until that channel has been opened.
    pub(crate) async fn sender_for(&self, task_id: &TaskId, nth: usize) -> EventSender {
        let found = tokio::time::timeout(WAIT, async {
            loop {
                let sender = self
                    .script
                    .lock()
                    .unwrap()
                    .channels
                    .get(task_id)
                    .and_then(|senders| senders.get(nth).cloned());
                match sender {
                    Some(Some(sender)) => return sender,
                    Some(None) => panic!("channel {nth} for {task_id} was hung up"),
                    None => {}
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        found.unwrap_or_else(|_| panic!("channel {nth} for {task_id} was never opened"))
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    async fn provision_task(&self, _meeting: &MeetingRef, target: &DeviceTarget) -> Result<TaskId> {
        let (failure, delay) = {
            let mut script = self.script.lock().unwrap();
            script.provision_calls += 1;
            (
                script.provision_failures.get(&target.serial).cloned(),
                script.provision_delay,
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(Error::permanent(error)),
            None => Ok(task_id_of(&target.serial)),
        }
    }

    async fn open_progress_channel(&self, task_id: &TaskId) -> Result<ProgressChannel> {
        let mut script = self.script.lock().unwrap();
        *script.opens.entry(task_id.clone()).or_default() += 1;

        if let Some(remaining) = script.open_failures.get_mut(task_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(Error::transient("device unreachable"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some((events, error)) = script.replays.get(task_id) {
            for event in events {
                let _ = tx.send(Ok(event.clone()));
            }
            let _ = tx.send(Err(Error::transient(error.clone())));
        }
        script.channels.entry(task_id.clone()).or_default().push(Some(tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn close_progress_channel(&self, task_id: &TaskId) {
        *self
            .script
            .lock()
            .unwrap()
            .closes
            .entry(task_id.clone())
            .or_default() += 1;
    }
}

/// The task id [`ScriptedTransport`] assigns to a device serial
pub(crate) fn task_id_of(serial: &str) -> TaskId {
    TaskId::new(format!("task-{serial}"))
}

pub(crate) fn meeting() -> MeetingRef {
    MeetingRef::new("m-100", "Quarterly review")
}

pub(crate) fn targets(serials: &[&str]) -> Vec<DeviceTarget> {
    serials
        .iter()
        .map(|serial| DeviceTarget::new(*serial, format!("Room {serial}")))
        .collect()
}

/// Config with short, deterministic retry delays
pub(crate) fn fast_config() -> Config {
    Config {
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        subscription: SubscriptionConfig {
            max_reconnects: 3,
            idle_timeout: None,
            provision_concurrency: 4,
        },
        ..Default::default()
    }
}

pub(crate) fn create_test_engine(transport: Arc<ScriptedTransport>) -> SyncEngine {
    SyncEngine::new(fast_config(), transport).unwrap()
}

pub(crate) fn progress(tx: &EventSender, percent: f32) {
    tx.send(Ok(ChannelEvent::Progress(ProgressEvent::percent(percent))))
        .unwrap();
}

pub(crate) fn complete(tx: &EventSender) {
    tx.send(Ok(ChannelEvent::Completed)).unwrap();
}

/// Receive events until one matches, failing the test after a bounded wait
pub(crate) async fn wait_for_event(
    rx: &mut broadcast::Receiver<Event>,
    mut matches: impl FnMut(&Event) -> bool,
) -> Event {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll a task until its record satisfies `predicate`
pub(crate) async fn wait_for_task(
    engine: &SyncEngine,
    task_id: &TaskId,
    mut predicate: impl FnMut(&TaskRecord) -> bool,
) -> TaskRecord {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(record) = engine.get_task(task_id).await
                && predicate(&record)
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for task state")
}
