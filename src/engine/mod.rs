//! Sync engine split into focused submodules.
//!
//! The `SyncEngine` struct and its methods are organized by concern:
//! - [`provision`] - Batch creation and provisioning fan-out
//! - [`subscription`] - Per-task progress subscriptions (handle table and workers)
//! - [`control`] - Cancel, discard and resync
//! - [`query`] - Read-only projections for presentation code
//! - [`lifecycle`] - Shutdown and completion waiting

mod control;
mod lifecycle;
mod provision;
mod query;
mod subscription;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::error::Result;
use crate::registry::BatchRegistry;
use crate::transport::SyncTransport;
use crate::types::{BatchId, Event, TaskId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use tokio::sync::{Mutex, RwLock, Semaphore, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub(crate) use subscription::SubscriptionHandle;

/// Main engine instance (cloneable - all fields are Arc-wrapped)
///
/// Owns the batch registry, the subscription handle table and the observer
/// event channel. Every spawned worker holds a clone.
#[derive(Clone)]
pub struct SyncEngine {
    /// Every live batch and its task records
    pub(crate) registry: Arc<RwLock<BatchRegistry>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Provisioning and progress-channel collaborator
    pub(crate) transport: Arc<dyn SyncTransport>,
    /// Live subscription per task
    pub(crate) subscriptions: Arc<Mutex<HashMap<TaskId, SubscriptionHandle>>>,
    /// Cancellation scope per batch (children of `shutdown_token`)
    pub(crate) batch_tokens: Arc<Mutex<HashMap<BatchId, CancellationToken>>>,
    /// Root cancellation scope, cancelled on shutdown
    pub(crate) shutdown_token: CancellationToken,
    /// Tracks provisioning and subscription workers so shutdown can wait for them
    pub(crate) tracker: TaskTracker,
    /// Bounds concurrent provisioning calls
    pub(crate) provision_limit: Arc<Semaphore>,
    /// Last assigned batch id
    pub(crate) next_batch_id: Arc<AtomicU64>,
    /// Set to false during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Create a new engine around a transport
    ///
    /// Fails if the configuration does not validate.
    pub fn new(config: Config, transport: Arc<dyn SyncTransport>) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(config.event_buffer);
        let provision_limit = Arc::new(Semaphore::new(config.subscription.provision_concurrency));

        Ok(Self {
            registry: Arc::new(RwLock::new(BatchRegistry::new())),
            event_tx,
            config: Arc::new(config),
            transport,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            batch_tokens: Arc::new(Mutex::new(HashMap::new())),
            shutdown_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            provision_limit,
            next_batch_id: Arc::new(AtomicU64::new(0)),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Subscribe to engine events
    ///
    /// Each receiver sees every event emitted after it subscribed. A receiver
    /// that falls behind by more than `event_buffer` events gets a `Lagged`
    /// error and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Engine events as a `Stream`, silently skipping over lag
    pub fn event_stream(&self) -> impl tokio_stream::Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|item| item.ok())
    }

    /// Get the current configuration
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() fails only when nobody is listening
        self.event_tx.send(event).ok();
    }
}
