//! # meeting-sync
//!
//! Tracks the distribution of a meeting's materials to a set of devices as one
//! logical batch, and keeps a live, accurate picture of every device's transfer
//! without polling.
//!
//! ## Design Philosophy
//!
//! - **Two-phase identity** - a task is addressable by its device serial the
//!   moment the batch is seeded, and by its server task id once provisioned
//! - **Push, not poll** - progress channels are folded into task records as
//!   events arrive; observers subscribe to [`Event`]s
//! - **Failures stay local** - a device that fails provisioning or stalls never
//!   affects the rest of the batch
//! - **Library-first** - the host supplies a [`SyncTransport`]; the crate never
//!   moves bytes itself
//!
//! ## Quick Start
//!
//! ```no_run
//! use meeting_sync::{Config, DeviceTarget, MeetingRef, SyncEngine, SyncTransport};
//! use std::sync::Arc;
//!
//! async fn distribute(transport: Arc<dyn SyncTransport>) -> meeting_sync::Result<()> {
//!     let engine = SyncEngine::new(Config::default(), transport)?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let batch_id = engine
//!         .start_batch(
//!             MeetingRef::new("m-42", "Board meeting"),
//!             vec![
//!                 DeviceTarget::new("SN-001", "Room 1"),
//!                 DeviceTarget::new("SN-002", "Room 2"),
//!             ],
//!         )
//!         .await?;
//!
//!     let summary = engine.wait_for_batch(batch_id).await?;
//!     println!(
//!         "{} of {} devices received the materials",
//!         summary.copy_completed_count, summary.total_count
//!     );
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Batch-level summary computation
pub mod aggregate;
/// Configuration types
pub mod config;
/// Sync engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Batch and task bookkeeping
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Per-device task records
pub mod task;
/// Provisioning and progress-channel seam
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, RetryConfig, SubscriptionConfig};
pub use engine::SyncEngine;
pub use error::{Error, Result, TaskError};
pub use registry::{BatchJob, BatchRegistry};
pub use task::TaskRecord;
pub use transport::{ProgressChannel, SyncTransport};
pub use types::{
    BatchId, BatchSummary, ChannelEvent, CopyStatus, CorrelationKey, CreateStatus, DeviceTarget,
    Diagnostics, Event, MeetingRef, ProgressEvent, ProvisionResult, SubscriptionState, TaskId,
};

/// Run the engine until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to whichever can be
///   registered.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use meeting_sync::{Config, SyncEngine, SyncTransport, run_with_shutdown};
/// use std::sync::Arc;
///
/// async fn serve(transport: Arc<dyn SyncTransport>) -> meeting_sync::Result<()> {
///     let engine = SyncEngine::new(Config::default(), transport)?;
///     run_with_shutdown(engine).await
/// }
/// ```
pub async fn run_with_shutdown(engine: SyncEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        return;
    }
    tracing::info!("Received Ctrl+C signal");
}
