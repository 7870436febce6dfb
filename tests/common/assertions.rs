//! Custom assertions for integration tests

use meeting_sync::{BatchId, BatchSummary, Event, SyncEngine};
use std::time::Duration;
use tokio::sync::broadcast;

/// Wait for a batch to finish, failing the test after `timeout`
pub async fn wait_for_done(engine: &SyncEngine, batch_id: BatchId, timeout: Duration) -> BatchSummary {
    match tokio::time::timeout(timeout, engine.wait_for_batch(batch_id)).await {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => panic!("batch {batch_id} could not be awaited: {e}"),
        Err(_) => panic!("batch {batch_id} not done after {timeout:?}"),
    }
}

/// Collect events until `predicate` matches (inclusive) or the timeout elapses
pub async fn collect_events_until(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: impl FnMut(&Event) -> bool,
) -> Vec<Event> {
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let stop = predicate(&event);
            collected.push(event);
            if stop {
                break;
            }
        }
    })
    .await;
    collected
}
