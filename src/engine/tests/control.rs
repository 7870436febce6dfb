use super::*;

async fn wait_for_close_count(transport: &ScriptedTransport, task_id: &TaskId, expected: u32) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.closes(task_id) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_cancel_task_releases_channel_once() {
    let transport = ScriptedTransport::new();
    let engine = create_test_engine(transport.clone());

    engine.start_batch(meeting(), targets(&["A"])).await.unwrap();
    let task_id = task_id_of("A");
    let tx = transport.sender_for(&task_id, 0).await;
    progress(&tx, 40.0);
    wait_for_task(&engine, &task_id, |t| t.progress_percent >= 40.0).await;

    assert!(engine.cancel_task(&task_id).await);
    assert!(!engine.cancel_task(&task_id).await);
    assert_eq!(
        engine.subscription_state(&task_id).await,
        SubscriptionState::Closed
    );

    wait_for_close_count(&transport, &task_id, 1).await;

    // Events after cancellation are not applied
    tx.send(Ok(ChannelEvent::Progress(ProgressEvent::percent(90.0))))
        .ok();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = engine.get_task(&task_id).await.unwrap();
    assert_eq!(record.progress_percent, 40.0);
    assert_eq!(transport.closes(&task_id), 1);
    assert_eq!(transport.opens(&task_id), 1);

    // A closed subscription is not reopened implicitly
    assert!(!engine.subscribe_task(&task_id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_unknown_task_is_noop() {
    let engine = create_test_engine(ScriptedTransport::new());
    assert!(!engine.cancel_task(&TaskId::new("ghost")).await);
}

#[tokio::test]
async fn test_cancel_completed_task_is_noop() {
    let transport = ScriptedTransport::new();
    let engine = create_test_engine(transport.clone());

    engine.start_batch(meeting(), targets(&["A"])).await.unwrap();
    let task_id = task_id_of("A");
    let tx = transport.sender_for(&task_id, 0).await;
    complete(&tx);
    wait_for_task(&engine, &task_id, |t| t.copy_status == CopyStatus::Completed).await;
    wait_for_close_count(&transport, &task_id, 1).await;

    assert!(!engine.cancel_task(&task_id).await);

    let record = engine.get_task(&task_id).await.unwrap();
    assert_eq!(record.copy_status, CopyStatus::Completed);
    assert_eq!(transport.closes(&task_id), 1);
}

#[tokio::test]
async fn test_cancel_batch_twice_is_noop() {
    let transport = ScriptedTransport::new();
    let engine = create_test_engine(transport.clone());
    let mut events = engine.subscribe();

    let batch_id = engine
        .start_batch(meeting(), targets(&["A", "B"]))
        .await
        .unwrap();
    let task_a = task_id_of("A");
    let task_b = task_id_of("B");
    transport.sender_for(&task_a, 0).await;
    transport.sender_for(&task_b, 0).await;

    assert!(engine.cancel_batch(batch_id).await);
    assert!(!engine.cancel_batch(batch_id).await);

    wait_for_event(&mut events, |e| matches!(e, Event::BatchCancelled { .. })).await;
    assert_eq!(engine.subscription_state(&task_a).await, SubscriptionState::Closed);
    assert_eq!(engine.subscription_state(&task_b).await, SubscriptionState::Closed);

    wait_for_close_count(&transport, &task_a, 1).await;
    wait_for_close_count(&transport, &task_b, 1).await;

    // Only one cancellation event was emitted
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut cancelled = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::BatchCancelled { .. }) {
            cancelled += 1;
        }
    }
    assert_eq!(cancelled, 0);

    // The records survive cancellation
    assert_eq!(engine.list_tasks(batch_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_unknown_batch_is_noop() {
    let engine = create_test_engine(ScriptedTransport::new());
    assert!(!engine.cancel_batch(BatchId::new(99)).await);
}

#[tokio::test]
async fn test_late_events_after_discard_are_counted_not_applied() {
    let transport = ScriptedTransport::new();
    let engine = create_test_engine(transport.clone());
    let mut events = engine.subscribe();

    let batch_id = engine.start_batch(meeting(), targets(&["A"])).await.unwrap();
    let task_id = task_id_of("A");
    transport.sender_for(&task_id, 0).await;

    assert!(engine.discard_batch(batch_id).await);
    assert!(!engine.discard_batch(batch_id).await);
    wait_for_event(&mut events, |e| matches!(e, Event::BatchDiscarded { .. })).await;

    let before = engine.diagnostics().await.ignored_events;
    assert!(!engine.update_progress(&task_id, &ProgressEvent::percent(50.0)).await);
    assert!(!engine.mark_completed(&task_id).await);
    assert_eq!(engine.diagnostics().await.ignored_events, before + 2);

    assert!(matches!(
        engine.get_task(&task_id).await,
        Err(Error::Task(TaskError::UnknownTask(_)))
    ));
    assert!(matches!(
        engine.get_batch_summary(batch_id).await,
        Err(Error::BatchNotFound(_))
    ));
    assert_eq!(
        engine.subscription_state(&task_id).await,
        SubscriptionState::Unsubscribed
    );
    wait_for_close_count(&transport, &task_id, 1).await;
}

#[tokio::test]
async fn test_resync_stalled_task_reopens_and_keeps_progress() {
    let transport = ScriptedTransport::new();
    let engine = create_test_engine(transport.clone());
    let mut events = engine.subscribe();

    engine.start_batch(meeting(), targets(&["A"])).await.unwrap();
    let task_id = task_id_of("A");
    let tx = transport.sender_for(&task_id, 0).await;
    progress(&tx, 70.0);
    wait_for_task(&engine, &task_id, |t| t.progress_percent >= 70.0).await;

    // Break the channel and make every reopen fail until the task stalls
    transport.fail_opens(&task_id, u32::MAX);
    tx.send(Err(Error::transient("reset"))).unwrap();
    wait_for_event(&mut events, |e| matches!(e, Event::TaskStalled { .. })).await;
    assert!(engine.get_task(&task_id).await.unwrap().stalled);

    transport.fail_opens(&task_id, 0);
    engine.resync_task(&task_id).await.unwrap();

    let tx2 = transport.sender_for(&task_id, 1).await;
    let record = engine.get_task(&task_id).await.unwrap();
    assert!(!record.stalled);
    assert_eq!(record.progress_percent, 70.0);

    complete(&tx2);
    let record = wait_for_task(&engine, &task_id, |t| t.copy_status == CopyStatus::Completed).await;
    assert_eq!(record.progress_percent, 100.0);
}

#[tokio::test]
async fn test_resync_after_cancel_task_reopens() {
    let transport = ScriptedTransport::new();
    let engine = create_test_engine(transport.clone());

    engine.start_batch(meeting(), targets(&["A"])).await.unwrap();
    let task_id = task_id_of("A");
    transport.sender_for(&task_id, 0).await;

    assert!(engine.cancel_task(&task_id).await);
    engine.resync_task(&task_id).await.unwrap();

    transport.sender_for(&task_id, 1).await;
    assert_eq!(transport.opens(&task_id), 2);
    wait_for_close_count(&transport, &task_id, 1).await;
}

#[tokio::test]
async fn test_resync_healthy_subscription_is_noop() {
    let transport = ScriptedTransport::new();
    let engine = create_test_engine(transport.clone());

    engine.start_batch(meeting(), targets(&["A"])).await.unwrap();
    let task_id = task_id_of("A");
    transport.sender_for(&task_id, 0).await;

    engine.resync_task(&task_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.opens(&task_id), 1);
}

#[tokio::test]
async fn test_resync_rejects_completed_and_cancelled_batches() {
    let transport = ScriptedTransport::new();
    let engine = create_test_engine(transport.clone());

    let batch_id = engine
        .start_batch(meeting(), targets(&["A", "B"]))
        .await
        .unwrap();
    let task_a = task_id_of("A");
    let task_b = task_id_of("B");
    let tx_a = transport.sender_for(&task_a, 0).await;
    transport.sender_for(&task_b, 0).await;

    complete(&tx_a);
    wait_for_task(&engine, &task_a, |t| t.copy_status == CopyStatus::Completed).await;
    assert!(matches!(
        engine.resync_task(&task_a).await,
        Err(Error::Task(TaskError::InvalidTransition { .. }))
    ));

    engine.cancel_batch(batch_id).await;
    assert!(matches!(
        engine.resync_task(&task_b).await,
        Err(Error::Task(TaskError::InvalidTransition { .. }))
    ));
}
