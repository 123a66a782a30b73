//! End-to-end scenarios against the public `BatchingEngine` API,
//! mirroring the six walkthroughs in the engine's specification.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batching_engine::{BatchEnvelope, BatchingEngine, ClientId, EngineConfig, FlushReason, Message, Priority};
use pretty_assertions::assert_eq;
use tokio::sync::Mutex as AsyncMutex;

fn scenario_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.batch_size = 5;
    config.min_batch_size = 1;
    config.max_batch_size = 20;
    config.analytics.enabled = true;
    config.analytics.interval_ms = 0;
    config.compression.min_size = 3;
    config.compression.priority_thresholds.high = 10;
    config.compression.priority_thresholds.medium = 10;
    config.compression.priority_thresholds.low = 10;
    config.timeouts.high_ms = 30;
    config.timeouts.medium_ms = 150;
    config.timeouts.low_ms = 400;
    config
}

async fn batch_collector(engine: &Arc<BatchingEngine>) -> Arc<AsyncMutex<Vec<BatchEnvelope>>> {
    let collected = Arc::new(AsyncMutex::new(Vec::new()));
    let collected_clone = Arc::clone(&collected);
    engine.on_batch(move |_client, envelope| {
        let collected = Arc::clone(&collected_clone);
        async move {
            collected.lock().await.push(envelope);
        }
    });
    collected
}

#[tokio::test]
async fn scenario_size_trigger_flushes_full_batch_in_priority_order() {
    let engine = BatchingEngine::new(scenario_config());
    let collected = batch_collector(&engine).await;
    let client = ClientId::from("size-client");

    engine.add_message(client.clone(), Message::new("a", Priority::Low, vec![1])).await.unwrap();
    engine.add_message(client.clone(), Message::new("b", Priority::Medium, vec![1])).await.unwrap();
    engine.add_message(client.clone(), Message::new("c", Priority::High, vec![1])).await.unwrap();
    engine.add_message(client.clone(), Message::new("d", Priority::Medium, vec![1])).await.unwrap();
    engine.add_message(client.clone(), Message::new("e", Priority::Low, vec![1])).await.unwrap();

    let batches = collected.lock().await;
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.reason, FlushReason::Size);
    let priorities: Vec<Priority> = batch.messages.iter().map(|m| m.priority).collect();
    assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Medium, Priority::Low, Priority::Low]);
    assert_eq!(engine.buffered_len(&client), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_timeout_uses_highest_priority_timeout_in_buffer() {
    let engine = BatchingEngine::new(scenario_config());
    let collected = batch_collector(&engine).await;
    let client = ClientId::from("timeout-client");

    engine.add_message(client.clone(), Message::new("a", Priority::Low, vec![1])).await.unwrap();
    tokio::time::advance(Duration::from_millis(20)).await;
    engine.add_message(client.clone(), Message::new("b", Priority::High, vec![1])).await.unwrap();

    tokio::time::advance(Duration::from_millis(40)).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    let batches = collected.lock().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].reason, FlushReason::Timeout);
    assert_eq!(batches[0].len(), 2);
}

#[tokio::test]
async fn scenario_disconnect_drains_partial_buffer() {
    let engine = BatchingEngine::new(scenario_config());
    let collected = batch_collector(&engine).await;
    let client = ClientId::from("disconnect-client");

    engine.add_message(client.clone(), Message::new("a", Priority::Medium, vec![1])).await.unwrap();
    engine.add_message(client.clone(), Message::new("b", Priority::Medium, vec![1])).await.unwrap();
    engine.remove_client(&client).await.unwrap();

    let batches = collected.lock().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].reason, FlushReason::ClientDisconnect);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(engine.buffered_len(&client), 0);
}

#[tokio::test]
async fn scenario_compression_kicks_in_above_size_threshold() {
    let mut config = scenario_config();
    config.compression.priority_thresholds.medium = 50;
    let engine = BatchingEngine::new(config);
    let collected = batch_collector(&engine).await;
    let client = ClientId::from("compress-client");

    let payload = vec![b'z'; 500];
    for _ in 0..5 {
        engine
            .add_message(client.clone(), Message::new("blob", Priority::Medium, payload.clone()))
            .await
            .unwrap();
    }

    let batches = collected.lock().await;
    assert_eq!(batches.len(), 1);
    assert!(batches[0].compressed);
    assert!(batches[0].compressed_size < batches[0].original_size);
    assert_eq!(batches[0].algorithm.as_deref(), Some("gzip"));
}

#[tokio::test]
async fn scenario_adaptive_cap_raises_on_low_load() {
    let engine = BatchingEngine::new(scenario_config());
    let before = engine.active_batch_size_cap();

    engine.inject_prediction(before, 0.0);
    assert_eq!(engine.active_batch_size_cap(), before, "low-confidence prediction must not move the cap");

    engine.inject_prediction(before + 6, 0.85);
    assert_eq!(engine.active_batch_size_cap(), before + 6);
}

#[tokio::test]
async fn scenario_predictor_override_beats_active_cap() {
    let engine = BatchingEngine::new(scenario_config());
    engine.inject_prediction(7, 0.9);
    assert_eq!(engine.active_batch_size_cap(), 7);

    let collected = batch_collector(&engine).await;
    let client = ClientId::from("predictor-client");
    for i in 0..7 {
        engine
            .add_message(client.clone(), Message::new(format!("m{i}"), Priority::Medium, vec![1]))
            .await
            .unwrap();
    }

    let batches = collected.lock().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 7);
}

#[tokio::test]
async fn boundary_exact_cap_fill_triggers_exactly_one_size_flush() {
    let mut config = scenario_config();
    config.batch_size = 2;
    let engine = BatchingEngine::new(config);
    let flush_count = Arc::new(AtomicUsize::new(0));
    let flush_count_clone = Arc::clone(&flush_count);
    engine.on_batch(move |_client, _envelope| {
        flush_count_clone.fetch_add(1, Ordering::SeqCst);
        async move {}
    });

    let client = ClientId::from("exact-cap-client");
    engine.add_message(client.clone(), Message::new("a", Priority::Medium, vec![1])).await.unwrap();
    engine.add_message(client.clone(), Message::new("b", Priority::Medium, vec![1])).await.unwrap();

    assert_eq!(flush_count.load(Ordering::SeqCst), 1);
    assert_eq!(engine.buffered_len(&client), 0);
}

#[tokio::test]
async fn boundary_lowering_cap_does_not_retroactively_flush() {
    let engine = BatchingEngine::new(scenario_config());
    let client = ClientId::from("lower-cap-client");
    engine.add_message(client.clone(), Message::new("a", Priority::Medium, vec![1])).await.unwrap();
    engine.add_message(client.clone(), Message::new("b", Priority::Medium, vec![1])).await.unwrap();

    engine.inject_prediction(1, 0.95);
    assert_eq!(engine.active_batch_size_cap(), 1);
    assert_eq!(engine.buffered_len(&client), 2, "lowering the cap must not flush an already-buffered client");
}

#[tokio::test]
async fn law_reset_metrics_isolates_counters_from_adaptive_state() {
    let engine = BatchingEngine::new(scenario_config());
    let client = ClientId::from("reset-client");
    engine.add_message(client.clone(), Message::new("a", Priority::Medium, vec![1])).await.unwrap();
    engine.remove_client(&client).await.unwrap();
    engine.inject_prediction(11, 0.9);

    assert!(engine.get_metrics().total_batches > 0);
    engine.reset_metrics();

    let metrics = engine.get_metrics();
    assert_eq!(metrics.total_batches, 0);
    assert_eq!(metrics.total_messages_delivered, 0);
    assert_eq!(engine.active_batch_size_cap(), 11);
}

#[tokio::test]
async fn law_stop_is_idempotent_and_drains_all_clients() {
    let engine = BatchingEngine::new(scenario_config());
    for i in 0..3 {
        let client = ClientId::from(format!("stop-client-{i}"));
        engine.add_message(client, Message::new("a", Priority::Medium, vec![1])).await.unwrap();
    }

    engine.stop().await.unwrap();
    engine.stop().await.unwrap();

    for i in 0..3 {
        let client = ClientId::from(format!("stop-client-{i}"));
        assert_eq!(engine.buffered_len(&client), 0);
    }
}
