//! The batching engine itself (spec §4.1): per-client buffering, the flush
//! algorithm, inactivity timers, and the glue tying the Compressor,
//! Predictor and Adaptive controller together.
//!
//! Grounded on the teacher's `BatchMCPToolHandler`/`DynamicWorkerPool`
//! pair: a `DashMap`-sharded per-client store guarded by short, synchronous
//! critical sections, with background work spawned as `tokio` tasks rather
//! than held across awaits.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::adaptive::AdaptiveController;
use super::client_buffer::ClientState;
use super::compressor::Compressor;
use super::config::EngineConfig;
use super::envelope::{BatchEnvelope, FlushReason};
use super::error::{BatchError, BatchResult};
use super::message::{ClientId, Message, Priority};
use super::metrics::{AnalyticsSnapshot, MetricsSnapshot};
use super::predictor::{DataPoint, Predictor};

const ANALYTICS_HISTORY_CAP: usize = 100;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type BatchHandler = Arc<dyn Fn(ClientId, BatchEnvelope) -> BoxFuture + Send + Sync>;
type AnalyticsHandler = Arc<dyn Fn(AnalyticsSnapshot) -> BoxFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionKind {
    Batch,
    Analytics,
}

/// A cancellation handle returned by `on_batch`/`on_analytics`.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionHandle {
    id: u64,
    kind: SubscriptionKind,
}

/// The message-batching engine. Construct with [`BatchingEngine::new`],
/// which returns an `Arc` since inactivity timers and background ticks
/// need to call back into it from spawned tasks.
pub struct BatchingEngine {
    config: EngineConfig,
    compression_enabled: AtomicBool,
    stopped: AtomicBool,
    buffers: DashMap<ClientId, ClientState>,
    compressor: Compressor,
    predictor: Mutex<Predictor>,
    adaptive: Mutex<AdaptiveController>,
    metrics: Mutex<MetricsSnapshot>,
    batch_handlers: Mutex<Vec<(u64, BatchHandler)>>,
    analytics_handlers: Mutex<Vec<(u64, AnalyticsHandler)>>,
    next_handler_id: AtomicU64,
    last_analytics_at: Mutex<Instant>,
    analytics_history: Mutex<VecDeque<AnalyticsSnapshot>>,
    last_prediction: Mutex<Option<(usize, f64)>>,
    background_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl BatchingEngine {
    /// Build a new engine from `config` and start its background adaptive
    /// and predictor ticks.
    #[must_use]
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let adaptive = AdaptiveController::new(
            config.batch_size,
            config.min_batch_size,
            config.max_batch_size,
            config.performance_threshold,
        );
        let predictor = Predictor::new(
            config.predictor.history_size,
            config.predictor.feature_window,
            config.predictor.learning_rate,
            config.min_batch_size,
            config.max_batch_size,
        );
        let compressor = Compressor::new(config.compression.level);
        let compression_enabled = config.compression.enabled;

        let engine = Arc::new(Self {
            config,
            compression_enabled: AtomicBool::new(compression_enabled),
            stopped: AtomicBool::new(false),
            buffers: DashMap::new(),
            compressor,
            predictor: Mutex::new(predictor),
            adaptive: Mutex::new(adaptive),
            metrics: Mutex::new(MetricsSnapshot::default()),
            batch_handlers: Mutex::new(Vec::new()),
            analytics_handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(0),
            last_analytics_at: Mutex::new(Instant::now()),
            analytics_history: Mutex::new(VecDeque::new()),
            last_prediction: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
        });

        engine.spawn_background_tasks();
        engine
    }

    fn spawn_background_tasks(self: &Arc<Self>) {
        let adaptive_engine = Arc::clone(self);
        let adaptive_interval = std::time::Duration::from_millis(self.config.adaptive_interval_ms);
        let adaptive_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(adaptive_interval);
            loop {
                ticker.tick().await;
                if adaptive_engine.stopped.load(Ordering::Acquire) {
                    break;
                }
                adaptive_engine.tick_adaptive();
            }
        });

        let predictor_engine = Arc::clone(self);
        let predictor_interval =
            std::time::Duration::from_millis(self.config.predictor.prediction_interval_ms);
        let predictor_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(predictor_interval);
            loop {
                ticker.tick().await;
                if predictor_engine.stopped.load(Ordering::Acquire) {
                    break;
                }
                predictor_engine.tick_predictor();
            }
        });

        self.background_tasks.lock().push(adaptive_task);
        self.background_tasks.lock().push(predictor_task);
    }

    /// Observed load is the mean per-client buffer fill ratio against the
    /// active cap. With no buffered clients there is no signal to
    /// reconcile against, so the tick is a no-op rather than reading an
    /// idle system as minimum load and shrinking the cap.
    fn tick_adaptive(&self) {
        let cap = self.active_batch_size_cap().max(1);
        let mut total_ratio = 0.0;
        let mut active_batches = 0usize;
        for entry in self.buffers.iter() {
            total_ratio += entry.messages.len() as f64 / cap as f64;
            active_batches += 1;
        }
        if active_batches == 0 {
            return;
        }
        let load = (total_ratio / active_batches as f64).min(1.0);
        self.adaptive.lock().reconcile(load);
    }

    fn tick_predictor(&self) {
        let active_batches = self.buffers.len();
        let average_len: usize = if active_batches == 0 {
            0
        } else {
            let total: usize = self.buffers.iter().map(|e| e.messages.len()).sum();
            total / active_batches
        };
        let prediction = self.predictor.lock().observe_and_predict(average_len);
        if let Some(prediction) = prediction {
            *self.last_prediction.lock() = Some((prediction.recommended_batch_size, prediction.confidence));
            self.adaptive
                .lock()
                .apply_prediction(prediction.recommended_batch_size, prediction.confidence);
        }
    }

    /// Directly apply a Predictor recommendation, bypassing the periodic
    /// tick. Used by callers that compute predictions externally or in
    /// tests (spec §8 scenario 6).
    pub fn inject_prediction(&self, recommended_batch_size: usize, confidence: f64) {
        *self.last_prediction.lock() = Some((recommended_batch_size, confidence));
        self.adaptive.lock().apply_prediction(recommended_batch_size, confidence);
    }

    #[must_use]
    pub fn last_prediction(&self) -> Option<(usize, f64)> {
        *self.last_prediction.lock()
    }

    #[must_use]
    pub fn active_batch_size_cap(&self) -> usize {
        self.adaptive.lock().active_cap()
    }

    pub fn enable_compression(&self) {
        self.compression_enabled.store(true, Ordering::Release);
    }

    pub fn disable_compression(&self) {
        self.compression_enabled.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.lock().clone();
        snapshot.active_batches = self.buffers.len();
        snapshot.compression_ratio = self.compressor.metrics().compression_ratio();
        snapshot
    }

    /// Restore a fresh metrics state. Does not touch `active_batch_size_cap`
    /// or any client buffer (law R3).
    pub fn reset_metrics(&self) {
        *self.metrics.lock() = MetricsSnapshot::default();
        self.compressor.reset_metrics();
    }

    /// Register a handler invoked for every completed flush, in
    /// registration order, awaited before the flush that triggered it
    /// returns (§5).
    pub fn on_batch<F, Fut>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(ClientId, BatchEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let boxed: BatchHandler = Arc::new(move |client_id, envelope| Box::pin(handler(client_id, envelope)));
        self.batch_handlers.lock().push((id, boxed));
        SubscriptionHandle {
            id,
            kind: SubscriptionKind::Batch,
        }
    }

    /// Register a handler invoked after each throttled analytics pass.
    pub fn on_analytics<F, Fut>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(AnalyticsSnapshot) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let boxed: AnalyticsHandler = Arc::new(move |snapshot| Box::pin(handler(snapshot)));
        self.analytics_handlers.lock().push((id, boxed));
        SubscriptionHandle {
            id,
            kind: SubscriptionKind::Analytics,
        }
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        match handle.kind {
            SubscriptionKind::Batch => {
                self.batch_handlers.lock().retain(|(id, _)| *id != handle.id);
            }
            SubscriptionKind::Analytics => {
                self.analytics_handlers.lock().retain(|(id, _)| *id != handle.id);
            }
        }
    }

    /// Append `message` to `client_id`'s buffer, creating it if absent,
    /// re-arming the inactivity timer only when this message raised the
    /// buffer's urgency, and triggering a size-based flush when the buffer
    /// reaches the active cap (§4.1, §4.1.2).
    pub async fn add_message(self: &Arc<Self>, client_id: ClientId, message: Message) -> BatchResult<()> {
        if client_id.is_empty() {
            self.metrics.lock().invalid_client_id_errors += 1;
            return Err(BatchError::InvalidClientId);
        }
        if message.msg_type.is_empty() {
            self.metrics.lock().invalid_message_errors += 1;
            return Err(BatchError::InvalidMessage);
        }

        {
            let mut counts = self.metrics.lock();
            *counts.priority_counts.entry(message.priority).or_insert(0) += 1;
        }

        let len = {
            let mut entry = self
                .buffers
                .entry(client_id.clone())
                .or_insert_with(|| ClientState::new(Instant::now()));

            let message_priority = message.priority;
            let is_first_message = entry.messages.is_empty();
            entry.messages.push(message);

            // The buffer's tracked highest priority only ever moves toward
            // more urgent (lower rank); a same-or-lower-priority arrival
            // must not touch the armed timer (§4.1.2).
            let urgency_increased = is_first_message || message_priority.rank() < entry.highest_priority.rank();
            if urgency_increased {
                entry.highest_priority = message_priority;

                let now = Instant::now();
                let duration = self.config.timeouts.for_priority(entry.highest_priority);
                let candidate_deadline = now + duration;
                let should_reschedule = entry
                    .timer_deadline
                    .map_or(true, |current_deadline| candidate_deadline < current_deadline);

                if should_reschedule {
                    entry.timer_generation = entry.timer_generation.wrapping_add(1);
                    if let Some(previous) = entry.timer_handle.take() {
                        previous.abort();
                    }
                    entry.timer_deadline = Some(candidate_deadline);

                    let engine = Arc::clone(self);
                    let timer_client_id = client_id.clone();
                    let generation = entry.timer_generation;
                    let timer_task = tokio::spawn(async move {
                        tokio::time::sleep(duration).await;
                        engine.timer_fire(timer_client_id, generation).await;
                    });
                    entry.timer_handle = Some(self.supervise_timer(timer_task, client_id.clone()));
                }
            }

            entry.messages.len()
        };

        if len >= self.active_batch_size_cap() {
            self.internal_flush(&client_id, FlushReason::Size, false).await?;
        }

        Ok(())
    }

    /// Wrap a spawned inactivity-timer task so a panic inside it (e.g. from
    /// a user-supplied `on_batch` handler invoked during the timer-fired
    /// flush) is caught, logged, and counted as a `TimerError` rather than
    /// silently vanishing into the aborted task (§7 "Exception in
    /// inactivity handler"). Returns the `AbortHandle` callers use to
    /// cancel the timer on re-arm or flush; an intentional `abort()` is not
    /// counted as an error.
    fn supervise_timer(self: &Arc<Self>, task: tokio::task::JoinHandle<()>, client_id: ClientId) -> tokio::task::AbortHandle {
        let abort_handle = task.abort_handle();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(join_err) = task.await {
                if join_err.is_panic() {
                    engine.metrics.lock().timer_errors += 1;
                    error!(client = %client_id, error = %join_err, "inactivity timer handler panicked");
                }
            }
        });
        abort_handle
    }

    async fn timer_fire(self: Arc<Self>, client_id: ClientId, generation: u64) {
        let still_current = self
            .buffers
            .get(&client_id)
            .map(|entry| entry.timer_generation == generation)
            .unwrap_or(false);
        if !still_current {
            return;
        }
        if let Err(err) = self.internal_flush(&client_id, FlushReason::Timeout, true).await {
            self.metrics.lock().timer_errors += 1;
            warn!(client = %client_id, error = %err, "inactivity timer flush failed");
        }
    }

    /// Manually flush `client_id`'s buffer. A no-op if the client has no
    /// buffered messages (boundary: empty-buffer flush emits nothing).
    pub async fn flush(self: &Arc<Self>, client_id: &ClientId) -> BatchResult<()> {
        self.internal_flush(client_id, FlushReason::Manual, false).await
    }

    /// Drain and flush `client_id` on disconnect, then forget it.
    pub async fn remove_client(self: &Arc<Self>, client_id: &ClientId) -> BatchResult<()> {
        self.internal_flush(client_id, FlushReason::ClientDisconnect, false).await
    }

    /// Idempotently stop the engine: cancel every pending timer, flush
    /// every remaining buffer with reason `Stop`, and stop background
    /// ticks. A second call is a no-op (law R2).
    pub async fn stop(self: &Arc<Self>) -> BatchResult<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for task in self.background_tasks.lock().drain(..) {
            task.abort();
        }

        let client_ids: Vec<ClientId> = self.buffers.iter().map(|entry| entry.key().clone()).collect();
        for client_id in client_ids {
            self.internal_flush(&client_id, FlushReason::Stop, false).await?;
        }

        info!("batching engine stopped");
        Ok(())
    }

    async fn internal_flush(
        self: &Arc<Self>,
        client_id: &ClientId,
        reason: FlushReason,
        skip_timer_abort: bool,
    ) -> BatchResult<()> {
        let Some((_, mut state)) = self.buffers.remove(client_id) else {
            return Ok(());
        };

        if !skip_timer_abort {
            if let Some(handle) = state.timer_handle.take() {
                handle.abort();
            }
        }

        if state.messages.is_empty() {
            return Ok(());
        }

        let mut messages = std::mem::take(&mut state.messages);
        messages.sort_by_key(|m| m.priority.rank());
        let highest_priority = messages.first().map(|m| m.priority).unwrap_or_default();
        let batch_latency_ms = state.batch_start_time.elapsed().as_secs_f64() * 1000.0;

        let compression_enabled = self.compression_enabled.load(Ordering::Acquire);
        let attempt_compress = compression_enabled && messages.len() >= self.config.compression.min_size;
        let threshold = self.config.compression.priority_thresholds.for_priority(highest_priority);

        let (compressed, payload, algorithm, original_size, compressed_size) =
            match self.compressor.compress(&messages, highest_priority, attempt_compress, threshold) {
                Ok(result) if result.compressed && result.compressed_size < result.original_size => {
                    (true, Some(result.data), result.algorithm, result.original_size, result.compressed_size)
                }
                Ok(result) => (false, None, None, result.original_size, result.original_size),
                Err(err) => {
                    self.metrics.lock().compression_errors += 1;
                    error!(client = %client_id, error = %err, "compression failed, falling back to uncompressed");
                    let serialized = Compressor::serialize(&messages).unwrap_or_default();
                    let size = serialized.len();
                    (false, None, None, size, size)
                }
            };

        let envelope = BatchEnvelope {
            messages,
            compressed,
            payload,
            original_size,
            compressed_size,
            algorithm,
            reason,
        };

        self.record_flush_metrics(&envelope, batch_latency_ms);

        {
            let mut predictor = self.predictor.lock();
            predictor.add_data_point(DataPoint {
                timestamp_ms: predictor_clock_ms(),
                message_count: envelope.len() as u64,
                batch_size: envelope.len(),
                latency_ms: batch_latency_ms,
                errors: 0,
                compression_ratio: if envelope.compressed {
                    Some(envelope.compressed_size as f64 / envelope.original_size.max(1) as f64)
                } else {
                    None
                },
                resource_usage: self.buffers.len() as f64 / self.config.max_batch_size.max(1) as f64,
            });
        }

        let handlers = self.batch_handlers.lock().clone();
        for (_, handler) in handlers {
            (handler)(client_id.clone(), envelope.clone()).await;
        }

        self.maybe_run_analytics().await;

        Ok(())
    }

    fn record_flush_metrics(&self, envelope: &BatchEnvelope, batch_latency_ms: f64) {
        let mut metrics = self.metrics.lock();
        metrics.total_batches += 1;
        metrics.total_messages_delivered += envelope.len() as u64;
        *metrics.flush_reason_counts.entry(envelope.reason).or_insert(0) += 1;
        metrics.max_batch_size_seen = metrics.max_batch_size_seen.max(envelope.len());
        metrics.min_batch_size_seen = Some(match metrics.min_batch_size_seen {
            Some(current) => current.min(envelope.len()),
            None => envelope.len(),
        });
        if envelope.compressed {
            metrics.total_bytes_saved += envelope.original_size.saturating_sub(envelope.compressed_size) as u64;
        }
        for message in &envelope.messages {
            *metrics.priority_latency_totals_ms.entry(message.priority).or_insert(0.0) += batch_latency_ms;
        }
        metrics.recompute_average_batch_size();
    }

    /// Run the throttled analytics pass off the critical path (§4.1.3:
    /// "never on the critical path"): spawns the snapshot build, history
    /// append, and handler dispatch as a detached task, and catches a
    /// panic inside it as an `AnalyticsError` rather than letting it
    /// propagate into whichever flush happened to trigger this pass.
    async fn maybe_run_analytics(self: &Arc<Self>) {
        if !self.config.analytics.enabled {
            return;
        }

        let due = {
            let mut last = self.last_analytics_at.lock();
            let interval = std::time::Duration::from_millis(self.config.analytics.interval_ms);
            if last.elapsed() >= interval {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if !due {
            return;
        }

        let engine = Arc::clone(self);
        let analytics_task = tokio::spawn(async move {
            let snapshot = engine.build_analytics_snapshot();

            {
                let mut history = engine.analytics_history.lock();
                history.push_back(snapshot.clone());
                while history.len() > ANALYTICS_HISTORY_CAP {
                    history.pop_front();
                }
            }

            let handlers = engine.analytics_handlers.lock().clone();
            for (_, handler) in handlers {
                (handler)(snapshot.clone()).await;
            }
        });

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(join_err) = analytics_task.await {
                if join_err.is_panic() {
                    engine.metrics.lock().analytics_errors += 1;
                    error!(error = %join_err, "analytics snapshot pass panicked");
                }
            }
        });
    }

    fn build_analytics_snapshot(&self) -> AnalyticsSnapshot {
        let metrics = self.metrics.lock();
        AnalyticsSnapshot {
            max_batch_size_seen: metrics.max_batch_size_seen,
            min_batch_size_seen: metrics.min_batch_size_seen,
            average_batch_size: metrics.average_batch_size,
            priority_latency_avg_ms: [Priority::High, Priority::Medium, Priority::Low]
                .into_iter()
                .map(|p| (p, metrics.priority_latency_avg_ms(p)))
                .collect(),
            compression_ratio: self.compressor.metrics().compression_ratio(),
            total_bytes_saved: metrics.total_bytes_saved,
            priority_distribution: metrics.priority_distribution_tenths(),
            taken_at_ms: predictor_clock_ms(),
        }
    }

    #[must_use]
    pub fn analytics_history(&self) -> Vec<AnalyticsSnapshot> {
        self.analytics_history.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn buffered_len(&self, client_id: &ClientId) -> usize {
        self.buffers.get(client_id).map(|e| e.messages.len()).unwrap_or(0)
    }
}

/// A monotonic millisecond clock for `DataPoint`/`AnalyticsSnapshot`
/// timestamps, independent of wall-clock time (tests run under
/// `tokio::time::pause`, where the wall clock does not advance).
fn predictor_clock_ms() -> u64 {
    static EPOCH: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);
    EPOCH.elapsed().as_millis() as u64
}

impl std::fmt::Debug for BatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingEngine")
            .field("active_batches", &self.buffers.len())
            .field("active_batch_size_cap", &self.active_batch_size_cap())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
