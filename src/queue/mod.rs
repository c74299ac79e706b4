//! Coalescing write-behind queue between edit capture and the patch manager.
//!
//! Architecture:
//! ```text
//! offer(key, patch) ──► per-key BatchBuffer ──► FlushScheduler
//!                            │                     │
//!                            │      capacity OR debounce trigger
//!                            ▼                     ▼
//!                       drain snapshot ──► PatchManager::apply_patch
//!                            ▲                     │
//!                            └── re-arm if patches arrived meanwhile
//! ```
//!
//! Guarantees per file key:
//! - no patch is lost, reordered, or duplicated across flushes
//! - at most one in-flight `apply_patch` call at a time
//! - `offer` never blocks on the patch manager
//! - different keys never contend on a shared lock once created
//!
//! Flush-time failures never surface through `offer`; they are delivered
//! asynchronously on the queue's event stream and handled according to
//! the configured [`FailurePolicy`].

pub mod buffer;
pub mod debounce;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};

use crate::patch::{FileKey, Patch};
use buffer::BatchBuffer;
use debounce::DebounceTimer;

/// Outcome of a downstream apply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The manager rejected the batch.
    Rejected(String),
    /// The connection to the manager's backing service was lost.
    ConnectionLost,
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "patch batch rejected: {reason}"),
            Self::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

impl std::error::Error for ApplyError {}

/// Downstream collaborator that durably applies an ordered batch of
/// patches to a file. May block; may be called concurrently for
/// different keys; is never called concurrently for the same key by
/// this queue.
pub trait PatchManager: Send + Sync {
    fn apply_patch(&self, key: FileKey, batch: Vec<Patch>) -> BoxFuture<'_, Result<(), ApplyError>>;
}

/// What to do with a drained batch when `apply_patch` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Re-queue the failed batch ahead of patches accumulated since,
    /// preserving offer order. After `max_attempts` consecutive
    /// failures for a key the batch is reported and discarded so a
    /// poisoned batch cannot wedge the key forever.
    Retry { max_attempts: u32 },
    /// Report the failed batch on the event stream and discard it.
    Drop,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum buffered patch count per key before an immediate flush.
    pub capacity: usize,
    /// Quiet period with no new offer before a non-capacity flush fires.
    pub debounce: Duration,
    /// Flush-failure handling policy.
    pub failure_policy: FailurePolicy,
    /// Buffered capacity of the flush-event channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            debounce: Duration::from_millis(50),
            failure_policy: FailurePolicy::Retry { max_attempts: 3 },
            event_capacity: 256,
        }
    }
}

impl QueueConfig {
    /// Config for testing (small capacity, short debounce).
    pub fn for_testing() -> Self {
        Self {
            capacity: 4,
            debounce: Duration::from_millis(20),
            ..Self::default()
        }
    }

    /// Reject configurations the queue cannot honor.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.capacity == 0 {
            return Err(QueueError::InvalidCapacity);
        }
        if self.debounce.is_zero() {
            return Err(QueueError::InvalidDebounce);
        }
        if let FailurePolicy::Retry { max_attempts: 0 } = self.failure_policy {
            return Err(QueueError::InvalidRetryAttempts);
        }
        if self.event_capacity == 0 {
            return Err(QueueError::InvalidEventCapacity);
        }
        Ok(())
    }
}

/// Configuration-time errors. The queue raises nothing through `offer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    InvalidCapacity,
    InvalidDebounce,
    InvalidRetryAttempts,
    InvalidEventCapacity,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCapacity => write!(f, "capacity must be greater than zero"),
            Self::InvalidDebounce => write!(f, "debounce interval must be greater than zero"),
            Self::InvalidRetryAttempts => write!(f, "retry policy needs at least one attempt"),
            Self::InvalidEventCapacity => {
                write!(f, "event channel capacity must be greater than zero")
            }
        }
    }
}

impl std::error::Error for QueueError {}

/// Snapshot of queue health across all keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Keys with per-key state allocated.
    pub keys: usize,
    /// Patches currently buffered (not in flight).
    pub buffered: usize,
    /// Total patches offered since creation.
    pub total_appended: u64,
    /// Total patches handed to flushes since creation.
    pub total_drained: u64,
    /// Total patches re-queued by the retry policy since creation.
    pub total_requeued: u64,
}

/// Asynchronous flush outcomes, delivered on the queue's event stream.
#[derive(Debug, Clone)]
pub enum FlushEvent {
    /// A batch was applied downstream.
    Flushed { key: FileKey, patches: usize },
    /// A batch failed and was re-queued ahead of newer patches.
    RetryQueued {
        key: FileKey,
        patches: usize,
        attempt: u32,
        error: ApplyError,
    },
    /// A batch failed and was discarded.
    BatchDropped {
        key: FileKey,
        patches: usize,
        error: ApplyError,
    },
}

/// Per-key mutable state, guarded by the key's own lock.
struct KeyInner {
    buffer: BatchBuffer,
    in_flight: bool,
    timer: DebounceTimer,
    /// Consecutive apply failures for this key, reset on success.
    failures: u32,
}

/// Per-key state: created lazily on first offer, retained for the
/// lifetime of the queue so repeated offers stay cheap.
struct KeyState {
    key: FileKey,
    inner: Mutex<KeyInner>,
    /// Signalled whenever an in-flight apply completes; shutdown waits on it.
    flight_done: Notify,
}

impl KeyState {
    fn new(key: FileKey) -> Self {
        Self {
            key,
            inner: Mutex::new(KeyInner {
                buffer: BatchBuffer::new(),
                in_flight: false,
                timer: DebounceTimer::new(),
                failures: 0,
            }),
            flight_done: Notify::new(),
        }
    }
}

struct Shared {
    config: QueueConfig,
    manager: Arc<dyn PatchManager>,
    keys: RwLock<HashMap<FileKey, Arc<KeyState>>>,
    event_tx: mpsc::Sender<FlushEvent>,
    closed: AtomicBool,
}

impl Shared {
    /// Get or create the state for a key. Fast path is a read lock.
    async fn key_state(&self, key: FileKey) -> Arc<KeyState> {
        {
            let keys = self.keys.read().await;
            if let Some(state) = keys.get(&key) {
                return state.clone();
            }
        }
        let mut keys = self.keys.write().await;
        keys.entry(key.clone())
            .or_insert_with(|| Arc::new(KeyState::new(key)))
            .clone()
    }

    fn emit(&self, event: FlushEvent) {
        // The event stream is advisory; a full or dropped receiver must
        // never block or wedge a flush. A lost drop report still leaves
        // a trace in the log.
        if let Err(err) = self.event_tx.try_send(event) {
            if let FlushEvent::BatchDropped { key, patches, .. } = err.into_inner() {
                log::warn!("event channel full, lost drop report for key {key} ({patches} patches)");
            }
        }
    }

    /// Decide what the buffer's current contents mean for scheduling.
    /// Called with the key lock held, after every append and after every
    /// flush completion.
    fn schedule(shared: &Arc<Shared>, state: &Arc<KeyState>, inner: &mut KeyInner) {
        if inner.in_flight || inner.buffer.is_empty() {
            // An in-flight completion re-schedules; an empty buffer is idle.
            return;
        }
        if inner.buffer.len() >= shared.config.capacity {
            // Capacity trigger: fire now and cancel the pending debounce
            // timer so a stale fire cannot duplicate the flush.
            Shared::begin_flush(shared, state, inner);
            return;
        }
        // Debounce trigger: re-arm from zero on every offer.
        let fire_shared = shared.clone();
        let fire_state = state.clone();
        inner
            .timer
            .arm(shared.config.debounce, move |generation| async move {
                Shared::debounce_fired(fire_shared, fire_state, generation).await;
            });
    }

    async fn debounce_fired(shared: Arc<Shared>, state: Arc<KeyState>, generation: u64) {
        let mut inner = state.inner.lock().await;
        if !inner.timer.is_current(generation) || inner.in_flight {
            // Lost the race with a cancel, re-arm, or capacity flush.
            return;
        }
        Shared::begin_flush(&shared, &state, &mut inner);
    }

    /// Drain the buffer and hand the snapshot to a background apply task.
    /// Called with the key lock held.
    fn begin_flush(shared: &Arc<Shared>, state: &Arc<KeyState>, inner: &mut KeyInner) {
        inner.timer.cancel();
        let batch = inner.buffer.drain();
        if batch.is_empty() {
            // Nothing arrived since the trigger armed: back to idle.
            return;
        }
        inner.in_flight = true;
        let shared = shared.clone();
        let state = state.clone();
        tokio::spawn(async move {
            Shared::run_flush(shared, state, batch).await;
        });
    }

    /// Apply one drained batch off the caller's thread, then re-arm the
    /// key if patches accumulated during the call.
    async fn run_flush(shared: Arc<Shared>, state: Arc<KeyState>, batch: Vec<Patch>) {
        let count = batch.len();
        let retry_copy = match shared.config.failure_policy {
            FailurePolicy::Retry { .. } => Some(batch.clone()),
            FailurePolicy::Drop => None,
        };

        let result = shared.manager.apply_patch(state.key.clone(), batch).await;

        let mut inner = state.inner.lock().await;
        match result {
            Ok(()) => {
                inner.failures = 0;
                log::debug!("flushed {count} patches for key {}", state.key);
                shared.emit(FlushEvent::Flushed {
                    key: state.key.clone(),
                    patches: count,
                });
            }
            Err(error) => {
                let attempt = inner.failures + 1;
                match (shared.config.failure_policy, retry_copy) {
                    (FailurePolicy::Retry { max_attempts }, Some(copy)) if attempt < max_attempts => {
                        inner.failures = attempt;
                        inner.buffer.requeue_front(copy);
                        log::warn!(
                            "apply failed for key {} (attempt {attempt}), re-queueing {count} patches: {error}",
                            state.key
                        );
                        shared.emit(FlushEvent::RetryQueued {
                            key: state.key.clone(),
                            patches: count,
                            attempt,
                            error,
                        });
                    }
                    _ => {
                        inner.failures = 0;
                        log::error!(
                            "apply failed for key {}, dropping {count} patches: {error}",
                            state.key
                        );
                        shared.emit(FlushEvent::BatchDropped {
                            key: state.key.clone(),
                            patches: count,
                            error,
                        });
                    }
                }
            }
        }

        inner.in_flight = false;
        // Patches that arrived during the apply call are not left waiting
        // indefinitely: schedule the next flush with the timer armed from
        // zero (or immediately, if the buffer already hit capacity).
        Shared::schedule(&shared, &state, &mut inner);
        drop(inner);
        state.flight_done.notify_one();
    }
}

/// The coalescing queue. See the module docs for guarantees.
pub struct CoalescingQueue {
    shared: Arc<Shared>,
    event_rx: Option<mpsc::Receiver<FlushEvent>>,
}

impl CoalescingQueue {
    /// Create a queue over the given patch manager.
    ///
    /// Rejects a zero capacity or zero debounce interval.
    pub fn new(config: QueueConfig, manager: Arc<dyn PatchManager>) -> Result<Self, QueueError> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                manager,
                keys: RwLock::new(HashMap::new()),
                event_tx,
                closed: AtomicBool::new(false),
            }),
            event_rx: Some(event_rx),
        })
    }

    /// Take the flush-event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<FlushEvent>> {
        self.event_rx.take()
    }

    /// Offer a single patch for `key`. Fire-and-forget: never blocks on
    /// the patch manager and never raises.
    pub async fn offer(&self, key: impl Into<FileKey>, patch: Patch) {
        self.offer_all(key, vec![patch]).await;
    }

    /// Offer an ordered batch of patches for `key` atomically: a flush
    /// never observes a partially appended batch. An empty batch is a
    /// no-op.
    pub async fn offer_all(&self, key: impl Into<FileKey>, patches: Vec<Patch>) {
        if patches.is_empty() {
            return;
        }
        if self.shared.closed.load(Ordering::Acquire) {
            log::warn!("offer after shutdown, dropping {} patches", patches.len());
            return;
        }
        let state = self.shared.key_state(key.into()).await;
        let mut inner = state.inner.lock().await;
        inner.buffer.append_all(patches);
        Shared::schedule(&self.shared, &state, &mut inner);
    }

    /// Number of patches currently buffered (not in flight) for `key`.
    pub async fn pending(&self, key: &str) -> usize {
        let state = {
            let keys = self.shared.keys.read().await;
            keys.get(key).cloned()
        };
        match state {
            Some(state) => state.inner.lock().await.buffer.len(),
            None => 0,
        }
    }

    /// Number of keys with per-key state allocated.
    pub async fn key_count(&self) -> usize {
        self.shared.keys.read().await.len()
    }

    /// Aggregate buffer statistics across all keys.
    pub async fn stats(&self) -> QueueStats {
        let states: Vec<Arc<KeyState>> = {
            let keys = self.shared.keys.read().await;
            keys.values().cloned().collect()
        };
        let mut stats = QueueStats {
            keys: states.len(),
            ..QueueStats::default()
        };
        for state in states {
            let inner = state.inner.lock().await;
            stats.buffered += inner.buffer.len();
            stats.total_appended += inner.buffer.total_appended();
            stats.total_drained += inner.buffer.total_drained();
            stats.total_requeued += inner.buffer.total_requeued();
        }
        stats
    }

    /// Whether the queue has been shut down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Stop accepting offers, wait out in-flight applies, and force-flush
    /// every non-empty buffer so no offered patch is silently dropped.
    ///
    /// Shutdown flushes are applied inline with no retry; a failure is
    /// reported on the event stream and the batch discarded.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let states: Vec<Arc<KeyState>> = {
            let keys = self.shared.keys.read().await;
            keys.values().cloned().collect()
        };

        for state in states {
            loop {
                let mut inner = state.inner.lock().await;
                inner.timer.cancel();
                if inner.in_flight {
                    let done = state.flight_done.notified();
                    drop(inner);
                    done.await;
                    continue;
                }
                let batch = inner.buffer.drain();
                drop(inner);
                if batch.is_empty() {
                    break;
                }
                let count = batch.len();
                match self
                    .shared
                    .manager
                    .apply_patch(state.key.clone(), batch)
                    .await
                {
                    Ok(()) => {
                        self.shared.emit(FlushEvent::Flushed {
                            key: state.key.clone(),
                            patches: count,
                        });
                    }
                    Err(error) => {
                        log::error!(
                            "shutdown flush failed for key {}, dropping {count} patches: {error}",
                            state.key
                        );
                        self.shared.emit(FlushEvent::BatchDropped {
                            key: state.key.clone(),
                            patches: count,
                            error,
                        });
                    }
                }
            }
        }
        log::info!("coalescing queue shut down");
    }
}
