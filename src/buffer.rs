use crate::event::LogEvent;
use crate::store::{BoxError, LogStore};
use crate::INTERNAL_TARGET;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tokio::sync::{Notify, Semaphore};
use tokio::time::{timeout, Duration};

/// Events held before a threshold flush when nothing else is configured.
pub const DEFAULT_CAPACITY: usize = 100;

/// Threshold batches that may wait for a detached persist on a
/// current-thread runtime.
pub const MAX_DETACHED_BATCHES: usize = 4;

/// Upper bound on a single `insert_batch` call.
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

/// A drained batch could not be persisted. The batch is gone either way.
#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error("log store rejected batch of {count} events: {source}")]
    Store {
        count: usize,
        #[source]
        source: BoxError,
    },

    #[error("log store did not accept batch of {count} events within {timeout:?}")]
    Timeout { count: usize, timeout: Duration },
}

impl PersistError {
    /// Number of events lost with the failed batch.
    pub fn lost(&self) -> usize {
        match self {
            PersistError::Store { count, .. } | PersistError::Timeout { count, .. } => *count,
        }
    }
}

/// Point-in-time copy of the buffer counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Events accepted by `append`/`append_blocking`.
    pub appended: u64,
    /// Events the store acknowledged.
    pub persisted: u64,
    /// Events drained into a batch that then failed.
    pub lost: u64,
    /// Batches the store acknowledged.
    pub batches: u64,
    pub failed_batches: u64,
    /// Flushes started because the buffer reached capacity.
    pub threshold_flushes: u64,
}

#[derive(Default)]
struct Counters {
    appended: AtomicU64,
    persisted: AtomicU64,
    lost: AtomicU64,
    batches: AtomicU64,
    failed_batches: AtomicU64,
    threshold_flushes: AtomicU64,
}

/// Bounded in-memory holding area for events on their way to a
/// [`LogStore`].
///
/// All access to the pending sequence goes through one mutex, held only for
/// a push or for swapping the whole `Vec` out. Draining never copies events
/// one by one, so the critical section does not grow with the batch size.
///
/// A failed persist does not put events back: memory stays bounded at the
/// cost of losing that batch.
pub struct LogBuffer {
    events: Mutex<Vec<LogEvent>>,
    capacity: usize,
    store: Arc<dyn LogStore>,
    persist_timeout: Duration,
    counters: Counters,
    detached: AtomicUsize,
    detached_idle: Notify,
    detached_gate: Semaphore,
    blocking_runtime: OnceLock<Option<Runtime>>,
}

impl LogBuffer {
    /// Create a buffer flushing into `store` once `capacity` events are
    /// pending. A capacity of zero is raised to one.
    pub fn new(store: Arc<dyn LogStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LogBuffer {
            events: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            store,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            counters: Counters::default(),
            detached: AtomicUsize::new(0),
            detached_idle: Notify::new(),
            detached_gate: Semaphore::new(1),
            blocking_runtime: OnceLock::new(),
        }
    }

    pub fn with_persist_timeout(mut self, persist_timeout: Duration) -> Self {
        // Enforce a minimal timeout to avoid failing every batch.
        self.persist_timeout = persist_timeout.max(Duration::from_millis(10));
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn persist_timeout(&self) -> Duration {
        self.persist_timeout
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BufferStats {
        let c = &self.counters;
        BufferStats {
            appended: c.appended.load(Ordering::Relaxed),
            persisted: c.persisted.load(Ordering::Relaxed),
            lost: c.lost.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            threshold_flushes: c.threshold_flushes.load(Ordering::Relaxed),
        }
    }

    /// Add one event. If that fills the buffer, the whole content is
    /// swapped out and persisted before this returns, so the caller absorbs
    /// the store latency. Persist failures are logged, not returned.
    pub async fn append(&self, event: LogEvent) {
        if let Some(batch) = self.enqueue(event) {
            if let Err(err) = self.persist(batch).await {
                report_threshold_failure(&err);
            }
        }
    }

    /// Synchronous [`append`](Self::append) for callers that cannot await.
    ///
    /// The swap happens on the calling thread in every case, and the caller
    /// then blocks on the persist like `append` does:
    ///
    /// - outside a runtime, on a private current-thread runtime
    /// - on a multi-thread runtime, through `block_in_place`
    ///
    /// A current-thread runtime cannot be blocked from inside, so there the
    /// batch is persisted on a detached task instead. Detached batches are
    /// written one at a time and at most [`MAX_DETACHED_BATCHES`] may be
    /// outstanding. Past that a batch is dropped and counted as lost.
    /// [`wait_for_detached`](Self::wait_for_detached) waits for them.
    pub fn append_blocking(self: &Arc<Self>, event: LogEvent) {
        let Some(batch) = self.enqueue(event) else {
            return;
        };

        let result = match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
                self.persist_detached(&handle, batch);
                return;
            }
            Ok(handle) => tokio::task::block_in_place(|| handle.block_on(self.persist(batch))),
            Err(_) => match self.blocking_runtime() {
                Some(rt) => rt.block_on(self.persist(batch)),
                None => {
                    self.discard(batch.len(), "no runtime available to persist log batch");
                    return;
                }
            },
        };
        if let Err(err) = result {
            report_threshold_failure(&err);
        }
    }

    fn persist_detached(self: &Arc<Self>, handle: &Handle, batch: Vec<LogEvent>) {
        let admitted = self
            .detached
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < MAX_DETACHED_BATCHES).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            self.discard(batch.len(), "too many log batches waiting to be persisted");
            return;
        }

        let buffer = Arc::clone(self);
        handle.spawn(async move {
            let permit = buffer.detached_gate.acquire().await;
            if let Err(err) = buffer.persist(batch).await {
                report_threshold_failure(&err);
            }
            drop(permit);
            if buffer.detached.fetch_sub(1, Ordering::SeqCst) == 1 {
                buffer.detached_idle.notify_waiters();
            }
        });
    }

    fn discard(&self, count: usize, reason: &'static str) {
        self.counters.lost.fetch_add(count as u64, Ordering::Relaxed);
        self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
        tracing::error!(target: INTERNAL_TARGET, lost = count, "{}", reason);
    }

    /// Swap the pending events out for an empty sequence and return them.
    /// On an empty buffer this returns an empty `Vec` and changes nothing.
    pub fn drain(&self) -> Vec<LogEvent> {
        let mut events = self.lock();
        if events.is_empty() {
            return Vec::new();
        }
        std::mem::replace(&mut *events, Vec::with_capacity(self.capacity))
    }

    /// Drain and hand a non-empty batch to the store.
    ///
    /// **Returns**
    /// - `Ok(n)` with the number of events persisted (0 if nothing was
    ///   pending, in which case the store is not called).
    /// - `Err(..)` if the store failed or timed out. The drained events are
    ///   not restored.
    pub async fn drain_and_persist(&self) -> Result<usize, PersistError> {
        let batch = self.drain();
        if batch.is_empty() {
            return Ok(0);
        }
        self.persist(batch).await
    }

    /// Wait until no detached threshold flush is in flight, or until
    /// `limit` passes. Returns `false` on timeout.
    pub async fn wait_for_detached(&self, limit: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.detached_idle.notified();
                if self.detached.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        timeout(limit, idle).await.is_ok()
    }

    fn enqueue(&self, event: LogEvent) -> Option<Vec<LogEvent>> {
        let mut events = self.lock();
        events.push(event);
        self.counters.appended.fetch_add(1, Ordering::Relaxed);
        if events.len() < self.capacity {
            return None;
        }
        self.counters.threshold_flushes.fetch_add(1, Ordering::Relaxed);
        Some(std::mem::replace(&mut *events, Vec::with_capacity(self.capacity)))
    }

    async fn persist(&self, batch: Vec<LogEvent>) -> Result<usize, PersistError> {
        let count = batch.len();
        let result = match timeout(self.persist_timeout, self.store.insert_batch(&batch)).await {
            Ok(Ok(())) => Ok(count),
            Ok(Err(source)) => Err(PersistError::Store { count, source }),
            Err(_) => Err(PersistError::Timeout { count, timeout: self.persist_timeout }),
        };

        match &result {
            Ok(_) => {
                self.counters.persisted.fetch_add(count as u64, Ordering::Relaxed);
                self.counters.batches.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target: INTERNAL_TARGET, count, "persisted log batch");
            }
            Err(_) => {
                self.counters.lost.fetch_add(count as u64, Ordering::Relaxed);
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEvent>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn blocking_runtime(&self) -> Option<&Runtime> {
        self.blocking_runtime
            .get_or_init(|| match Builder::new_current_thread().enable_all().build() {
                Ok(rt) => Some(rt),
                Err(e) => {
                    tracing::error!(target: INTERNAL_TARGET, error = %e, "failed to build log flush runtime");
                    None
                }
            })
            .as_ref()
    }
}

impl Drop for LogBuffer {
    fn drop(&mut self) {
        // Dropping a runtime from async code panics; shut it down in the
        // background instead.
        if let Some(Some(rt)) = self.blocking_runtime.take() {
            rt.shutdown_background();
        }
    }
}

fn report_threshold_failure(err: &PersistError) {
    tracing::error!(target: INTERNAL_TARGET, error = %err, lost = err.lost(), "threshold flush failed");
}
