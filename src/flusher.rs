use crate::buffer::{LogBuffer, PersistError};
use crate::schedule::{FlushSchedule, ScheduleError};
use crate::INTERNAL_TARGET;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use chrono::{DateTime, Utc};
use tokio::time::{sleep_until, timeout, Instant};

/// Flusher lifecycle misuse.
#[derive(thiserror::Error, Debug)]
pub enum FlusherError {
    #[error(transparent)]
    InvalidSchedule(#[from] ScheduleError),

    #[error("log flusher is already running")]
    AlreadyRunning,

    #[error("log flusher was stopped and cannot be restarted")]
    Terminated,

    #[error("no Tokio runtime available to run the log flusher")]
    NoRuntime,
}

/// Externally visible flusher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlusherState {
    Stopped,
    Running,
}

enum Lifecycle {
    Idle,
    Running {
        schedule: FlushSchedule,
        cancel: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
    Terminated,
}

/// Drains a [`LogBuffer`] on a recurring schedule and once more on stop.
///
/// `Stopped -> Running -> Stopped`; the final `Stopped` is terminal.
pub struct Flusher {
    buffer: Arc<LogBuffer>,
    lifecycle: Mutex<Lifecycle>,
}

impl Flusher {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Flusher { buffer, lifecycle: Mutex::new(Lifecycle::Idle) }
    }

    pub fn state(&self) -> FlusherState {
        match &*self.lock() {
            Lifecycle::Running { .. } => FlusherState::Running,
            Lifecycle::Idle | Lifecycle::Terminated => FlusherState::Stopped,
        }
    }

    /// Schedule of the running flusher, if any.
    pub fn schedule(&self) -> Option<FlushSchedule> {
        match &*self.lock() {
            Lifecycle::Running { schedule, .. } => Some(schedule.clone()),
            _ => None,
        }
    }

    /// Parse `expr` and start flushing on that schedule.
    pub fn start(&self, expr: &str) -> Result<(), FlusherError> {
        let schedule = FlushSchedule::parse(expr)?;
        self.start_with(schedule)
    }

    /// Start flushing on an already parsed schedule. Must be called from
    /// within a Tokio runtime.
    pub fn start_with(&self, schedule: FlushSchedule) -> Result<(), FlusherError> {
        let mut lifecycle = self.lock();
        match &*lifecycle {
            Lifecycle::Running { .. } => return Err(FlusherError::AlreadyRunning),
            Lifecycle::Terminated => return Err(FlusherError::Terminated),
            Lifecycle::Idle => {}
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| FlusherError::NoRuntime)?;
        let (cancel, cancelled) = oneshot::channel();
        let task = handle.spawn(run(Arc::clone(&self.buffer), schedule.clone(), cancelled));

        tracing::info!(target: INTERNAL_TARGET, %schedule, "log flusher started");
        *lifecycle = Lifecycle::Running { schedule, cancel, task };
        Ok(())
    }

    /// Cancel the schedule and drain whatever is still buffered.
    ///
    /// Waits (bounded by the buffer's persist timeout) for an in-progress
    /// tick and for detached threshold flushes before the final drain. On
    /// an already stopped flusher only the final drain happens.
    pub async fn stop(&self) -> Result<usize, PersistError> {
        let previous = std::mem::replace(&mut *self.lock(), Lifecycle::Terminated);
        let limit = self.buffer.persist_timeout();

        if let Lifecycle::Running { cancel, mut task, .. } = previous {
            tracing::info!(target: INTERNAL_TARGET, "stopping log flusher");
            let _ = cancel.send(());
            if timeout(limit, &mut task).await.is_err() {
                tracing::warn!(target: INTERNAL_TARGET, "log flusher tick still running at shutdown, aborting it");
                task.abort();
            }
        }

        if !self.buffer.wait_for_detached(limit).await {
            tracing::warn!(target: INTERNAL_TARGET, "threshold flushes still in flight at shutdown");
        }

        let result = self.buffer.drain_and_persist().await;
        match &result {
            Ok(count) => tracing::info!(target: INTERNAL_TARGET, count, "final log flush done"),
            Err(err) => tracing::error!(target: INTERNAL_TARGET, error = %err, lost = err.lost(), "final log flush failed"),
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tracks the next fire time of a schedule.
///
/// `@every` deadlines advance by the period on the Tokio clock, skipping
/// ticks that were missed while a flush ran long. Cron fire times come from
/// the wall clock, taken as the later of `Utc::now()` and the start time
/// plus elapsed Tokio time, so a paused or lagging wall clock cannot make
/// the same fire time come round twice.
struct Ticks {
    schedule: FlushSchedule,
    deadline: Instant,
    origin: Instant,
    origin_wall: DateTime<Utc>,
    cursor: DateTime<Utc>,
}

impl Ticks {
    fn new(schedule: FlushSchedule) -> Self {
        let (origin, origin_wall) = (Instant::now(), Utc::now());
        Ticks { schedule, deadline: origin, origin, origin_wall, cursor: origin_wall }
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        let now = Instant::now();
        match self.schedule.interval() {
            Some(period) => {
                self.deadline += period;
                while self.deadline < now {
                    self.deadline += period;
                }
            }
            None => {
                let elapsed = chrono::Duration::from_std(now - self.origin)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                let wall = Utc::now().max(self.origin_wall + elapsed);
                let fire = self.schedule.next_after(wall.max(self.cursor))?;
                self.cursor = fire;
                self.deadline = now + (fire - wall).to_std().unwrap_or_default();
            }
        }
        Some(self.deadline)
    }
}

async fn run(buffer: Arc<LogBuffer>, schedule: FlushSchedule, mut cancelled: oneshot::Receiver<()>) {
    let mut ticks = Ticks::new(schedule);

    loop {
        let Some(deadline) = ticks.next_deadline() else {
            tracing::warn!(target: INTERNAL_TARGET, "flush schedule has no future fire times");
            let _ = cancelled.await;
            return;
        };

        tokio::select! {
            biased;
            // Fires on stop() and when the Flusher is dropped.
            _ = &mut cancelled => break,
            _ = sleep_until(deadline) => {
                tracing::info!(target: INTERNAL_TARGET, pending = buffer.len(), "flushing logs to store");
                if let Err(err) = buffer.drain_and_persist().await {
                    tracing::error!(target: INTERNAL_TARGET, error = %err, lost = err.lost(), "scheduled log flush failed");
                }
            }
        }
    }
}
