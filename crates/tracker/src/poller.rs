//! Per-job status polling.
//!
//! [`JobPoller`] runs one task per active job. Each task asks the
//! provider for the job's status on a fixed interval, turns the answer
//! into a [`ProgressSnapshot`] and hands it to the caller's callback,
//! until the job reaches a terminal status. Every task has its own
//! cancellation token (a child of the poller's master token), so
//! stopping one job never affects another.
//!
//! The last good snapshot per job is cached. Provider failures re-emit
//! it marked `stale`, and terminal snapshots stay readable for a
//! retention period after polling stops so late subscribers still see
//! the outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use clipwatch_core::estimation::ProgressEstimator;
use clipwatch_core::job::{JobStatus, StatusResponse};
use clipwatch_core::snapshot::ProgressSnapshot;
use clipwatch_core::types::JobId;
use clipwatch_provider::ProviderClient;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default delay between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default lifetime of a cached terminal snapshot.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// How long [`JobPoller::shutdown`] waits for each task.
const SHUTDOWN_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives every snapshot a poll task emits.
pub type SnapshotCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Per-job polling parameters.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    /// Average completion time fed to the estimator.
    pub avg_duration_secs: f64,
    /// Time the job had already been running when polling started
    /// (non-zero when resuming a job loaded from storage).
    pub elapsed_offset: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            avg_duration_secs: clipwatch_core::estimation::DEFAULT_AVG_DURATION_SECS,
            elapsed_offset: Duration::ZERO,
        }
    }
}

pub struct JobPoller {
    provider: Arc<dyn ProviderClient>,
    estimator: ProgressEstimator,
    retention: Duration,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
    state: Arc<PollState>,
    next_generation: AtomicU64,
}

/// Bookkeeping shared between the poller and its tasks.
#[derive(Default)]
struct PollState {
    active: Mutex<HashMap<JobId, ActivePoll>>,
    cache: Mutex<HashMap<JobId, CachedSnapshot>>,
    started: Mutex<HashMap<JobId, StartTime>>,
}

struct ActivePoll {
    /// Distinguishes a replaced task from its replacement.
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct CachedSnapshot {
    snapshot: ProgressSnapshot,
    /// Set once the snapshot is terminal.
    expires_at: Option<Instant>,
}

#[derive(Clone, Copy)]
struct StartTime {
    at: Instant,
    offset: Duration,
}

impl StartTime {
    fn elapsed_secs(&self) -> f64 {
        (self.offset + self.at.elapsed()).as_secs_f64()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobPoller {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        estimator: ProgressEstimator,
        retention: Duration,
    ) -> Self {
        Self {
            provider,
            estimator,
            retention,
            cancel: CancellationToken::new(),
            state: Arc::new(PollState::default()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn estimator(&self) -> &ProgressEstimator {
        &self.estimator
    }

    /// Start polling `job_id`, emitting every snapshot to `on_snapshot`.
    ///
    /// The first status check runs immediately. A poll already running for
    /// the same id is cancelled and replaced. If the job's cached snapshot
    /// is terminal, that snapshot is emitted again and no task is spawned.
    pub fn start_polling(&self, job_id: &str, options: PollOptions, on_snapshot: SnapshotCallback) {
        if let Some(cached) = self.cached_terminal(job_id) {
            tracing::debug!(job_id, status = %cached.status, "Job already terminal, not polling");
            on_snapshot(cached);
            return;
        }

        if self.cancel.is_cancelled() {
            tracing::warn!(job_id, "Poller is shut down, not polling");
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.cancel.child_token();

        lock(&self.state.started)
            .entry(job_id.to_string())
            .or_insert(StartTime {
                at: Instant::now(),
                offset: options.elapsed_offset,
            });

        let interval = if options.interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            options.interval
        };

        let task = PollTask {
            job_id: job_id.to_string(),
            generation,
            provider: Arc::clone(&self.provider),
            estimator: self.estimator.clone(),
            interval,
            avg_duration_secs: options.avg_duration_secs,
            retention: self.retention,
            state: Arc::clone(&self.state),
            token: token.clone(),
            master: self.cancel.clone(),
            on_snapshot,
        };

        let mut active = lock(&self.state.active);
        if let Some(previous) = active.remove(job_id) {
            tracing::debug!(job_id, "Replacing existing poll task");
            previous.cancel.cancel();
        }

        let handle = tokio::spawn(task.run());
        active.insert(
            job_id.to_string(),
            ActivePoll {
                generation,
                cancel: token,
                handle,
            },
        );

        tracing::info!(
            job_id,
            interval_ms = interval.as_millis() as u64,
            avg_duration_secs = options.avg_duration_secs,
            "Polling started",
        );
    }

    /// Stop polling `job_id`. No-op if it is not being polled.
    pub fn stop_polling(&self, job_id: &str) {
        if let Some(active) = lock(&self.state.active).remove(job_id) {
            active.cancel.cancel();
            tracing::info!(job_id, "Polling stopped");
        }
    }

    /// Stop every active poll.
    pub fn stop_all(&self) {
        let drained: Vec<_> = lock(&self.state.active).drain().collect();
        for (job_id, active) in drained {
            active.cancel.cancel();
            tracing::debug!(job_id = %job_id, "Polling stopped");
        }
    }

    /// Drop every piece of state kept for `job_id`, including its cached
    /// snapshot.
    pub fn forget(&self, job_id: &str) {
        self.stop_polling(job_id);
        lock(&self.state.cache).remove(job_id);
        lock(&self.state.started).remove(job_id);
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        lock(&self.state.active).contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.state.active).len()
    }

    /// Last good snapshot for `job_id`, if one is cached and not expired.
    pub fn snapshot(&self, job_id: &str) -> Option<ProgressSnapshot> {
        self.state.cached(job_id)
    }

    /// Cancel every task, then wait up to 5 seconds per task for a clean
    /// exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job poller");
        self.cancel.cancel();

        let drained: Vec<_> = lock(&self.state.active).drain().collect();
        for (job_id, active) in drained {
            active.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_TASK_TIMEOUT, active.handle)
                .await
                .is_err()
            {
                tracing::warn!(job_id = %job_id, "Poll task did not stop in time");
            }
        }

        tracing::info!("Job poller shut down complete");
    }

    fn cached_terminal(&self, job_id: &str) -> Option<ProgressSnapshot> {
        self.state.cached(job_id).filter(ProgressSnapshot::is_terminal)
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl PollState {
    fn cached(&self, job_id: &str) -> Option<ProgressSnapshot> {
        let mut cache = lock(&self.cache);
        let expired = cache
            .get(job_id)?
            .expires_at
            .is_some_and(|at| at <= Instant::now());
        if expired {
            cache.remove(job_id);
            return None;
        }
        cache.get(job_id).map(|c| c.snapshot.clone())
    }

    fn elapsed_secs(&self, job_id: &str) -> f64 {
        lock(&self.started)
            .get(job_id)
            .map(StartTime::elapsed_secs)
            .unwrap_or(0.0)
    }

    /// Remove `job_id`'s active entry if it still belongs to `generation`.
    fn retire(&self, job_id: &str, generation: u64) {
        let mut active = lock(&self.active);
        if active.get(job_id).is_some_and(|a| a.generation == generation) {
            active.remove(job_id);
        }
        drop(active);
        lock(&self.started).remove(job_id);
    }

    fn evict_expired(&self, job_id: &str) {
        let mut cache = lock(&self.cache);
        let expired = cache
            .get(job_id)
            .and_then(|c| c.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            cache.remove(job_id);
            tracing::debug!(job_id, "Evicted terminal snapshot");
        }
    }
}

/// One job's poll loop.
struct PollTask {
    job_id: JobId,
    generation: u64,
    provider: Arc<dyn ProviderClient>,
    estimator: ProgressEstimator,
    interval: Duration,
    avg_duration_secs: f64,
    retention: Duration,
    state: Arc<PollState>,
    token: CancellationToken,
    master: CancellationToken,
    on_snapshot: SnapshotCallback,
}

impl PollTask {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    tracing::debug!(job_id = %self.job_id, "Poll task cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = self.token.cancelled() => return,
                result = self.provider.status(&self.job_id) => result,
            };

            // Results that arrive after a stop are discarded.
            if self.token.is_cancelled() {
                return;
            }

            let snapshot = match result {
                Ok(response) => self.observe(&response),
                Err(e) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        provider = self.provider.name(),
                        error = %e,
                        "Status check failed",
                    );
                    match self.state.cached(&self.job_id) {
                        Some(last) => last.as_stale(e.to_string()),
                        None => ProgressSnapshot::error_checking(&self.job_id, e.to_string()),
                    }
                }
            };

            let terminal = snapshot.is_terminal();
            if terminal {
                self.state.retire(&self.job_id, self.generation);
                if let Some(cached) = lock(&self.state.cache).get_mut(&self.job_id) {
                    cached.expires_at = Some(Instant::now() + self.retention);
                }
                tracing::info!(
                    job_id = %self.job_id,
                    status = %snapshot.status,
                    "Job reached terminal status, polling stopped",
                );
            }

            (self.on_snapshot)(snapshot);

            if terminal {
                break;
            }
        }

        tokio::select! {
            _ = self.master.cancelled() => {}
            _ = tokio::time::sleep(self.retention) => {}
        }
        self.state.evict_expired(&self.job_id);
    }

    /// Estimate and cache a fresh observation.
    ///
    /// Non-terminal snapshots never report less progress, or an earlier
    /// status, than the last cached one.
    fn observe(&self, response: &StatusResponse) -> ProgressSnapshot {
        let elapsed = self.state.elapsed_secs(&self.job_id);
        let estimate = self
            .estimator
            .estimate(response.status, elapsed, self.avg_duration_secs);
        let mut snapshot = ProgressSnapshot::from_response(&self.job_id, response, estimate);

        let mut cache = lock(&self.state.cache);
        if !snapshot.is_terminal() {
            if let Some(previous) = cache.get(&self.job_id).map(|c| &c.snapshot) {
                if previous.status.rank() > snapshot.status.rank() {
                    snapshot.status = previous.status;
                }
                snapshot.progress = snapshot.progress.max(previous.progress);
                if snapshot.status == JobStatus::Processing {
                    snapshot.stage_label = self.estimator.stage_for(snapshot.progress).to_string();
                }
            }
        }

        cache.insert(
            self.job_id.clone(),
            CachedSnapshot {
                snapshot: snapshot.clone(),
                expires_at: None,
            },
        );
        snapshot
    }
}
