//! The job tracker.
//!
//! [`JobTracker`] owns a provider, a [`JobPoller`], the in-memory job
//! collection and a [`JobStore`]. Poll tasks never touch the collection
//! themselves: their snapshots are sent to a single applier task that
//! fans them out to subscribers, advances the matching job, persists it
//! and publishes [`TrackerEvent`]s. Every collection mutation takes the
//! collection's write lock exactly once and persists before releasing it,
//! so the store sees writes in the same order as the collection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use clipwatch_core::collection::{self, JobFilter};
use clipwatch_core::error::CoreError;
use clipwatch_core::estimation::ProgressEstimator;
use clipwatch_core::job::{Job, JobPatch, JobStatus, StatusResponse, Transition};
use clipwatch_core::snapshot::ProgressSnapshot;
use clipwatch_core::types::{JobId, Timestamp};
use clipwatch_core::validation::{filter_loadable, is_durable};
use clipwatch_provider::{GenerationInput, ProviderClient};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::error::{StoreError, TrackerError};
use crate::events::{TrackerEvent, EVENT_CHANNEL_CAPACITY};
use crate::poller::{JobPoller, PollOptions, SnapshotCallback};
use crate::store::{JobStore, StoreInfo};

/// How long [`JobTracker::shutdown`] waits for the applier task.
const APPLIER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Optional parameters of [`JobTracker::create_job`].
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Requested clip length in seconds.
    pub duration_secs: Option<u32>,
    pub aspect_ratio: Option<String>,
    /// Overrides the provider's configured model.
    pub model: Option<String>,
    /// Image to animate.
    pub start_image: Option<String>,
    pub negative_prompt: Option<String>,
    /// Caller grouping key, matched by [`JobFilter::group_id`].
    pub group_id: Option<String>,
}

impl JobOptions {
    fn to_input(&self, prompt: &str) -> GenerationInput {
        let mut input = GenerationInput::new(prompt);
        if let Some(secs) = self.duration_secs {
            input = input.with_duration(secs);
        }
        if let Some(image) = &self.start_image {
            input = input.with_start_image(image.clone());
        }
        if let Some(ratio) = &self.aspect_ratio {
            input.aspect_ratio = ratio.clone();
        }
        if let Some(negative) = &self.negative_prompt {
            input.negative_prompt = negative.clone();
        }
        input.model = self.model.clone();
        input
    }
}

/// Shared handle to the tracker. Cheap to clone.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    provider: Arc<dyn ProviderClient>,
    poller: JobPoller,
    store: Arc<dyn JobStore>,
    jobs: RwLock<Vec<Job>>,
    subscribers: Mutex<HashMap<JobId, Vec<Subscriber>>>,
    next_subscriber: AtomicU64,
    event_tx: broadcast::Sender<TrackerEvent>,
    snapshot_tx: mpsc::UnboundedSender<ProgressSnapshot>,
    config: TrackerConfig,
    cancel: CancellationToken,
    applier: Mutex<Option<JoinHandle<()>>>,
}

struct Subscriber {
    id: u64,
    callback: SnapshotCallback,
    /// `observed_at` of the newest snapshot handed to `callback`.
    seen: Option<Timestamp>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registered snapshot callback.
///
/// Dropping the subscription, or calling [`Subscription::unsubscribe`],
/// detaches the callback. Polling is not affected.
#[derive(Debug)]
#[must_use = "dropping a Subscription detaches its callback"]
pub struct Subscription {
    job_id: JobId,
    id: u64,
    tracker: Weak<TrackerInner>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn unsubscribe(self) {
        self.detach();
    }

    fn detach(&self) {
        if let Some(inner) = self.tracker.upgrade() {
            inner.remove_subscriber(&self.job_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl JobTracker {
    /// Build a tracker and start its applier task.
    ///
    /// Must be called from within a Tokio runtime. Call
    /// [`JobTracker::load`] afterwards to hydrate from the store.
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        store: Arc<dyn JobStore>,
        config: TrackerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();

        let poller = JobPoller::new(
            Arc::clone(&provider),
            ProgressEstimator::new(config.estimator.clone()),
            config.retention,
        );

        let inner = Arc::new(TrackerInner {
            provider,
            poller,
            store,
            jobs: RwLock::new(Vec::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            event_tx,
            snapshot_tx,
            config,
            cancel: CancellationToken::new(),
            applier: Mutex::new(None),
        });

        let handle = tokio::spawn(run_applier(
            Arc::downgrade(&inner),
            snapshot_rx,
            inner.cancel.clone(),
        ));
        *lock(&inner.applier) = Some(handle);

        Self { inner }
    }

    /// Receive lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Submit a generation request and start following it.
    ///
    /// The new job is added to the collection and persisted before
    /// polling starts. A store failure is logged and published as
    /// [`TrackerEvent::PersistSkipped`]; it does not fail the call.
    pub async fn create_job(&self, prompt: &str, options: JobOptions) -> Result<JobId, TrackerError> {
        let input = options.to_input(prompt);
        let job_id = self.inner.provider.create(&input).await?;

        let mut job = Job::new(job_id.clone(), input.prompt.clone());
        job.duration_hint = Some(input.duration_secs);
        job.model_hint = input.model.clone();
        job.aspect_ratio = Some(input.aspect_ratio.clone());
        job.source_image = input.start_image.clone();
        job.group_id = options.group_id.clone();

        {
            let mut jobs = self.inner.jobs.write().await;
            *jobs = collection::merge(std::mem::take(&mut *jobs), vec![job.clone()]);
            self.inner.persist(&job).await;
        }

        self.inner.publish(TrackerEvent::JobCreated { job: job.clone() });

        tracing::info!(
            job_id = %job_id,
            provider = self.inner.provider.name(),
            duration_secs = input.duration_secs,
            "Job created",
        );

        self.inner.start_polling(&job, Duration::ZERO);
        Ok(job_id)
    }

    /// Register `on_snapshot` for `job_id`'s progress.
    ///
    /// The latest known snapshot is delivered immediately, before any
    /// later one. Subscribing to a non-terminal job that is not being
    /// polled (e.g. after [`JobTracker::load`]) resumes polling.
    ///
    /// The immediate delivery happens while the subscriber registry is
    /// locked: `on_snapshot` must not subscribe or drop a [`Subscription`].
    pub async fn subscribe<F>(&self, job_id: &str, on_snapshot: F) -> Result<Subscription, TrackerError>
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'static,
    {
        let job = self
            .get_job(job_id)
            .await
            .ok_or_else(|| CoreError::NotFound(job_id.to_string()))?;
        let callback: SnapshotCallback = Arc::new(on_snapshot);

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription {
            job_id: job.id.clone(),
            id,
            tracker: Arc::downgrade(&self.inner),
        };

        // The applier takes the subscriber lock before notifying, so a
        // terminal snapshot cached after this read is delivered to the
        // new subscriber by the applier, and never before the immediate one.
        let terminal = {
            let mut subscribers = lock(&self.inner.subscribers);
            let cached = self.inner.poller.snapshot(job_id);
            let terminal =
                job.is_terminal() || cached.as_ref().is_some_and(ProgressSnapshot::is_terminal);

            let current = cached.or_else(|| job.is_terminal().then(|| self.inner.snapshot_of(&job)));
            let seen = current.as_ref().map(|snapshot| snapshot.observed_at);
            if let Some(snapshot) = current {
                callback(snapshot);
            }

            if !terminal {
                subscribers
                    .entry(job.id.clone())
                    .or_default()
                    .push(Subscriber { id, callback, seen });
            }
            terminal
        };

        if terminal {
            return Ok(subscription);
        }

        if !self.inner.poller.is_polling(job_id) {
            self.inner.start_polling(&job, elapsed_since_creation(&job));
        }

        Ok(subscription)
    }

    /// Ask the provider to cancel `job_id`.
    ///
    /// Polling continues, so the `canceled` status reaches subscribers
    /// and the store the same way any other status does. Canceling a
    /// terminal job is a no-op.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), TrackerError> {
        let job = self
            .get_job(job_id)
            .await
            .ok_or_else(|| CoreError::NotFound(job_id.to_string()))?;

        if job.is_terminal() {
            tracing::info!(job_id, status = %job.status, "Cancel ignored, job already terminal");
            return Ok(());
        }

        self.inner.provider.cancel(job_id).await?;
        tracing::info!(job_id, "Cancel requested");

        if !self.inner.poller.is_polling(job_id) {
            self.inner.start_polling(&job, elapsed_since_creation(&job));
        }
        Ok(())
    }

    /// Jobs matching `filter`, in collection order.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        collection::filter(&self.inner.jobs.read().await, filter)
    }

    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        self.inner
            .jobs
            .read()
            .await
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
    }

    /// Apply a caller-driven patch to `job_id` and persist the result.
    ///
    /// A patch that would move the job to an earlier status, change a
    /// terminal status, or mark it succeeded without a durable result URL
    /// is refused as a whole with [`CoreError::Validation`].
    pub async fn update_job(&self, job_id: &str, patch: &JobPatch) -> Result<Job, TrackerError> {
        let mut jobs = self.inner.jobs.write().await;
        let current = jobs
            .iter()
            .find(|job| job.id == job_id)
            .ok_or_else(|| CoreError::NotFound(job_id.to_string()))?;
        patch.validate(current)?;

        *jobs = collection::update_by_id(std::mem::take(&mut *jobs), job_id, patch);
        let updated = jobs
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(job_id.to_string()))?;

        self.inner.persist(&updated).await;
        Ok(updated)
    }

    /// Stop following `job_id` and delete it from memory and the store.
    pub async fn remove_job(&self, job_id: &str) -> Result<(), TrackerError> {
        self.inner.poller.forget(job_id);
        lock(&self.inner.subscribers).remove(job_id);

        let mut jobs = self.inner.jobs.write().await;
        *jobs = collection::remove_by_id(std::mem::take(&mut *jobs), job_id);
        self.inner.store.delete(job_id).await?;
        drop(jobs);
        tracing::info!(job_id, "Job removed");
        Ok(())
    }

    /// Hydrate the collection from the store and resume polling of jobs
    /// that had not finished. Returns the number of records loaded.
    ///
    /// Succeeded records whose result URL is not durable, or has passed a
    /// provider expiry, are skipped. Records already in memory win over
    /// stored ones.
    pub async fn load(&self) -> Result<usize, TrackerError> {
        let stored = self.inner.store.get_all().await?;
        let stored_count = stored.len();
        let loaded = collection::dedupe(filter_loadable(
            stored,
            &self.inner.config.expiry_rules,
            Utc::now(),
        ));
        let loaded_count = loaded.len();

        let resumable: Vec<Job> = {
            let mut jobs = self.inner.jobs.write().await;
            *jobs = collection::merge(loaded, std::mem::take(&mut *jobs));
            let resumable = jobs.iter().filter(|job| !job.is_terminal()).cloned().collect();
            resumable
        };

        for job in &resumable {
            if !self.inner.poller.is_polling(&job.id) {
                self.inner.start_polling(job, elapsed_since_creation(job));
            }
        }

        tracing::info!(
            stored = stored_count,
            loaded = loaded_count,
            resumed = resumable.len(),
            "Jobs loaded from store",
        );
        Ok(loaded_count)
    }

    pub async fn store_info(&self) -> Result<StoreInfo, TrackerError> {
        Ok(self.inner.store.info().await?)
    }

    /// Number of jobs currently being polled.
    pub fn active_polls(&self) -> usize {
        self.inner.poller.active_count()
    }

    /// Stop polling, apply any snapshots still queued, and stop the
    /// applier task.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job tracker");
        self.inner.poller.shutdown().await;
        self.inner.cancel.cancel();

        let handle = lock(&self.inner.applier).take();
        if let Some(handle) = handle {
            if tokio::time::timeout(APPLIER_SHUTDOWN_TIMEOUT, handle)
                .await
                .is_err()
            {
                tracing::warn!("Snapshot applier did not stop in time");
            }
        }

        tracing::info!("Job tracker shut down complete");
    }
}

impl TrackerInner {
    fn publish(&self, event: TrackerEvent) {
        tracing::debug!(
            event_type = event.event_type(),
            job_id = event.job_id(),
            "Publishing tracker event",
        );
        // A send error only means there are no receivers.
        let _ = self.event_tx.send(event);
    }

    fn start_polling(&self, job: &Job, elapsed_offset: Duration) {
        let options = PollOptions {
            interval: self.config.poll_interval,
            avg_duration_secs: self.config.estimator.average_duration_for(job.duration_hint),
            elapsed_offset,
        };
        let tx = self.snapshot_tx.clone();
        let callback: SnapshotCallback = Arc::new(move |snapshot| {
            // The receiver only goes away during shutdown.
            let _ = tx.send(snapshot);
        });
        self.poller.start_polling(&job.id, options, callback);
    }

    /// Snapshot describing a job's recorded state, for jobs with nothing
    /// in the poller's cache.
    fn snapshot_of(&self, job: &Job) -> ProgressSnapshot {
        let response = StatusResponse {
            status: job.status,
            result_url: job.result_url.clone(),
            error: job.error.clone(),
            logs: None,
        };
        let avg = self.config.estimator.average_duration_for(job.duration_hint);
        let elapsed = elapsed_since_creation(job).as_secs_f64();
        let estimate = self.poller.estimator().estimate(job.status, elapsed, avg);
        ProgressSnapshot::from_response(job.id.clone(), &response, estimate)
    }

    fn remove_subscriber(&self, job_id: &str, id: u64) {
        let mut subscribers = lock(&self.subscribers);
        if let Some(list) = subscribers.get_mut(job_id) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscribers.remove(job_id);
            }
        }
    }

    fn notify_subscribers(&self, snapshot: &ProgressSnapshot) {
        let callbacks: Vec<SnapshotCallback> = {
            let mut subscribers = lock(&self.subscribers);
            if snapshot.is_terminal() {
                // Nothing follows a terminal snapshot.
                subscribers
                    .remove(&snapshot.job_id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|s| s.callback)
                    .collect()
            } else {
                // Skip subscribers that already saw a newer snapshot.
                subscribers
                    .get_mut(&snapshot.job_id)
                    .map(|list| {
                        list.iter_mut()
                            .filter(|s| s.seen.map_or(true, |seen| seen <= snapshot.observed_at))
                            .map(|s| {
                                s.seen = Some(snapshot.observed_at);
                                Arc::clone(&s.callback)
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            }
        };

        for callback in callbacks {
            callback(snapshot.clone());
        }
    }

    /// Write `job` through the store's validation gate.
    ///
    /// A rejected or over-budget record is also removed from the store, so
    /// an earlier, now outdated version of it does not survive.
    async fn persist(&self, job: &Job) {
        let reason = match self.store.put(job).await {
            Ok(()) => return,
            Err(e @ (StoreError::Rejected(_) | StoreError::OverBudget { .. })) => {
                tracing::warn!(job_id = %job.id, error = %e, "Job not persisted");
                if let Err(e) = self.store.delete(&job.id).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to drop rejected job from store");
                }
                match e {
                    StoreError::Rejected(_) => "Record failed storage validation".to_string(),
                    other => other.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to persist job");
                e.to_string()
            }
        };

        self.publish(TrackerEvent::PersistSkipped {
            job_id: job.id.clone(),
            reason,
        });
    }

    async fn apply_snapshot(&self, snapshot: ProgressSnapshot) {
        self.notify_subscribers(&snapshot);

        if !snapshot.stale {
            self.advance_job(&snapshot).await;
        }

        if !snapshot.is_terminal() {
            self.publish(TrackerEvent::JobUpdated { snapshot });
        }
    }

    /// Apply a fresh observation to the collection.
    async fn advance_job(&self, snapshot: &ProgressSnapshot) {
        let response = snapshot.to_status_response();
        let mut jobs = self.jobs.write().await;
        let outcome = jobs
            .iter_mut()
            .find(|job| job.id == snapshot.job_id)
            .map(|job| (job.apply_status(&response, Utc::now()), job.clone()));

        let Some((transition, job)) = outcome else {
            tracing::debug!(job_id = %snapshot.job_id, "Snapshot for untracked job ignored");
            return;
        };

        let Transition::Advanced { from, to } = transition else {
            return;
        };

        tracing::info!(job_id = %job.id, from = %from, to = %to, "Job status changed");
        self.persist(&job).await;
        drop(jobs);

        match to {
            JobStatus::Succeeded => {
                if job.result_url.as_deref().is_some_and(is_durable) {
                    self.publish(TrackerEvent::JobCompleted { job });
                } else {
                    tracing::warn!(
                        job_id = %job.id,
                        url = job.result_url.as_deref().unwrap_or(""),
                        "Job succeeded without a durable result URL",
                    );
                    self.publish(TrackerEvent::ResultUnavailable { job });
                }
            }
            JobStatus::Failed => {
                tracing::warn!(
                    job_id = %job.id,
                    error = job.error.as_deref().unwrap_or(""),
                    "Job failed",
                );
                self.publish(TrackerEvent::JobFailed { job });
            }
            JobStatus::Canceled => self.publish(TrackerEvent::JobCanceled { job }),
            JobStatus::Queued | JobStatus::Starting | JobStatus::Processing => {}
        }
    }
}

/// Time since `job` was created, zero if its timestamp is in the future.
fn elapsed_since_creation(job: &Job) -> Duration {
    (Utc::now() - job.created_at).to_std().unwrap_or_default()
}

/// Applies poller snapshots one at a time until cancelled, then drains
/// whatever is still queued.
async fn run_applier(
    tracker: Weak<TrackerInner>,
    mut snapshots: mpsc::UnboundedReceiver<ProgressSnapshot>,
    cancel: CancellationToken,
) {
    loop {
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => break,
            next = snapshots.recv() => match next {
                Some(snapshot) => snapshot,
                None => return,
            },
        };
        let Some(inner) = tracker.upgrade() else {
            return;
        };
        inner.apply_snapshot(snapshot).await;
    }

    while let Ok(snapshot) = snapshots.try_recv() {
        let Some(inner) = tracker.upgrade() else {
            return;
        };
        inner.apply_snapshot(snapshot).await;
    }
    tracing::debug!("Snapshot applier stopped");
}
