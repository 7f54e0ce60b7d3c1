//! Lifecycle events published by the tracker.
//!
//! Events are broadcast over a [`tokio::sync::broadcast`] channel; call
//! [`crate::JobTracker::events`] to receive them. Slow receivers observe
//! `RecvError::Lagged` rather than blocking the tracker.

use clipwatch_core::job::Job;
use clipwatch_core::job_events::{
    EVENT_JOB_CANCELED, EVENT_JOB_COMPLETED, EVENT_JOB_CREATED, EVENT_JOB_FAILED,
    EVENT_JOB_UPDATED, EVENT_PERSIST_SKIPPED, EVENT_RESULT_UNAVAILABLE,
};
use clipwatch_core::snapshot::ProgressSnapshot;
use clipwatch_core::types::JobId;
use serde::Serialize;

/// Broadcast channel capacity for tracker events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// The provider accepted a new job.
    JobCreated { job: Job },

    /// A non-terminal progress snapshot.
    JobUpdated { snapshot: ProgressSnapshot },

    /// The job succeeded with a durable result URL.
    JobCompleted { job: Job },

    JobFailed { job: Job },

    JobCanceled { job: Job },

    /// The job succeeded but its result URL cannot be kept.
    ResultUnavailable { job: Job },

    /// A record was not written to the store.
    PersistSkipped { job_id: JobId, reason: String },
}

impl TrackerEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => EVENT_JOB_CREATED,
            Self::JobUpdated { .. } => EVENT_JOB_UPDATED,
            Self::JobCompleted { .. } => EVENT_JOB_COMPLETED,
            Self::JobFailed { .. } => EVENT_JOB_FAILED,
            Self::JobCanceled { .. } => EVENT_JOB_CANCELED,
            Self::ResultUnavailable { .. } => EVENT_RESULT_UNAVAILABLE,
            Self::PersistSkipped { .. } => EVENT_PERSIST_SKIPPED,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::JobCreated { job }
            | Self::JobCompleted { job }
            | Self::JobFailed { job }
            | Self::JobCanceled { job }
            | Self::ResultUnavailable { job } => &job.id,
            Self::JobUpdated { snapshot } => &snapshot.job_id,
            Self::PersistSkipped { job_id, .. } => job_id,
        }
    }
}
