//! Event type constants for job lifecycle notifications.
//!
//! Used by `clipwatch-tracker` when broadcasting `TrackerEvent`s and by
//! subscribers that forward them to other transports.

/// A job was submitted to the provider.
pub const EVENT_JOB_CREATED: &str = "job.created";

/// A job's observed status or progress changed.
pub const EVENT_JOB_UPDATED: &str = "job.updated";

/// A job reached `succeeded` with a durable result.
pub const EVENT_JOB_COMPLETED: &str = "job.completed";

/// The provider reported the job as failed.
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// The job was canceled (by the caller or the provider).
pub const EVENT_JOB_CANCELED: &str = "job.canceled";

/// A succeeded job carried a result URL that cannot be persisted.
pub const EVENT_RESULT_UNAVAILABLE: &str = "job.result_unavailable";

/// A record was rejected at the persistence boundary.
pub const EVENT_PERSIST_SKIPPED: &str = "job.persist_skipped";
