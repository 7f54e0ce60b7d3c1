use clipwatch_core::error::CoreError;
use clipwatch_core::types::JobId;
use clipwatch_provider::ProviderError;

/// Errors from a [`crate::store::JobStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job store serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// The record did not pass storage validation and was not written.
    #[error("Job {0} rejected by storage validation")]
    Rejected(JobId),

    /// The record alone is larger than the store's byte budget and was
    /// not written.
    #[error("Job {job_id} needs {size_bytes} bytes, store budget is {max_bytes}")]
    OverBudget {
        job_id: JobId,
        size_bytes: u64,
        max_bytes: u64,
    },
}

/// Errors surfaced by [`crate::tracker::JobTracker`].
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
