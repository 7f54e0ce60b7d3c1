use crate::job::JobStatus;
use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Timed out after {secs}s waiting for job {job_id}")]
    Timeout { job_id: JobId, secs: u64 },

    /// The provider reported a terminal failure. `message` is the
    /// provider's text, verbatim, when it supplied one.
    #[error("Job {job_id} {status}: {message}")]
    JobFailed {
        job_id: JobId,
        status: JobStatus,
        message: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
