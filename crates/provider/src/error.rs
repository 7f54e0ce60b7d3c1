use clipwatch_core::error::CoreError;
use clipwatch_core::types::JobId;

/// Errors talking to a generation provider.
///
/// These are always recoverable from the tracker's point of view: a
/// failed call never moves a job to `failed`.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The provider rejected the credentials (401/403).
    #[error("Provider authentication failed: {0}")]
    Auth(String),

    /// The generation request was rejected before submission.
    #[error("Invalid generation input: {0}")]
    InvalidInput(String),

    /// The provider answered with a payload we could not interpret.
    #[error("Malformed provider response: {0}")]
    MalformedOutput(String),

    /// The provider has no record of the job.
    #[error("Unknown job {0}")]
    UnknownJob(JobId),
}

/// Errors from the bounded wait helpers in [`crate::wait`].
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// A status call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The job timed out, failed, or succeeded without a usable result.
    #[error(transparent)]
    Outcome(#[from] CoreError),
}
