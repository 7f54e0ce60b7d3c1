//! Bounded waits on a job's terminal state.
//!
//! Every wait takes an explicit timeout and returns
//! [`CoreError::Timeout`] instead of hanging. Status-call failures are
//! returned as-is; retrying is the caller's decision.

use std::time::Duration;

use clipwatch_core::error::CoreError;
use clipwatch_core::job::{JobStatus, StatusResponse};

use crate::client::ProviderClient;
use crate::error::WaitError;

/// Default upper bound on a wait (10 minutes).
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default delay between status checks while waiting.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(5);

/// Poll `job_id` every `interval` until it is terminal or `timeout`
/// elapses. Returns the terminal status response.
pub async fn wait_for_terminal<C>(
    client: &C,
    job_id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<StatusResponse, WaitError>
where
    C: ProviderClient + ?Sized,
{
    let poll = async {
        loop {
            let response = client.status(job_id).await?;
            if response.status.is_terminal() {
                return Ok::<_, WaitError>(response);
            }
            tracing::trace!(job_id, status = %response.status, "Still waiting");
            tokio::time::sleep(interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Timeout {
            job_id: job_id.to_string(),
            secs: timeout.as_secs(),
        }
        .into()),
    }
}

/// Wait for `job_id` to succeed and return its result URL.
///
/// A `failed` or `canceled` outcome becomes [`CoreError::JobFailed`]
/// carrying the provider's message verbatim when it supplied one.
pub async fn wait_for_completion<C>(
    client: &C,
    job_id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<String, WaitError>
where
    C: ProviderClient + ?Sized,
{
    let response = wait_for_terminal(client, job_id, timeout, interval).await?;
    outcome_url(job_id, response).map_err(WaitError::from)
}

/// Turn a terminal response into the result URL or a [`CoreError`].
pub fn outcome_url(job_id: &str, response: StatusResponse) -> Result<String, CoreError> {
    match response.status {
        JobStatus::Succeeded => response.result_url.ok_or_else(|| {
            CoreError::Validation(format!("No output URL found for succeeded job {job_id}"))
        }),
        status @ (JobStatus::Failed | JobStatus::Canceled) => Err(CoreError::JobFailed {
            job_id: job_id.to_string(),
            status,
            message: response.error.unwrap_or_else(|| format!("Prediction {status}")),
        }),
        status => Err(CoreError::Internal(format!(
            "Job {job_id} is not terminal ({status})"
        ))),
    }
}
