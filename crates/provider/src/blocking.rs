//! Synchronous run-and-block backend.
//!
//! [`BlockingProvider`] wraps another client. `create` submits the job
//! and then waits (bounded) for it to finish, so by the time the caller
//! starts polling, `status` is answered from the remembered outcome
//! without another provider round trip. An outcome is remembered only
//! until `status` (or [`BlockingProvider::run`]) has handed it out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clipwatch_core::job::StatusResponse;
use clipwatch_core::types::JobId;
use tokio::sync::RwLock;

use crate::client::{GenerationInput, ProviderClient};
use crate::error::{ProviderError, WaitError};
use crate::wait::{self, DEFAULT_WAIT_INTERVAL, DEFAULT_WAIT_TIMEOUT};

pub struct BlockingProvider {
    inner: Arc<dyn ProviderClient>,
    timeout: Duration,
    interval: Duration,
    /// Terminal outcomes observed during `create` and not yet read.
    outcomes: RwLock<HashMap<JobId, StatusResponse>>,
}

impl BlockingProvider {
    pub fn new(inner: Arc<dyn ProviderClient>) -> Self {
        Self::with_timing(inner, DEFAULT_WAIT_TIMEOUT, DEFAULT_WAIT_INTERVAL)
    }

    pub fn with_timing(inner: Arc<dyn ProviderClient>, timeout: Duration, interval: Duration) -> Self {
        Self {
            inner,
            timeout,
            interval,
            outcomes: RwLock::new(HashMap::new()),
        }
    }

    /// Submit `input`, wait for the job, and return its result URL.
    pub async fn run(&self, input: &GenerationInput) -> Result<String, WaitError> {
        let job_id = self.create(input).await?;
        let remembered = self.outcomes.write().await.remove(&job_id);
        if let Some(outcome) = remembered {
            return wait::outcome_url(&job_id, outcome).map_err(WaitError::from);
        }
        wait::wait_for_completion(self.inner.as_ref(), &job_id, self.timeout, self.interval).await
    }

    /// Number of outcomes waiting to be read.
    pub async fn remembered(&self) -> usize {
        self.outcomes.read().await.len()
    }
}

#[async_trait]
impl ProviderClient for BlockingProvider {
    fn name(&self) -> &str {
        "blocking"
    }

    /// Submit and block until the job is terminal or the timeout passes.
    ///
    /// The job id is returned either way; if the wait did not finish,
    /// later `status` calls go to the wrapped client.
    async fn create(&self, input: &GenerationInput) -> Result<JobId, ProviderError> {
        let job_id = self.inner.create(input).await?;

        match wait::wait_for_terminal(self.inner.as_ref(), &job_id, self.timeout, self.interval).await
        {
            Ok(outcome) => {
                tracing::info!(job_id = %job_id, status = %outcome.status, "Blocking run finished");
                self.outcomes.write().await.insert(job_id.clone(), outcome);
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Blocking run did not finish, status will be polled",
                );
            }
        }

        Ok(job_id)
    }

    /// The first call after a finished `create` takes the remembered
    /// outcome; later calls go to the wrapped client.
    async fn status(&self, job_id: &str) -> Result<StatusResponse, ProviderError> {
        let remembered = self.outcomes.write().await.remove(job_id);
        if let Some(outcome) = remembered {
            return Ok(outcome);
        }
        self.inner.status(job_id).await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        if let Some(outcome) = self.outcomes.read().await.get(job_id) {
            tracing::info!(
                job_id,
                status = %outcome.status,
                "Cancel ignored, job already terminal",
            );
            return Ok(());
        }
        self.inner.cancel(job_id).await
    }
}
