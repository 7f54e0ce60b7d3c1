//! Scripted in-process provider used by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use clipwatch_core::job::{JobStatus, StatusResponse};
use clipwatch_core::types::JobId;
use clipwatch_provider::api::Prediction;
use clipwatch_provider::{GenerationInput, ProviderClient, ProviderError};

/// One scripted answer to a `status` call.
#[derive(Debug, Clone)]
pub enum Step {
    Status(StatusResponse),
    Fail(String),
}

pub fn processing() -> Step {
    Step::Status(StatusResponse::new(JobStatus::Processing))
}

pub fn succeeded(url: &str) -> Step {
    Step::Status(StatusResponse::new(JobStatus::Succeeded).with_result_url(url))
}

pub fn failed(message: &str) -> Step {
    Step::Status(StatusResponse::new(JobStatus::Failed).with_error(message))
}

pub fn canceled() -> Step {
    Step::Status(StatusResponse::new(JobStatus::Canceled))
}

pub fn outage(body: &str) -> Step {
    Step::Fail(body.to_string())
}

/// The status a raw provider prediction translates to.
pub fn from_prediction(value: serde_json::Value) -> Step {
    let prediction: Prediction = serde_json::from_value(value).unwrap();
    Step::Status(prediction.to_status_response().unwrap())
}

/// Answers `status` from a per-job script. The last step repeats once the
/// script is exhausted.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<JobId, VecDeque<Step>>>,
    next_id: AtomicUsize,
    status_calls: AtomicUsize,
    canceled: Mutex<Vec<JobId>>,
    delay: Option<Duration>,
    in_flight: Mutex<HashMap<JobId, usize>>,
    max_in_flight: AtomicUsize,
}

/// Counts one running `status` call for a job, including calls whose
/// future is dropped before completing.
struct InFlight<'a> {
    provider: &'a ScriptedProvider,
    job_id: JobId,
}

impl<'a> InFlight<'a> {
    fn enter(provider: &'a ScriptedProvider, job_id: &str) -> Self {
        let mut in_flight = provider.in_flight.lock().unwrap();
        let count = in_flight.entry(job_id.to_string()).or_default();
        *count += 1;
        provider.max_in_flight.fetch_max(*count, Ordering::SeqCst);
        Self {
            provider,
            job_id: job_id.to_string(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.provider.in_flight.lock().unwrap().get_mut(&self.job_id) {
            *count -= 1;
        }
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn script(&self, job_id: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), steps.into());
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn canceled(&self) -> Vec<JobId> {
        self.canceled.lock().unwrap().clone()
    }

    /// Highest number of simultaneous `status` calls seen for any one job.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create(&self, input: &GenerationInput) -> Result<JobId, ProviderError> {
        input.validate()?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("job-{n}"))
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(self, job_id);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts
                .get_mut(job_id)
                .ok_or_else(|| ProviderError::UnknownJob(job_id.to_string()))?;
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };

        match step {
            Some(Step::Status(resp)) => Ok(resp),
            Some(Step::Fail(body)) => Err(ProviderError::Api { status: 503, body }),
            None => Ok(StatusResponse::new(JobStatus::Queued)),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        self.canceled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}
