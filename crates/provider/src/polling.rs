//! Asynchronous create + poll backend.

use async_trait::async_trait;
use clipwatch_core::job::StatusResponse;
use clipwatch_core::types::JobId;

use crate::api::PredictionsApi;
use crate::client::{GenerationInput, ProviderClient};
use crate::error::ProviderError;

/// Default model used when neither the backend nor the request names one.
pub const DEFAULT_MODEL: &str = "kwaivgi/kling-v1.6-standard";

/// Provider backend that submits a prediction and returns immediately;
/// every `status` call is a fresh provider request.
pub struct PollingProvider {
    api: PredictionsApi,
    model: String,
}

impl PollingProvider {
    pub fn new(api: PredictionsApi, model: impl Into<String>) -> Self {
        Self {
            api,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ProviderClient for PollingProvider {
    fn name(&self) -> &str {
        "polling"
    }

    async fn create(&self, input: &GenerationInput) -> Result<JobId, ProviderError> {
        input.validate()?;
        let model = input.model.as_deref().unwrap_or(&self.model);

        let prediction = self.api.create_prediction(model, input).await?;

        tracing::info!(
            job_id = %prediction.id,
            model,
            duration_secs = input.duration_secs,
            "Prediction created",
        );
        Ok(prediction.id)
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse, ProviderError> {
        let prediction = self.api.get_prediction(job_id).await?;
        let response = prediction.to_status_response()?;
        tracing::debug!(job_id, status = %response.status, "Prediction status");
        Ok(response)
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        let Err(cancel_err) = self.api.cancel_prediction(job_id).await else {
            tracing::info!(job_id, "Prediction canceled");
            return Ok(());
        };

        // The provider rejects cancels on finished predictions.
        match self.status(job_id).await {
            Ok(current) if current.status.is_terminal() => {
                tracing::info!(
                    job_id,
                    status = %current.status,
                    "Cancel ignored, prediction already terminal",
                );
                Ok(())
            }
            _ => Err(cancel_err),
        }
    }
}
