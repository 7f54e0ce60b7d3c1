//! REST client for a predictions-style generation API.
//!
//! Wraps the three endpoints the tracker needs (create, get, cancel)
//! using [`reqwest`]. Responses are decoded into [`Prediction`] and
//! translated into the core [`StatusResponse`].

use clipwatch_core::job::{JobStatus, StatusResponse};
use serde::Deserialize;

use crate::client::GenerationInput;
use crate::error::ProviderError;

/// HTTP client for a single provider account.
pub struct PredictionsApi {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

/// A prediction as returned by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    /// Server-assigned identifier.
    pub id: String,
    pub status: String,
    /// A URL string, an array of URLs, or an object with a `url` field.
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub error: serde_json::Value,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl Prediction {
    /// Translate into the core status view.
    ///
    /// A `succeeded` prediction without a recognizable output URL is
    /// still `succeeded`, with no `result_url`. An unknown status string is
    /// a [`ProviderError::MalformedOutput`].
    pub fn to_status_response(&self) -> Result<StatusResponse, ProviderError> {
        let status = JobStatus::parse(&self.status)
            .map_err(|e| ProviderError::MalformedOutput(e.to_string()))?;

        let result_url = normalize_output(&self.output);
        if status == JobStatus::Succeeded && result_url.is_none() {
            tracing::warn!(prediction_id = %self.id, "Succeeded prediction has no output URL");
        }

        Ok(StatusResponse {
            status,
            result_url,
            error: error_text(&self.error),
            logs: self.logs.clone(),
        })
    }
}

/// Extract a result URL from a provider `output` value.
///
/// Accepts a non-empty string, the first string of an array, or the
/// `url` field of an object.
pub fn normalize_output(output: &serde_json::Value) -> Option<String> {
    use serde_json::Value;

    let url = match output {
        Value::String(s) => Some(s.as_str()),
        Value::Array(items) => items.iter().find_map(Value::as_str),
        Value::Object(map) => map.get("url").and_then(Value::as_str),
        _ => None,
    }?;

    let url = url.trim();
    (!url.is_empty()).then(|| url.to_string())
}

fn error_text(error: &serde_json::Value) -> Option<String> {
    match error {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl PredictionsApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base URL, e.g. `https://api.replicate.com/v1`.
    /// * `token`   - Bearer token sent on every request.
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, token)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Create a prediction for `model`.
    ///
    /// Sends `POST /models/{model}/predictions` with the input payload.
    pub async fn create_prediction(
        &self,
        model: &str,
        input: &GenerationInput,
    ) -> Result<Prediction, ProviderError> {
        let body = serde_json::json!({ "input": input.to_payload() });

        let response = self
            .client
            .post(format!("{}/models/{}/predictions", self.api_url, model))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch a prediction. Sends `GET /predictions/{id}`.
    pub async fn get_prediction(&self, prediction_id: &str) -> Result<Prediction, ProviderError> {
        let response = self
            .client
            .get(format!("{}/predictions/{}", self.api_url, prediction_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::UnknownJob(prediction_id.to_string()));
        }
        Self::parse_response(response).await
    }

    /// Cancel a prediction. Sends `POST /predictions/{id}/cancel`.
    pub async fn cancel_prediction(&self, prediction_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/predictions/{}/cancel", self.api_url, prediction_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    // ---- private helpers ----

    /// Map non-2xx responses to [`ProviderError`], with 401/403 reported
    /// as authentication failures.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        if matches!(
            status,
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN
        ) {
            return Err(ProviderError::Auth(body));
        }
        Err(ProviderError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
