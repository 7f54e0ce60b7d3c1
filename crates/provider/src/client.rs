//! The provider capability set and the generation request it accepts.

use async_trait::async_trait;
use clipwatch_core::job::StatusResponse;
use clipwatch_core::types::JobId;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Default clip length in seconds.
pub const DEFAULT_CLIP_SECS: u32 = 5;

/// Default output aspect ratio.
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";

/// Default classifier-free guidance scale.
pub const DEFAULT_CFG_SCALE: f32 = 0.5;

/// A backend able to run generation jobs.
///
/// Implementations must not retry internally; retry policy belongs to the
/// caller. `status` must be safe to call repeatedly.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Submit a generation request and return the provider's job id.
    async fn create(&self, input: &GenerationInput) -> Result<JobId, ProviderError>;

    /// Current provider-side status of `job_id`.
    async fn status(&self, job_id: &str) -> Result<StatusResponse, ProviderError>;

    /// Best-effort cancellation. Canceling a job that is already terminal
    /// is logged and reported as success.
    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError>;
}

/// Parameters of one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationInput {
    pub prompt: String,
    #[serde(default = "default_clip_secs")]
    pub duration_secs: u32,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f32,
    #[serde(default)]
    pub negative_prompt: String,
    /// Image to animate (image-to-video).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<String>,
    /// Overrides the backend's configured model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_clip_secs() -> u32 {
    DEFAULT_CLIP_SECS
}

fn default_aspect_ratio() -> String {
    DEFAULT_ASPECT_RATIO.to_string()
}

fn default_cfg_scale() -> f32 {
    DEFAULT_CFG_SCALE
}

impl GenerationInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            duration_secs: DEFAULT_CLIP_SECS,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            cfg_scale: DEFAULT_CFG_SCALE,
            negative_prompt: String::new(),
            start_image: None,
            reference_images: Vec::new(),
            model: None,
        }
    }

    pub fn with_duration(mut self, secs: u32) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_start_image(mut self, image: impl Into<String>) -> Self {
        self.start_image = Some(image.into());
        self
    }

    /// Reject requests the provider would refuse anyway.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.prompt.trim().is_empty() && self.start_image.is_none() {
            return Err(ProviderError::InvalidInput(
                "prompt must not be empty".to_string(),
            ));
        }
        if self.duration_secs == 0 {
            return Err(ProviderError::InvalidInput(
                "duration_secs must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cfg_scale) {
            return Err(ProviderError::InvalidInput(format!(
                "cfg_scale must be within 0.0..=1.0, got {}",
                self.cfg_scale
            )));
        }
        Ok(())
    }

    /// Provider `input` object. The model override is not part of it.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "prompt": self.prompt,
            "duration": self.duration_secs,
            "cfg_scale": self.cfg_scale,
            "aspect_ratio": self.aspect_ratio,
            "negative_prompt": self.negative_prompt,
        });
        if let Some(image) = &self.start_image {
            payload["start_image"] = serde_json::Value::String(image.clone());
        }
        if !self.reference_images.is_empty() {
            payload["reference_images"] = serde_json::json!(self.reference_images);
        }
        payload
    }
}
