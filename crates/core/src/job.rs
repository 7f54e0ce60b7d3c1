//! Job records, lifecycle status, and status transitions.
//!
//! A [`Job`] is created when the caller submits a generation request and
//! is afterwards only advanced through [`Job::apply_status`] (driven by
//! the poller) or shallow-patched through [`JobPatch`] (driven by the
//! caller). Both honour the monotonic status ordering (a job never moves
//! back to an earlier status, and once terminal it never changes status
//! again), both stamp `completed_at` on a terminal transition, and a job
//! only becomes `succeeded` through a patch when its result URL is durable.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};
use crate::validation::is_durable;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a generation job as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        Self::Queued,
        Self::Starting,
        Self::Processing,
        Self::Succeeded,
        Self::Failed,
        Self::Canceled,
    ];

    /// `succeeded`, `failed` and `canceled` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Position in the lifecycle ordering. Terminal statuses share the
    /// highest rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Starting => 1,
            Self::Processing => 2,
            Self::Succeeded | Self::Failed | Self::Canceled => 3,
        }
    }

    /// Wire name, e.g. `"processing"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse a provider status string. Accepts the British `cancelled`
    /// spelling some providers use.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "starting" => Ok(Self::Starting),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(CoreError::Validation(format!(
                "Unknown job status '{other}'"
            ))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Provider observation
// ---------------------------------------------------------------------------

/// One status observation returned by a provider for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    /// Result locator, only meaningful once `status` is `succeeded`.
    pub result_url: Option<String>,
    /// Provider error message, verbatim.
    pub error: Option<String>,
    /// Raw provider logs, if the backend exposes them.
    pub logs: Option<String>,
}

impl StatusResponse {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            result_url: None,
            error: None,
            logs: None,
        }
    }

    pub fn with_result_url(mut self, url: impl Into<String>) -> Self {
        self.result_url = Some(url.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One tracked generation request.
///
/// `logs` and `provider_status_raw` are transient observations that are
/// never serialized; `prepare_for_storage` in [`crate::validation`]
/// returns copies without them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Provider-assigned identifier. Empty when a record arrived without
    /// one; such records are rejected before entering any collection.
    #[serde(default)]
    pub id: JobId,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    pub status: JobStatus,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// Requested clip length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hint: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Caller-defined grouping key (a chat, a project, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip)]
    pub logs: Option<String>,
    #[serde(skip)]
    pub provider_status_raw: Option<String>,
}

/// Outcome of applying a provider observation to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same status as before; result fields may have been refreshed.
    Unchanged,
    /// The job moved forward to a new status.
    Advanced { from: JobStatus, to: JobStatus },
    /// The observation was ignored: the job is already terminal or the
    /// observation would move it backwards.
    Ignored,
}

impl Job {
    /// Create a freshly observed `queued` job.
    pub fn new(id: impl Into<JobId>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            result_url: None,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            duration_hint: None,
            model_hint: None,
            error: None,
            aspect_ratio: None,
            source_image: None,
            thumbnail_url: None,
            group_id: None,
            logs: None,
            provider_status_raw: None,
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a provider observation taken at `now`.
    ///
    /// Terminal jobs are never transitioned again, and an observation with
    /// a lower lifecycle rank than the current status is ignored. On a
    /// terminal transition `completed_at` is stamped and the result URL or
    /// error message is copied from the observation.
    pub fn apply_status(&mut self, response: &StatusResponse, now: Timestamp) -> Transition {
        if self.status.is_terminal() || response.status.rank() < self.status.rank() {
            return Transition::Ignored;
        }

        self.logs = response.logs.clone();
        self.provider_status_raw = Some(response.status.as_str().to_string());

        let from = self.status;
        let to = response.status;
        self.status = to;

        match to {
            JobStatus::Succeeded => {
                self.result_url = response.result_url.clone();
                self.error = None;
                self.completed_at = Some(now);
            }
            JobStatus::Failed | JobStatus::Canceled => {
                if response.error.is_some() {
                    self.error = response.error.clone();
                }
                self.completed_at = Some(now);
            }
            JobStatus::Queued | JobStatus::Starting | JobStatus::Processing => {}
        }

        if from == to {
            Transition::Unchanged
        } else {
            Transition::Advanced { from, to }
        }
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A shallow, caller-driven update to a job.
///
/// Identity and creation metadata (`id`, `created_at`, `duration_hint`,
/// `model_hint`) are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub result_url: Option<String>,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
    pub thumbnail_url: Option<String>,
    pub group_id: Option<String>,
}

impl JobPatch {
    /// Check the status and result URL this patch would leave on `job`.
    ///
    /// Refused: changing the status of a terminal job, moving to a status
    /// of lower rank, and a `succeeded` job whose result URL is not
    /// durable.
    pub fn validate(&self, job: &Job) -> Result<(), CoreError> {
        if let Some(status) = self.status {
            if job.status.is_terminal() && status != job.status {
                return Err(CoreError::Validation(format!(
                    "Job {} is already {}",
                    job.id, job.status
                )));
            }
            if status.rank() < job.status.rank() {
                return Err(CoreError::Validation(format!(
                    "Job {} cannot move from {} back to {}",
                    job.id, job.status, status
                )));
            }
        }

        let target = self.status.unwrap_or(job.status);
        let touches_result = self.status.is_some() || self.result_url.is_some();
        if target == JobStatus::Succeeded && touches_result {
            let url = self.result_url.as_deref().or(job.result_url.as_deref());
            if !url.is_some_and(is_durable) {
                return Err(CoreError::Validation(format!(
                    "Job {} cannot succeed without a durable result URL",
                    job.id
                )));
            }
        }
        Ok(())
    }

    /// Apply every set field to `job`.
    ///
    /// When [`JobPatch::validate`] refuses the patch, `status`,
    /// `result_url` and `completed_at` are dropped and the other fields
    /// still apply. A
    /// terminal status change stamps `completed_at` unless the patch
    /// carries one.
    pub fn apply(&self, job: &mut Job) {
        match self.validate(job) {
            Ok(()) => {
                if let Some(status) = self.status {
                    if status.is_terminal() && job.status != status {
                        job.completed_at = Some(Utc::now());
                    }
                    job.status = status;
                }
                if let Some(url) = &self.result_url {
                    job.result_url = Some(url.clone());
                }
                if let Some(at) = self.completed_at {
                    job.completed_at = Some(at);
                }
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    current = %job.status,
                    error = %e,
                    "Ignoring status change in patch",
                );
            }
        }
        if let Some(error) = &self.error {
            job.error = Some(error.clone());
        }
        if let Some(thumb) = &self.thumbnail_url {
            job.thumbnail_url = Some(thumb.clone());
        }
        if let Some(group) = &self.group_id {
            job.group_id = Some(group.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
