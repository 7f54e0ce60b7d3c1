//! Point-in-time progress views pushed to subscribers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::estimation::Estimate;
use crate::job::{JobStatus, StatusResponse};
use crate::types::{JobId, Timestamp};

/// Stage label used when no snapshot could be produced for a job because
/// the provider call failed.
pub const ERROR_CHECKING_PROGRESS: &str = "Error checking progress";

/// A derived, non-persisted view of a job's estimated progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    /// 0-100.
    pub progress: u8,
    pub stage_label: String,
    pub eta_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result locator, once the provider reports success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    /// `true` when this is a re-emission of an earlier snapshot after the
    /// provider could not be reached.
    #[serde(default)]
    pub stale: bool,
    pub observed_at: Timestamp,
}

impl ProgressSnapshot {
    /// Snapshot of a fresh provider observation.
    pub fn from_response(job_id: impl Into<JobId>, response: &StatusResponse, estimate: Estimate) -> Self {
        Self {
            job_id: job_id.into(),
            status: response.status,
            progress: estimate.progress,
            stage_label: estimate.stage_label,
            eta_secs: estimate.eta_secs,
            error: response.error.clone(),
            result_url: response.result_url.clone(),
            stale: false,
            observed_at: Utc::now(),
        }
    }

    /// Snapshot emitted when the very first status check failed.
    ///
    /// The status stays `queued`: a failed provider call never moves a job
    /// to `failed`.
    pub fn error_checking(job_id: impl Into<JobId>, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            progress: 0,
            stage_label: ERROR_CHECKING_PROGRESS.to_string(),
            eta_secs: 0,
            error: Some(error.into()),
            result_url: None,
            stale: true,
            observed_at: Utc::now(),
        }
    }

    /// Re-emission of `self` after a failed provider call.
    pub fn as_stale(&self, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            stale: true,
            observed_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The provider observation this snapshot was derived from.
    pub fn to_status_response(&self) -> StatusResponse {
        StatusResponse {
            status: self.status,
            result_url: self.result_url.clone(),
            error: self.error.clone(),
            logs: None,
        }
    }
}
