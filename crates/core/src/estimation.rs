//! Time-based progress estimation for jobs without a real progress signal.
//!
//! Providers only report a coarse status, so progress while `processing`
//! is derived from elapsed time against an average completion time. The
//! thresholds, cap, and stage wording are all carried by
//! [`EstimatorConfig`] so they can be recalibrated per provider.

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Progress reported while a job is queued or starting.
pub const DEFAULT_INITIAL_PROGRESS: u8 = 5;

/// Highest progress a time-based estimate may reach before the provider
/// confirms success.
pub const DEFAULT_PROCESSING_CAP: u8 = 95;

/// Average completion time when nothing more specific is known (6.5 min).
pub const DEFAULT_AVG_DURATION_SECS: f64 = 390.0;

/// Average completion time for a 5-second clip (3.5 min).
pub const AVG_DURATION_5S_CLIP_SECS: f64 = 210.0;

/// Average completion time for a 10-second clip (6 min).
pub const AVG_DURATION_10S_CLIP_SECS: f64 = 360.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A progress band: estimates strictly below `below` get `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBand {
    pub below: u8,
    pub label: String,
}

impl StageBand {
    pub fn new(below: u8, label: impl Into<String>) -> Self {
        Self {
            below,
            label: label.into(),
        }
    }
}

/// Calibration for [`ProgressEstimator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub initial_progress: u8,
    pub processing_cap: u8,
    pub default_avg_duration_secs: f64,
    /// `(clip_seconds, avg_completion_seconds)` pairs.
    pub clip_calibration: Vec<(u32, f64)>,
    /// Processing bands in ascending `below` order.
    pub bands: Vec<StageBand>,
    /// Label once progress is past every band.
    pub final_label: String,
    pub initializing_label: String,
    pub succeeded_label: String,
    pub failed_label: String,
    pub canceled_label: String,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            initial_progress: DEFAULT_INITIAL_PROGRESS,
            processing_cap: DEFAULT_PROCESSING_CAP,
            default_avg_duration_secs: DEFAULT_AVG_DURATION_SECS,
            clip_calibration: vec![
                (5, AVG_DURATION_5S_CLIP_SECS),
                (10, AVG_DURATION_10S_CLIP_SECS),
            ],
            bands: vec![
                StageBand::new(20, "Loading model and preparing generation"),
                StageBand::new(40, "Analyzing prompt and initializing frames"),
                StageBand::new(60, "Generating video frames"),
                StageBand::new(80, "Processing and enhancing frames"),
            ],
            final_label: "Finalizing video output".into(),
            initializing_label: "Initializing model".into(),
            succeeded_label: "Generation complete".into(),
            failed_label: "Generation failed".into(),
            canceled_label: "Generation canceled".into(),
        }
    }
}

impl EstimatorConfig {
    /// Average completion time for a job that requested a clip of
    /// `duration_hint` seconds.
    pub fn average_duration_for(&self, duration_hint: Option<u32>) -> f64 {
        duration_hint
            .and_then(|clip| {
                self.clip_calibration
                    .iter()
                    .find(|(secs, _)| *secs == clip)
                    .map(|(_, avg)| *avg)
            })
            .unwrap_or(self.default_avg_duration_secs)
    }
}

// ---------------------------------------------------------------------------
// Estimate
// ---------------------------------------------------------------------------

/// Result of one estimation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    /// 0-100.
    pub progress: u8,
    pub stage_label: String,
    pub eta_secs: u64,
}

/// Pure estimator over a fixed [`EstimatorConfig`].
#[derive(Debug, Clone, Default)]
pub struct ProgressEstimator {
    config: EstimatorConfig,
}

impl ProgressEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Estimate progress for a job in `status` that has been observed for
    /// `elapsed_secs`, given an average completion time of
    /// `avg_duration_secs`.
    ///
    /// A non-positive or non-finite average falls back to the configured
    /// default; negative elapsed time counts as zero.
    pub fn estimate(&self, status: JobStatus, elapsed_secs: f64, avg_duration_secs: f64) -> Estimate {
        let avg = if avg_duration_secs.is_finite() && avg_duration_secs > 0.0 {
            avg_duration_secs
        } else {
            self.config.default_avg_duration_secs
        };
        let elapsed = if elapsed_secs.is_finite() {
            elapsed_secs.max(0.0)
        } else {
            0.0
        };

        match status {
            JobStatus::Queued | JobStatus::Starting => Estimate {
                progress: self.config.initial_progress.min(100),
                stage_label: self.config.initializing_label.clone(),
                eta_secs: avg.round() as u64,
            },
            JobStatus::Processing => {
                let raw = (elapsed / avg * 100.0).floor();
                let progress = raw.min(f64::from(self.config.processing_cap.min(100))) as u8;
                Estimate {
                    progress,
                    stage_label: self.stage_for(progress).to_string(),
                    eta_secs: (avg - elapsed).max(0.0).round() as u64,
                }
            }
            JobStatus::Succeeded => Estimate {
                progress: 100,
                stage_label: self.config.succeeded_label.clone(),
                eta_secs: 0,
            },
            JobStatus::Failed => Estimate {
                progress: 0,
                stage_label: self.config.failed_label.clone(),
                eta_secs: 0,
            },
            JobStatus::Canceled => Estimate {
                progress: 0,
                stage_label: self.config.canceled_label.clone(),
                eta_secs: 0,
            },
        }
    }

    /// Stage label for a processing-phase progress value.
    pub fn stage_for(&self, progress: u8) -> &str {
        self.config
            .bands
            .iter()
            .find(|band| progress < band.below)
            .map(|band| band.label.as_str())
            .unwrap_or(self.config.final_label.as_str())
    }
}

/// Estimate with the default calibration.
pub fn estimate(status: JobStatus, elapsed_secs: f64, avg_duration_secs: f64) -> Estimate {
    ProgressEstimator::default().estimate(status, elapsed_secs, avg_duration_secs)
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

/// Format a remaining-time estimate: `"Complete"`, `"~4:05"` or `"~42s"`.
pub fn format_time_remaining(secs: u64) -> String {
    if secs == 0 {
        return "Complete".to_string();
    }
    let minutes = secs / 60;
    let seconds = secs % 60;
    if minutes > 0 {
        format!("~{minutes}:{seconds:02}")
    } else {
        format!("~{seconds}s")
    }
}

/// Format elapsed time as `M:SS`.
pub fn format_elapsed(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
