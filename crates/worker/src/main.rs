//! `clipwatch-worker` -- submit a generation job and follow it.
//!
//! ```text
//! clipwatch-worker <prompt...>   submit, follow and print the result URL
//! clipwatch-worker               list stored jobs
//! ```
//!
//! Provider settings come from [`WorkerConfig::from_env`], tracker
//! settings from [`TrackerConfig::from_env`]. A `.env` file is honoured.

use std::sync::Arc;

use anyhow::Context;
use clipwatch_core::collection::JobFilter;
use clipwatch_core::estimation::format_time_remaining;
use clipwatch_tracker::{JobOptions, JobTracker, JsonFileStore, TrackerConfig, TrackerEvent};
use clipwatch_worker::build_provider;
use clipwatch_worker::config::WorkerConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;
    init_tracing(config.json_logs);

    let tracker_config = TrackerConfig::from_env();
    let wait_timeout = tracker_config.wait_timeout;

    tracing::info!(
        api_url = %config.api_url,
        model = %config.model,
        mode = %config.mode,
        store = %config.store_path.display(),
        "Starting clipwatch-worker",
    );

    let provider = build_provider(&config, &tracker_config);
    let store = Arc::new(JsonFileStore::new(
        &config.store_path,
        tracker_config.store_max_bytes,
    ));
    let tracker = JobTracker::new(provider, store, tracker_config);
    tracker.load().await.context("Failed to load job store")?;

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        for job in tracker.list_jobs(&JobFilter::default()).await {
            println!(
                "{}\t{}\t{}",
                job.id,
                job.status,
                job.result_url.as_deref().unwrap_or("-"),
            );
        }
        tracker.shutdown().await;
        return Ok(());
    }

    let mut events = tracker.events();
    let job_id = tracker
        .create_job(&prompt, JobOptions::default())
        .await
        .context("Failed to create job")?;

    let _subscription = tracker
        .subscribe(&job_id, |snapshot| {
            tracing::info!(
                job_id = %snapshot.job_id,
                status = %snapshot.status,
                progress = snapshot.progress,
                stage = %snapshot.stage_label,
                remaining = %format_time_remaining(snapshot.eta_secs),
                stale = snapshot.stale,
                "Progress",
            );
        })
        .await?;

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(job_id = %job_id, "Interrupted, job keeps running at the provider");
            None
        }
        result = tokio::time::timeout(wait_timeout, wait_for_outcome(&mut events, &job_id)) => {
            match result {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        job_id = %job_id,
                        timeout_secs = wait_timeout.as_secs(),
                        "Gave up waiting, job keeps running at the provider",
                    );
                    None
                }
            }
        }
    };

    tracker.shutdown().await;

    match outcome {
        Some(TrackerEvent::JobCompleted { job }) => {
            println!("{}", job.result_url.unwrap_or_default());
            Ok(())
        }
        Some(TrackerEvent::ResultUnavailable { job }) => {
            anyhow::bail!("Job {} succeeded without a usable result URL", job.id)
        }
        Some(TrackerEvent::JobFailed { job }) | Some(TrackerEvent::JobCanceled { job }) => {
            anyhow::bail!(
                "Job {} {}: {}",
                job.id,
                job.status,
                job.error.unwrap_or_else(|| "no reason given".into()),
            )
        }
        _ => Ok(()),
    }
}

/// Wait for the terminal event of `job_id`.
async fn wait_for_outcome(
    events: &mut broadcast::Receiver<TrackerEvent>,
    job_id: &str,
) -> Option<TrackerEvent> {
    loop {
        match events.recv().await {
            Ok(event) if event.job_id() == job_id => match event {
                TrackerEvent::JobCompleted { .. }
                | TrackerEvent::JobFailed { .. }
                | TrackerEvent::JobCanceled { .. }
                | TrackerEvent::ResultUnavailable { .. } => return Some(event),
                _ => {}
            },
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "clipwatch_worker=info,clipwatch_tracker=info,clipwatch_provider=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
