//! End-to-end tests for `JobTracker` against a scripted provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use clipwatch_core::collection::JobFilter;
use clipwatch_core::error::CoreError;
use clipwatch_core::job::{Job, JobPatch, JobStatus};
use clipwatch_core::snapshot::ProgressSnapshot;
use clipwatch_tracker::{
    JobOptions, JobStore, JobTracker, JsonFileStore, MemoryStore, TrackerConfig, TrackerError,
    TrackerEvent,
};
use tokio::sync::{broadcast, mpsc};

use common::{canceled, failed, from_prediction, outage, processing, succeeded, ScriptedProvider};

const CDN_URL: &str = "https://cdn.example.com/v.mp4";

fn tracker(provider: &Arc<ScriptedProvider>, store: Arc<dyn JobStore>) -> JobTracker {
    JobTracker::new(provider.clone(), store, TrackerConfig::default())
}

/// Receive events until one of `event_type` arrives.
async fn wait_for(rx: &mut broadcast::Receiver<TrackerEvent>, event_type: &str) -> TrackerEvent {
    let wait = async {
        loop {
            let event = rx.recv().await.unwrap();
            if event.event_type() == event_type {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .unwrap_or_else(|_| panic!("no {event_type} event"))
}

// ---------------------------------------------------------------------------
// Test: a created job is followed to completion and persisted
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn created_job_is_followed_to_completion() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![processing(), succeeded(CDN_URL)]);
    let store = Arc::new(MemoryStore::default());
    let tracker = tracker(&provider, store.clone());
    let mut events = tracker.events();

    let options = JobOptions {
        duration_secs: Some(10),
        ..JobOptions::default()
    };
    let job_id = tracker.create_job("a fox in the snow", options).await.unwrap();
    assert_eq!(job_id, "job-1");

    let created = wait_for(&mut events, "job.created").await;
    assert_matches!(created, TrackerEvent::JobCreated { job } if job.duration_hint == Some(10));

    let completed = wait_for(&mut events, "job.completed").await;
    assert_matches!(completed, TrackerEvent::JobCompleted { job } => {
        assert_eq!(job.result_url.as_deref(), Some(CDN_URL));
        assert!(job.completed_at.is_some());
    });

    let job = tracker.get_job("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);

    let stored = store.get_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, JobStatus::Succeeded);
    assert_eq!(tracker.active_polls(), 0);
}

// ---------------------------------------------------------------------------
// Test: a success without a durable URL is kept in memory only
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn ephemeral_result_is_not_persisted() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![succeeded("blob:https://app.example/4f1c")]);
    let store = Arc::new(MemoryStore::default());
    let tracker = tracker(&provider, store.clone());
    let mut events = tracker.events();

    tracker.create_job("p", JobOptions::default()).await.unwrap();

    let skipped = wait_for(&mut events, "job.persist_skipped").await;
    assert_eq!(skipped.job_id(), "job-1");
    let unavailable = wait_for(&mut events, "job.result_unavailable").await;
    assert_eq!(unavailable.job_id(), "job-1");

    assert!(store.get_all().await.unwrap().is_empty());
    let in_memory = tracker.get_job("job-1").await.unwrap();
    assert_eq!(in_memory.status, JobStatus::Succeeded);
}

// ---------------------------------------------------------------------------
// Test: a success without any output still finishes the job
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn success_without_output_is_result_unavailable() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script(
        "job-1",
        vec![
            processing(),
            from_prediction(serde_json::json!({
                "id": "job-1",
                "status": "succeeded",
                "output": null
            })),
        ],
    );
    let store = Arc::new(MemoryStore::default());
    let tracker = tracker(&provider, store.clone());
    let mut events = tracker.events();

    tracker.create_job("p", JobOptions::default()).await.unwrap();

    let event = wait_for(&mut events, "job.result_unavailable").await;
    assert_matches!(event, TrackerEvent::ResultUnavailable { job } => {
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.result_url.is_none());
        assert!(job.completed_at.is_some());
    });
    assert_eq!(tracker.active_polls(), 0);

    let calls = provider.status_calls();
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(provider.status_calls(), calls);
    assert!(store.get_all().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: provider failure messages are kept verbatim
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_job_keeps_provider_message() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![processing(), failed("Content flagged by safety filter")]);
    let tracker = tracker(&provider, Arc::new(MemoryStore::default()));
    let mut events = tracker.events();

    tracker.create_job("p", JobOptions::default()).await.unwrap();

    let event = wait_for(&mut events, "job.failed").await;
    assert_matches!(event, TrackerEvent::JobFailed { job } => {
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Content flagged by safety filter"));
    });
}

// ---------------------------------------------------------------------------
// Test: a provider outage never fails a job
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn outage_leaves_status_untouched() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![processing(), outage("gateway timeout")]);
    let tracker = tracker(&provider, Arc::new(MemoryStore::default()));
    let mut events = tracker.events();

    tracker.create_job("p", JobOptions::default()).await.unwrap();

    let stale = loop {
        let event = wait_for(&mut events, "job.updated").await;
        if let TrackerEvent::JobUpdated { snapshot } = event {
            if snapshot.stale {
                break snapshot;
            }
        }
    };

    assert_eq!(stale.status, JobStatus::Processing);
    let job = tracker.get_job("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.error.is_none());
}

// ---------------------------------------------------------------------------
// Test: subscribers see non-decreasing progress up to the terminal snapshot
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn subscriber_receives_progress_until_terminal() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script(
        "job-1",
        vec![processing(), processing(), processing(), succeeded(CDN_URL)],
    );
    let tracker = tracker(&provider, Arc::new(MemoryStore::default()));

    tracker.create_job("p", JobOptions::default()).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressSnapshot>();
    let _subscription = tracker
        .subscribe("job-1", move |snapshot| {
            let _ = tx.send(snapshot);
        })
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(snapshot) = rx.recv().await {
        let terminal = snapshot.is_terminal();
        seen.push(snapshot);
        if terminal {
            break;
        }
    }

    let progress: Vec<u8> = seen
        .iter()
        .filter(|s| !s.is_terminal())
        .map(|s| s.progress)
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|&p| p <= 100));

    let last = seen.last().unwrap();
    assert_eq!(last.status, JobStatus::Succeeded);
    assert_eq!(last.progress, 100);
}

// ---------------------------------------------------------------------------
// Test: a terminal snapshot not yet applied is delivered once
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn subscriber_gets_pending_terminal_snapshot_once() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![succeeded(CDN_URL)]);
    let tracker = tracker(&provider, Arc::new(MemoryStore::default()));

    tracker.create_job("p", JobOptions::default()).await.unwrap();
    // Let the poll task cache the terminal snapshot.
    tokio::task::yield_now().await;

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressSnapshot>();
    let _subscription = tracker
        .subscribe("job-1", move |snapshot| {
            let _ = tx.send(snapshot);
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let mut seen = Vec::new();
    while let Ok(snapshot) = rx.try_recv() {
        seen.push(snapshot);
    }
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status, JobStatus::Succeeded);
    assert_eq!(provider.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribe_to_finished_job_delivers_once() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![succeeded(CDN_URL)]);
    let tracker = tracker(&provider, Arc::new(MemoryStore::default()));
    let mut events = tracker.events();

    tracker.create_job("p", JobOptions::default()).await.unwrap();
    wait_for(&mut events, "job.completed").await;

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressSnapshot>();
    let _subscription = tracker
        .subscribe("job-1", move |snapshot| {
            let _ = tx.send(snapshot);
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(rx.try_recv().unwrap().status, JobStatus::Succeeded);
    assert!(rx.try_recv().is_err());
    assert_eq!(tracker.active_polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn subscribe_to_unknown_job_is_not_found() {
    let provider = Arc::new(ScriptedProvider::new());
    let tracker = tracker(&provider, Arc::new(MemoryStore::default()));

    let result = tracker.subscribe("nope", |_| {}).await;

    assert_matches!(result, Err(TrackerError::Core(CoreError::NotFound(id))) if id == "nope");
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_stops_delivery() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![processing()]);
    let tracker = tracker(&provider, Arc::new(MemoryStore::default()));

    tracker.create_job("p", JobOptions::default()).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressSnapshot>();
    let subscription = tracker
        .subscribe("job-1", move |snapshot| {
            let _ = tx.send(snapshot);
        })
        .await
        .unwrap();
    rx.recv().await.unwrap();

    subscription.unsubscribe();
    while rx.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(tracker.active_polls(), 1);
}

// ---------------------------------------------------------------------------
// Test: cancel_job reaches the provider and the canceled status flows back
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_job_flows_through_polling() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![processing()]);
    let tracker = tracker(&provider, Arc::new(MemoryStore::default()));
    let mut events = tracker.events();

    tracker.create_job("p", JobOptions::default()).await.unwrap();
    wait_for(&mut events, "job.updated").await;

    tracker.cancel_job("job-1").await.unwrap();
    assert_eq!(provider.canceled(), vec!["job-1".to_string()]);

    provider.script("job-1", vec![canceled()]);
    let event = wait_for(&mut events, "job.canceled").await;

    assert_eq!(event.job_id(), "job-1");
    let job = tracker.get_job("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Canceled);

    // Already terminal: no second provider call.
    tracker.cancel_job("job-1").await.unwrap();
    assert_eq!(provider.canceled().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_unknown_job_is_not_found() {
    let provider = Arc::new(ScriptedProvider::new());
    let tracker = tracker(&provider, Arc::new(MemoryStore::default()));

    let result = tracker.cancel_job("nope").await;

    assert_matches!(result, Err(TrackerError::Core(CoreError::NotFound(_))));
    assert!(provider.canceled().is_empty());
}

// ---------------------------------------------------------------------------
// Test: load() filters stored records and resumes unfinished jobs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn load_filters_and_resumes() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("pending", vec![processing()]);
    let store = Arc::new(MemoryStore::default());

    let mut pending = Job::new("pending", "p");
    pending.created_at = Utc::now() - chrono::Duration::seconds(60);
    store.put(&pending).await.unwrap();

    let mut done = Job::new("done", "p");
    done.status = JobStatus::Succeeded;
    done.result_url = Some(CDN_URL.into());
    store.put(&done).await.unwrap();

    let mut expired = Job::new("expired", "p");
    expired.status = JobStatus::Succeeded;
    expired.result_url = Some("https://replicate.delivery/pbxt/abc/out.mp4".into());
    expired.created_at = Utc::now() - chrono::Duration::days(2);
    store.put(&expired).await.unwrap();

    let tracker = tracker(&provider, store.clone());
    let mut events = tracker.events();

    assert_eq!(tracker.load().await.unwrap(), 2);

    let all = tracker.list_jobs(&JobFilter::default()).await;
    let ids: Vec<_> = all.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["pending", "done"]);

    let active = JobFilter {
        active_only: true,
        ..JobFilter::default()
    };
    assert_eq!(tracker.list_jobs(&active).await.len(), 1);
    assert_eq!(tracker.active_polls(), 1);

    let updated = wait_for(&mut events, "job.updated").await;
    assert_eq!(updated.job_id(), "pending");
}

// ---------------------------------------------------------------------------
// Test: caller patches and removal
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn update_job_patches_and_persists() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![processing()]);
    let store = Arc::new(MemoryStore::default());
    let tracker = tracker(&provider, store.clone());

    tracker.create_job("p", JobOptions::default()).await.unwrap();
    let patch = JobPatch {
        group_id: Some("chat-7".into()),
        ..JobPatch::default()
    };
    let updated = tracker.update_job("job-1", &patch).await.unwrap();
    assert_eq!(updated.group_id.as_deref(), Some("chat-7"));

    let by_group = JobFilter {
        group_id: Some("chat-7".into()),
        ..JobFilter::default()
    };
    assert_eq!(tracker.list_jobs(&by_group).await.len(), 1);
    assert_eq!(
        store.get_all().await.unwrap()[0].group_id.as_deref(),
        Some("chat-7")
    );

    let missing = tracker.update_job("nope", &patch).await;
    assert_matches!(missing, Err(TrackerError::Core(CoreError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn update_job_refuses_invalid_status_changes() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![processing()]);
    let store = Arc::new(MemoryStore::default());
    let tracker = tracker(&provider, store.clone());
    let mut events = tracker.events();

    tracker.create_job("p", JobOptions::default()).await.unwrap();
    wait_for(&mut events, "job.updated").await;

    let backwards = JobPatch {
        status: Some(JobStatus::Queued),
        ..JobPatch::default()
    };
    assert_matches!(
        tracker.update_job("job-1", &backwards).await,
        Err(TrackerError::Core(CoreError::Validation(_)))
    );

    let ephemeral = JobPatch {
        status: Some(JobStatus::Succeeded),
        result_url: Some("blob:abc".into()),
        group_id: Some("chat-1".into()),
        ..JobPatch::default()
    };
    assert_matches!(
        tracker.update_job("job-1", &ephemeral).await,
        Err(TrackerError::Core(CoreError::Validation(_)))
    );

    let job = tracker.get_job("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.result_url.is_none());
    assert!(job.group_id.is_none());
    assert_eq!(store.get_all().await.unwrap()[0].status, JobStatus::Processing);

    let failed = JobPatch {
        status: Some(JobStatus::Failed),
        error: Some("Stopped by operator".into()),
        ..JobPatch::default()
    };
    let updated = tracker.update_job("job-1", &failed).await.unwrap();
    assert_eq!(updated.status, JobStatus::Failed);
    assert!(updated.completed_at.is_some());
}

// ---------------------------------------------------------------------------
// Test: caller patches racing poll results leave memory and store in step
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrent_updates_and_poll_results_stay_consistent() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script(
        "job-1",
        vec![processing(), processing(), processing(), succeeded(CDN_URL)],
    );
    let store = Arc::new(MemoryStore::default());
    let tracker = tracker(&provider, store.clone());
    let mut events = tracker.events();

    tracker.create_job("p", JobOptions::default()).await.unwrap();

    let mut updates = tokio::task::JoinSet::new();
    for i in 0..20 {
        let tracker = tracker.clone();
        updates.spawn(async move {
            tokio::time::sleep(Duration::from_millis(500 * i)).await;
            let patch = JobPatch {
                group_id: Some(format!("chat-{i}")),
                ..JobPatch::default()
            };
            tracker.update_job("job-1", &patch).await.unwrap();
        });
    }
    while let Some(result) = updates.join_next().await {
        result.unwrap();
    }
    wait_for(&mut events, "job.completed").await;

    let in_memory = tracker.get_job("job-1").await.unwrap();
    let stored = store.get_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(in_memory.status, JobStatus::Succeeded);
    assert_eq!(in_memory.group_id.as_deref(), Some("chat-19"));
    assert_eq!(stored[0].status, in_memory.status);
    assert_eq!(stored[0].group_id, in_memory.group_id);
    assert_eq!(stored[0].result_url, in_memory.result_url);
    assert_eq!(stored[0].completed_at, in_memory.completed_at);
}

// ---------------------------------------------------------------------------
// Test: a record too large for the store is reported, not silently dropped
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn oversized_record_is_reported_as_skipped() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![processing()]);
    let store = Arc::new(MemoryStore::new(64));
    let tracker = tracker(&provider, store.clone());
    let mut events = tracker.events();

    tracker
        .create_job(&"a very long prompt ".repeat(10), JobOptions::default())
        .await
        .unwrap();

    let skipped = wait_for(&mut events, "job.persist_skipped").await;
    assert_matches!(skipped, TrackerEvent::PersistSkipped { job_id, reason } => {
        assert_eq!(job_id, "job-1");
        assert!(reason.contains("budget"));
    });
    assert!(store.get_all().await.unwrap().is_empty());
    assert!(tracker.get_job("job-1").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn remove_job_stops_polling_and_deletes() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![processing()]);
    let store = Arc::new(MemoryStore::default());
    let tracker = tracker(&provider, store.clone());

    tracker.create_job("p", JobOptions::default()).await.unwrap();
    assert_eq!(tracker.active_polls(), 1);

    tracker.remove_job("job-1").await.unwrap();

    assert!(tracker.get_job("job-1").await.is_none());
    assert!(store.get_all().await.unwrap().is_empty());
    assert_eq!(tracker.active_polls(), 0);
}

// ---------------------------------------------------------------------------
// Test: completed jobs survive a restart through the JSON file store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_job_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");

    let provider = Arc::new(ScriptedProvider::new());
    provider.script("job-1", vec![succeeded(CDN_URL)]);
    let first = tracker(
        &provider,
        Arc::new(JsonFileStore::new(&path, 1024 * 1024)),
    );
    let mut events = first.events();
    first.create_job("p", JobOptions::default()).await.unwrap();
    wait_for(&mut events, "job.completed").await;
    first.shutdown().await;

    let second = tracker(
        &Arc::new(ScriptedProvider::new()),
        Arc::new(JsonFileStore::new(&path, 1024 * 1024)),
    );
    assert_eq!(second.load().await.unwrap(), 1);

    let job = second.get_job("job-1").await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.result_url.as_deref(), Some(CDN_URL));
    assert_eq!(second.active_polls(), 0);
}
