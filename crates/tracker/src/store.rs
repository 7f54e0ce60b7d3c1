//! Durable job storage.
//!
//! Every [`JobStore`] write goes through
//! [`clipwatch_core::validation::prepare_for_storage`]; records it
//! rejects are never written and come back as [`StoreError::Rejected`].
//! The serialized collection is kept under a byte budget by evicting the
//! oldest records first.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clipwatch_core::collection;
use clipwatch_core::job::Job;
use clipwatch_core::validation::prepare_for_storage;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;

/// Default byte budget of the persisted collection (50 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    pub count: usize,
    /// Size of the serialized collection.
    pub size_bytes: u64,
}

/// Key-value storage of job records, keyed by job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace `job`.
    async fn put(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_all(&self) -> Result<Vec<Job>, StoreError>;

    /// Remove the record for `job_id`. No-op if absent.
    async fn delete(&self, job_id: &str) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    async fn info(&self) -> Result<StoreInfo, StoreError>;
}

/// Validate `job` and upsert it into `jobs`, then trim to `max_bytes`.
///
/// The record being written is never the one evicted: a record that does
/// not fit the budget on its own is refused with
/// [`StoreError::OverBudget`] and `jobs` is left as it was.
fn upsert(jobs: Vec<Job>, job: &Job, max_bytes: u64) -> Result<Vec<Job>, StoreError> {
    let record = prepare_for_storage(job).ok_or_else(|| StoreError::Rejected(job.id.clone()))?;

    let size_bytes = array_size(&[serde_json::to_vec(&record)?.len() as u64]);
    if size_bytes > max_bytes {
        return Err(StoreError::OverBudget {
            job_id: record.id,
            size_bytes,
            max_bytes,
        });
    }

    let keep = record.id.clone();
    trim(collection::merge(jobs, vec![record]), max_bytes, Some(&keep))
}

/// Evict the oldest records (by `created_at`) until the serialized
/// collection fits in `max_bytes`.
pub fn enforce_budget(jobs: Vec<Job>, max_bytes: u64) -> Result<Vec<Job>, StoreError> {
    trim(jobs, max_bytes, None)
}

fn trim(mut jobs: Vec<Job>, max_bytes: u64, keep: Option<&str>) -> Result<Vec<Job>, StoreError> {
    let sizes = jobs
        .iter()
        .map(|job| serde_json::to_vec(job).map(|bytes| bytes.len() as u64))
        .collect::<Result<Vec<_>, _>>()?;

    let mut total = array_size(&sizes);
    if total <= max_bytes {
        return Ok(jobs);
    }

    let mut oldest_first: Vec<usize> = (0..jobs.len())
        .filter(|&i| keep != Some(jobs[i].id.as_str()))
        .collect();
    oldest_first.sort_by_key(|&i| jobs[i].created_at);

    let mut evict = vec![false; jobs.len()];
    let mut remaining = jobs.len();
    for i in oldest_first {
        if total <= max_bytes {
            break;
        }
        evict[i] = true;
        remaining -= 1;
        // One record and its separating comma.
        total -= sizes[i] + u64::from(remaining > 0);
    }

    let mut index = 0;
    jobs.retain(|job| {
        let keep = !evict[index];
        index += 1;
        if !keep {
            tracing::warn!(job_id = %job.id, max_bytes, "Evicting job to stay within storage budget");
        }
        keep
    });
    Ok(jobs)
}

/// Size of a compact JSON array holding records of `sizes` bytes.
fn array_size(sizes: &[u64]) -> u64 {
    2 + sizes.iter().sum::<u64>() + (sizes.len() as u64).saturating_sub(1)
}

fn remove(jobs: Vec<Job>, job_id: &str) -> Vec<Job> {
    collection::remove_by_id(jobs, job_id)
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// Stores the collection as a single compact JSON array.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash never leaves a half-written collection behind.
pub struct JsonFileStore {
    path: PathBuf,
    max_bytes: u64,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Job>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(jobs)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            count = jobs.len(),
            size_bytes = bytes.len(),
            "Job store written",
        );
        Ok(())
    }
}

#[async_trait]
impl JobStore for JsonFileStore {
    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let jobs = upsert(self.read_all().await?, job, self.max_bytes)?;
        self.write_all(&jobs).await
    }

    async fn get_all(&self) -> Result<Vec<Job>, StoreError> {
        let _guard = self.lock.lock().await;
        self.read_all().await
    }

    async fn delete(&self, job_id: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let jobs = self.read_all().await?;
        let before = jobs.len();
        let jobs = remove(jobs, job_id);
        if jobs.len() != before {
            self.write_all(&jobs).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let _guard = self.lock.lock().await;
        let count = self.read_all().await?.len();
        let size_bytes = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(StoreInfo { count, size_bytes })
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Non-durable store, for tests and one-shot runs.
pub struct MemoryStore {
    jobs: RwLock<Vec<Job>>,
    max_bytes: u64,
}

impl MemoryStore {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
            max_bytes,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        *jobs = upsert(std::mem::take(&mut *jobs), job, self.max_bytes)?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.jobs.read().await.clone())
    }

    async fn delete(&self, job_id: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        *jobs = remove(std::mem::take(&mut *jobs), job_id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.jobs.write().await.clear();
        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(StoreInfo {
            count: jobs.len(),
            size_bytes: serde_json::to_vec(&*jobs)?.len() as u64,
        })
    }
}
