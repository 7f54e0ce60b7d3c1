//! Id-keyed operations over the client-visible job collection.
//!
//! All functions are pure: they take the collection by value and return
//! the new one. Callers that share a collection across tasks serialize
//! calls behind a single lock (see `clipwatch-tracker`).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobPatch, JobStatus};

/// Keep one record per id, the last one seen.
///
/// Records without an id are dropped. The output is ordered by each id's
/// last occurrence in the input.
pub fn dedupe(jobs: impl IntoIterator<Item = Job>) -> Vec<Job> {
    let jobs: Vec<Job> = jobs.into_iter().collect();
    let mut seen = HashSet::with_capacity(jobs.len());
    let mut kept = Vec::with_capacity(jobs.len());

    for job in jobs.into_iter().rev() {
        if !job.has_id() {
            tracing::warn!("Dropping job record without id");
            continue;
        }
        if seen.insert(job.id.clone()) {
            kept.push(job);
        }
    }

    kept.reverse();
    kept
}

/// Union of `existing` and `incoming` keyed by id.
///
/// An incoming record replaces the existing one with the same id
/// entirely, in place. Ids new to the collection are appended in their
/// incoming order.
pub fn merge(existing: Vec<Job>, incoming: Vec<Job>) -> Vec<Job> {
    let mut merged = dedupe(existing);
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, job)| (job.id.clone(), i))
        .collect();

    for job in dedupe(incoming) {
        match index.get(&job.id) {
            Some(&i) => merged[i] = job,
            None => {
                index.insert(job.id.clone(), merged.len());
                merged.push(job);
            }
        }
    }

    merged
}

/// Shallow-patch the record with `id`. Identity if no record matches.
pub fn update_by_id(mut jobs: Vec<Job>, id: &str, patch: &JobPatch) -> Vec<Job> {
    if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
        patch.apply(job);
    }
    jobs
}

/// Remove the record with `id`, if any.
pub fn remove_by_id(mut jobs: Vec<Job>, id: &str) -> Vec<Job> {
    jobs.retain(|job| job.id != id);
    jobs
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Criteria for listing jobs. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub group_id: Option<String>,
    /// Only jobs that have not reached a terminal status.
    #[serde(default)]
    pub active_only: bool,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(group) = &self.group_id {
            if job.group_id.as_deref() != Some(group.as_str()) {
                return false;
            }
        }
        !(self.active_only && job.is_terminal())
    }
}

/// Jobs matching `filter`, cloned, in collection order.
pub fn filter(jobs: &[Job], filter: &JobFilter) -> Vec<Job> {
    jobs.iter().filter(|job| filter.matches(job)).cloned().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
