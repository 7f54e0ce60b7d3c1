//! Result-URL classification and the persistence gate.
//!
//! [`prepare_for_storage`] is the only path from observed job state to
//! what may be written to durable storage. It rejects records without an
//! id and succeeded records whose result cannot outlive the session that
//! produced it.

use chrono::Duration;
use url::{Host, Url};

use crate::job::{Job, JobStatus};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Scheme vocabulary
// ---------------------------------------------------------------------------

/// Schemes whose URLs stop resolving when the originating session ends.
pub const EPHEMERAL_SCHEMES: &[&str] = &["blob", "data", "filesystem"];

/// Schemes accepted as durable result references.
pub const DURABLE_SCHEMES: &[&str] = &["http", "https"];

/// Provider CDN host whose signed delivery URLs expire.
pub const REPLICATE_DELIVERY_HOST: &str = "replicate.delivery";

/// Lifetime of provider delivery URLs.
pub const DEFAULT_PROVIDER_URL_TTL_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// How long a result URL can be expected to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    /// Absolute `http`/`https` URL with a host.
    Durable,
    /// Session-scoped reference (`blob:`, `data:`, ...).
    Ephemeral,
    /// Empty, unparseable, or an unsupported scheme.
    Invalid,
}

/// Classify a result URL.
///
/// Durable URLs must be written as `scheme://authority/...`; forms such
/// as `https:host` that a lenient parser would accept are invalid.
pub fn classify_url(url: &str) -> UrlKind {
    let trimmed = url.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return UrlKind::Invalid;
    };

    let scheme = parsed.scheme();
    if EPHEMERAL_SCHEMES.contains(&scheme) {
        return UrlKind::Ephemeral;
    }
    if !DURABLE_SCHEMES.contains(&scheme) {
        return UrlKind::Invalid;
    }

    if has_authority(trimmed) && parsed.host_str().is_some_and(|h| !h.is_empty()) {
        UrlKind::Durable
    } else {
        UrlKind::Invalid
    }
}

/// `true` only for [`UrlKind::Durable`] URLs.
pub fn is_durable(url: &str) -> bool {
    classify_url(url) == UrlKind::Durable
}

/// Lower-cased host of an absolute URL, without brackets for IPv6.
pub fn url_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = match parsed.host()? {
        Host::Domain(domain) => domain.to_ascii_lowercase(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    (!host.is_empty()).then_some(host)
}

/// Whether the text after the scheme starts with a non-empty `//authority`.
fn has_authority(url: &str) -> bool {
    url.split_once(':')
        .and_then(|(_, rest)| rest.strip_prefix("//"))
        .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'))
}

// ---------------------------------------------------------------------------
// Provider URL expiry
// ---------------------------------------------------------------------------

/// A host whose URLs stop resolving after a fixed lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryRule {
    /// Matches the host itself and any subdomain.
    pub host: String,
    pub ttl: Duration,
}

impl ExpiryRule {
    pub fn new(host: impl Into<String>, ttl: Duration) -> Self {
        Self {
            host: host.into(),
            ttl,
        }
    }

    fn matches(&self, host: &str) -> bool {
        host == self.host || host.ends_with(&format!(".{}", self.host))
    }
}

/// Default expiry rules: provider delivery URLs live for 24 hours.
pub fn default_expiry_rules() -> Vec<ExpiryRule> {
    vec![ExpiryRule::new(
        REPLICATE_DELIVERY_HOST,
        Duration::hours(DEFAULT_PROVIDER_URL_TTL_HOURS),
    )]
}

/// Whether `url` is served from an expiring host and is older than the
/// host's TTL. A matching URL without a known creation time counts as
/// expired.
pub fn is_provider_url_expired(
    url: &str,
    created_at: Option<Timestamp>,
    now: Timestamp,
    rules: &[ExpiryRule],
) -> bool {
    let Some(host) = url_host(url) else {
        return false;
    };
    let Some(rule) = rules.iter().find(|r| r.matches(&host)) else {
        return false;
    };
    match created_at {
        Some(created) => now - created > rule.ttl,
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Persistence gate
// ---------------------------------------------------------------------------

/// Validate and normalize a job before it is written to durable storage.
///
/// Returns `None` (and logs) when the record has no id, or when it is
/// `succeeded` without a durable result URL. Otherwise returns a copy
/// carrying only the canonical fields.
pub fn prepare_for_storage(job: &Job) -> Option<Job> {
    if !job.has_id() {
        tracing::warn!(status = %job.status, "Skipping job without id");
        return None;
    }

    if job.status == JobStatus::Succeeded {
        let kind = job
            .result_url
            .as_deref()
            .map_or(UrlKind::Invalid, classify_url);
        if kind != UrlKind::Durable {
            tracing::warn!(
                job_id = %job.id,
                url_kind = ?kind,
                url = job.result_url.as_deref().unwrap_or(""),
                "Skipping succeeded job with non-durable result URL",
            );
            return None;
        }
    }

    Some(Job {
        id: job.id.trim().to_string(),
        prompt: job.prompt.clone(),
        result_url: job.result_url.clone().filter(|u| !u.trim().is_empty()),
        status: job.status,
        created_at: job.created_at,
        completed_at: job.completed_at,
        duration_hint: job.duration_hint,
        model_hint: job.model_hint.clone(),
        error: job.error.clone(),
        aspect_ratio: job.aspect_ratio.clone(),
        source_image: job.source_image.clone(),
        thumbnail_url: job.thumbnail_url.clone(),
        group_id: job.group_id.clone(),
        logs: None,
        provider_status_raw: None,
    })
}

/// Filter records loaded from storage.
///
/// Jobs that have not succeeded are kept as-is. Succeeded jobs are kept
/// only when their result URL is durable and not past a provider expiry.
pub fn filter_loadable(jobs: Vec<Job>, rules: &[ExpiryRule], now: Timestamp) -> Vec<Job> {
    let before = jobs.len();
    let kept: Vec<Job> = jobs
        .into_iter()
        .filter(|job| {
            if !job.has_id() {
                return false;
            }
            if job.status != JobStatus::Succeeded {
                return true;
            }
            let url = job.result_url.as_deref().unwrap_or_default();
            if is_provider_url_expired(url, Some(job.created_at), now, rules) {
                tracing::warn!(job_id = %job.id, "Dropping job with expired provider URL");
                return false;
            }
            is_durable(url)
        })
        .collect();

    if kept.len() < before {
        tracing::warn!(dropped = before - kept.len(), "Filtered out invalid stored jobs");
    }
    kept
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
