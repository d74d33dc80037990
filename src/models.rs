use serde::{Deserialize, Serialize};

// --- Job Configuration ---

/// Per-job crawl configuration, validated at the Registry boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_true")]
    pub include_code_blocks: bool,
    #[serde(default = "default_true")]
    pub exclude_navigation: bool,
    #[serde(default)]
    pub follow_external_links: bool,
    #[serde(default)]
    pub include_anchors: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: u32,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default = "default_true")]
    pub respect_robots: bool,
    #[serde(default = "default_true")]
    pub use_sitemap: bool,
}

fn default_true() -> bool {
    true
}
fn default_max_depth() -> u32 {
    3
}
fn default_max_pages() -> u32 {
    50
}
fn default_timeout_ms() -> u64 {
    300_000
}
fn default_page_timeout_ms() -> u64 {
    8_000
}
fn default_rate_limit_ms() -> u64 {
    1_000
}
fn default_max_concurrent_requests() -> usize {
    3
}
fn default_max_retries() -> u32 {
    3
}
fn default_quality_threshold() -> u32 {
    20
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("max_concurrent_requests must be between 1 and 10, got {0}")]
    ConcurrencyOutOfRange(usize),
    #[error("max_pages must be at least 1")]
    MaxPagesZero,
    #[error("quality_threshold must be between 0 and 100, got {0}")]
    QualityThresholdOutOfRange(u32),
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_concurrent_requests == 0 || self.max_concurrent_requests > 10 {
            return Err(ConfigValidationError::ConcurrencyOutOfRange(
                self.max_concurrent_requests,
            ));
        }
        if self.max_pages == 0 {
            return Err(ConfigValidationError::MaxPagesZero);
        }
        if self.quality_threshold > 100 {
            return Err(ConfigValidationError::QualityThresholdOutOfRange(
                self.quality_threshold,
            ));
        }
        Ok(())
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            include_code_blocks: true,
            exclude_navigation: true,
            follow_external_links: false,
            include_anchors: false,
            timeout_ms: default_timeout_ms(),
            page_timeout_ms: default_page_timeout_ms(),
            rate_limit_ms: default_rate_limit_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_retries: default_max_retries(),
            quality_threshold: default_quality_threshold(),
            force_refresh: false,
            respect_robots: true,
            use_sitemap: true,
        }
    }
}

// --- Job ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatusKind {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl JobStatusKind {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatusKind::Completed
                | JobStatusKind::Failed
                | JobStatusKind::Timeout
                | JobStatusKind::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobCounters {
    pub discovered: u32,
    pub queued: u32,
    pub processed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub filtered: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub user_id: String,
    pub seed_url: String,
    pub config: JobConfig,
    pub status: JobStatusKind,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
    pub counters: JobCounters,
    pub final_markdown: Option<String>,
    pub total_words: Option<u64>,
}

impl Job {
    pub fn new(job_id: String, user_id: String, seed_url: String, config: JobConfig) -> Self {
        let now = chrono::Utc::now();
        Job {
            job_id,
            user_id,
            seed_url,
            config,
            status: JobStatusKind::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            counters: JobCounters::default(),
            final_markdown: None,
            total_words: None,
        }
    }
}

// --- Queue Item ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub item_id: u64,
    pub job_id: String,
    pub url: String,
    pub normalized_url: String,
    pub url_hash: String,
    pub depth: u32,
    pub parent_url: Option<String>,
    pub state: QueueItemState,
    pub attempts: u32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub claimed_at: Option<chrono::DateTime<chrono::Utc>>,
}

// --- Cache Entry ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url_hash: String,
    pub url: String,
    pub title: String,
    pub content_markdown: String,
    pub links: Vec<String>,
    pub quality_score: u32,
    pub word_count: u32,
    pub content_hash: String,
    pub cached_at: chrono::DateTime<chrono::Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let age = (now - self.cached_at).num_seconds();
        age >= 0 && age as u64 > self.ttl_secs
    }
}

// --- Heading Hierarchy ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hierarchy {
    pub lvl0: Option<String>,
    pub lvl1: Option<String>,
    pub lvl2: Option<String>,
    pub lvl3: Option<String>,
    pub lvl4: Option<String>,
    pub lvl5: Option<String>,
    pub lvl6: Option<String>,
}

// --- Quality ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quality {
    pub score: u32,
    pub reason: Option<QualityReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityReason {
    BelowThreshold,
}

// --- Page Result ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageResultStatus {
    Complete,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub job_id: String,
    pub url: String,
    pub title: String,
    pub content_markdown: String,
    pub content_hash: String,
    pub word_count: u32,
    pub has_code: bool,
    pub depth: u32,
    pub parent: Option<String>,
    pub hierarchy: Hierarchy,
    pub anchor: Option<String>,
    pub status: PageResultStatus,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub token_count: Option<u32>,
    pub quality: Quality,
}

/// The 64-`=` rule line used three times in the serialized page envelope.
/// Built with a fill-padded format rather than a hand-counted literal so the
/// width can't drift from spec.
fn envelope_rule() -> String {
    format!("{:=<64}", "")
}

impl PageResult {
    /// Renders the page as the bit-stable serialized page envelope (the
    /// wire format used for both the URL cache and the job's downloadable
    /// artifact): a `Documentation Page` header block, then a `Content`
    /// block wrapping the raw Markdown.
    pub fn to_envelope(&self) -> String {
        let rule = envelope_rule();
        format!(
            "{rule}\nDocumentation Page\n{rule}\nTitle: {title}\nURL: {url}\nType: Documentation\nFormat: Markdown\nContent-Hash: {hash}\nWord Count: {words}\nHas Code: {has_code}\n\n{rule}\nContent\n{rule}\n\n{content}\n\n{rule}\n",
            rule = rule,
            title = self.title,
            url = self.url,
            hash = self.content_hash,
            words = self.word_count,
            has_code = if self.has_code { "Yes" } else { "No" },
            content = self.content_markdown,
        )
    }
}

// --- Progress Events ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEventPayload {
    StreamConnected {
        job_id: String,
        url: String,
    },
    UrlStarted {
        url: String,
        depth: u32,
    },
    UrlCrawled {
        url: String,
        success: bool,
        content_length: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from_cache: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        quality: Option<Quality>,
    },
    UrlFailed {
        url: String,
        error: String,
    },
    UrlSkipped {
        url: String,
        reason: String,
    },
    UrlsDiscovered {
        source_url: String,
        discovered_urls: Vec<String>,
        count: usize,
        total_discovered: u32,
    },
    SentToProcessing {
        url: String,
    },
    Progress {
        processed: u32,
        discovered: u32,
        queued: u32,
        pending: usize,
    },
    // Every other variant here is snake_case; `time_update` alone is wire-
    // compatible with the camelCase field names the original crawler
    // emitted for this event, preserved per the scheme-hash ambiguity note.
    TimeUpdate {
        elapsed: f64,
        formatted: String,
        #[serde(rename = "totalProcessed")]
        total_processed: u32,
        #[serde(rename = "totalDiscovered")]
        total_discovered: u32,
        #[serde(rename = "queueSize")]
        queue_size: usize,
        #[serde(rename = "pendingCount")]
        pending_count: usize,
    },
    JobCompleted {
        job_id: String,
        total_processed: u32,
        total_discovered: u32,
    },
    JobFailed {
        job_id: String,
        error: String,
        total_processed: Option<u32>,
        total_discovered: Option<u32>,
    },
    JobTimeout {
        job_id: String,
        total_processed: u32,
        total_discovered: u32,
        message: String,
    },
}

impl ProgressEventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            ProgressEventPayload::StreamConnected { .. } => "stream_connected",
            ProgressEventPayload::UrlStarted { .. } => "url_started",
            ProgressEventPayload::UrlCrawled { .. } => "url_crawled",
            ProgressEventPayload::UrlFailed { .. } => "url_failed",
            ProgressEventPayload::UrlSkipped { .. } => "url_skipped",
            ProgressEventPayload::UrlsDiscovered { .. } => "urls_discovered",
            ProgressEventPayload::SentToProcessing { .. } => "sent_to_processing",
            ProgressEventPayload::Progress { .. } => "progress",
            ProgressEventPayload::TimeUpdate { .. } => "time_update",
            ProgressEventPayload::JobCompleted { .. } => "job_completed",
            ProgressEventPayload::JobFailed { .. } => "job_failed",
            ProgressEventPayload::JobTimeout { .. } => "job_timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEventPayload::JobCompleted { .. }
                | ProgressEventPayload::JobFailed { .. }
                | ProgressEventPayload::JobTimeout { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event_id: u64,
    pub job_id: String,
    pub payload: ProgressEventPayload,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

// --- Job summary (for GET /jobs/active) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub url: String,
    pub status: JobStatusKind,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub statistics: JobCounters,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        JobSummary {
            job_id: job.job_id.clone(),
            url: job.seed_url.clone(),
            status: job.status,
            created_at: job.created_at,
            statistics: job.counters.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_matches_the_bit_stable_wire_format() {
        let page = PageResult {
            job_id: "job-1".to_string(),
            url: "https://example.com/docs".to_string(),
            title: "Guide".to_string(),
            content_markdown: "# Guide\n\nhello".to_string(),
            content_hash: "deadbeef".to_string(),
            word_count: 2,
            has_code: false,
            depth: 0,
            parent: None,
            hierarchy: Hierarchy::default(),
            anchor: None,
            status: PageResultStatus::Complete,
            error: None,
            timestamp: chrono::Utc::now(),
            token_count: None,
            quality: Quality {
                score: 50,
                reason: None,
            },
        };

        let rule = "=".repeat(64);
        let expected = format!(
            "{rule}\nDocumentation Page\n{rule}\nTitle: Guide\nURL: https://example.com/docs\nType: Documentation\nFormat: Markdown\nContent-Hash: deadbeef\nWord Count: 2\nHas Code: No\n\n{rule}\nContent\n{rule}\n\n# Guide\n\nhello\n\n{rule}\n"
        );
        assert_eq!(page.to_envelope(), expected);
    }
}
