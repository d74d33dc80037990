//! Orchestrator: drives a single job from `pending` through to a terminal
//! state. Owns the job's queue and worker pool, seeds the frontier (the seed
//! URL plus a best-effort sitemap sweep), enforces the wall-clock deadline,
//! and assembles the final artifact once the frontier is observed drained.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cache::UrlCache;
use crate::crawler::fetcher::RateLimitedFetcher;
use crate::crawler::{domain_from_url, robots::RobotsChecker, sitemap};
use crate::models::{Job, JobStatusKind, PageResult, ProgressEventPayload};
use crate::normalize;
use crate::queue::{JobQueue, NewItem};
use crate::stream::JobStream;
use crate::worker::{self, WorkerContext};

const SITEMAP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_CHILD_SITEMAPS: usize = 10;

pub struct Orchestrator {
    cache: Arc<UrlCache>,
    fetcher: Arc<RateLimitedFetcher>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Timeout,
    Cancelled,
    Failed,
}

impl Orchestrator {
    pub fn new(cache: Arc<UrlCache>, fetcher: Arc<RateLimitedFetcher>) -> Self {
        Orchestrator { cache, fetcher }
    }

    /// Runs `job` to completion. Mutates `job` in place (status, counters,
    /// timestamps, final artifact) and publishes every progress event to
    /// `stream`. Returns once the job has reached a terminal state.
    pub async fn run(
        &self,
        job: Arc<Mutex<Job>>,
        stream: Arc<JobStream>,
        cancellation: CancellationToken,
    ) -> Outcome {
        let (config, seed_url, job_id) = {
            let mut j = job.lock().await;
            j.status = JobStatusKind::Running;
            j.updated_at = chrono::Utc::now();
            (j.config.clone(), j.seed_url.clone(), j.job_id.clone())
        };
        tracing::info!(job_id = %job_id, seed_url = %seed_url, "job running");

        stream
            .publish(ProgressEventPayload::StreamConnected {
                job_id: job_id.clone(),
                url: seed_url.clone(),
            })
            .await;

        let seed_normalized = normalize::normalize_url(&seed_url, None);
        if seed_normalized.is_empty() {
            return self
                .fail(&job, &stream, "seed URL could not be normalised")
                .await;
        }
        let seed_origin = origin_of(&seed_normalized);

        let queue = Arc::new(JobQueue::new(job_id.clone(), config.max_retries));
        let worker_ctx = Arc::new(WorkerContext::new(
            job.clone(),
            config.clone(),
            seed_origin.clone(),
            queue.clone(),
            self.cache.clone(),
            self.fetcher.clone(),
            stream.clone(),
            cancellation.clone(),
        ));

        {
            let mut dedup = worker_ctx.dedup.lock().await;
            dedup.mark_visited(&seed_normalized);
        }
        queue
            .enqueue(vec![NewItem {
                url: seed_url.clone(),
                normalized_url: seed_normalized.clone(),
                depth: 0,
                parent_url: None,
            }])
            .await;
        {
            let mut j = job.lock().await;
            j.counters.discovered = 1;
            j.counters.queued = 1;
        }

        if config.use_sitemap {
            self.seed_from_sitemap(&job, &worker_ctx, &queue, &seed_normalized, &seed_origin)
                .await;
        }

        let concurrency = config.max_concurrent_requests;
        let deadline = Duration::from_millis(config.timeout_ms);

        let ticker = tokio::spawn(tick_time_updates(
            job.clone(),
            stream.clone(),
            queue.clone(),
            cancellation.clone(),
        ));

        let (pages, outcome) = tokio::select! {
            pages = worker::run_pool(worker_ctx.clone(), concurrency) => {
                (pages, Outcome::Completed)
            }
            _ = tokio::time::sleep(deadline) => {
                cancellation.cancel();
                let pages = worker_ctx.pages.lock().await.clone();
                (pages, Outcome::Timeout)
            }
            _ = cancellation.cancelled() => {
                let pages = worker_ctx.pages.lock().await.clone();
                (pages, Outcome::Cancelled)
            }
        };
        ticker.abort();

        // A seed URL that never fetched successfully is fatal (spec §4.7),
        // distinct from an ordinary cancellation or a deeper per-URL failure.
        let seed_failure = worker_ctx.seed_fetch_failed.lock().await.clone();
        match seed_failure {
            Some(reason) => {
                self.fail(&job, &stream, &format!("seed URL unreachable: {reason}"))
                    .await
            }
            None => self.finalise(&job, &stream, pages, outcome).await,
        }
    }

    async fn seed_from_sitemap(
        &self,
        job: &Arc<Mutex<Job>>,
        ctx: &Arc<WorkerContext>,
        queue: &Arc<JobQueue>,
        seed_normalized: &str,
        seed_origin: &str,
    ) {
        let domain = match domain_from_url(seed_normalized) {
            Some(d) => d,
            None => return,
        };

        let sitemap_urls = match tokio::time::timeout(SITEMAP_TIMEOUT, RobotsChecker::new(&domain)).await {
            Ok(Ok(checker)) if !checker.sitemaps.is_empty() => checker.sitemaps,
            _ => vec![format!("https://{domain}/sitemap.xml")],
        };

        let result = match tokio::time::timeout(
            SITEMAP_TIMEOUT,
            sitemap::fetch_sitemap_urls(&sitemap_urls, &domain, MAX_CHILD_SITEMAPS),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => return,
        };

        let config = { job.lock().await.config.clone() };
        let mut fresh = Vec::new();
        let mut dedup = ctx.dedup.lock().await;
        let mut j = job.lock().await;
        for raw in result.urls {
            if j.counters.discovered >= config.max_pages {
                break;
            }
            let normalized = normalize::normalize_url(&raw, None);
            if !normalize::is_valid_url(&normalized, seed_origin, config.follow_external_links) {
                continue;
            }
            if normalized == seed_normalized || !dedup.mark_visited(&normalized) {
                continue;
            }
            j.counters.discovered += 1;
            fresh.push(NewItem {
                url: raw,
                normalized_url: normalized,
                depth: 1,
                parent_url: Some(seed_normalized.to_string()),
            });
        }
        drop(j);
        drop(dedup);

        if !fresh.is_empty() {
            let inserted = queue.enqueue(fresh).await;
            if inserted > 0 {
                job.lock().await.counters.queued += inserted as u32;
            }
        }
    }

    async fn finalise(
        &self,
        job: &Arc<Mutex<Job>>,
        stream: &Arc<JobStream>,
        mut pages: Vec<PageResult>,
        outcome: Outcome,
    ) -> Outcome {
        pages.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.url.cmp(&b.url)));

        let included: Vec<&PageResult> = pages
            .iter()
            .filter(|p| job_quality_ok(p))
            .collect();

        // §8: `final_markdown` exists iff the job completed normally *and*
        // at least one page cleared the quality threshold.
        let (final_markdown, total_words) = if outcome == Outcome::Completed && !included.is_empty() {
            let markdown = included
                .iter()
                .map(|p| p.to_envelope())
                .collect::<Vec<_>>()
                .join("\n\n---\n\n");
            let words: u64 = included.iter().map(|p| p.word_count as u64).sum();
            (Some(markdown), Some(words))
        } else {
            (None, None)
        };

        let mut j = job.lock().await;
        j.final_markdown = final_markdown;
        j.total_words = total_words;
        j.completed_at = Some(chrono::Utc::now());
        j.updated_at = j.completed_at.unwrap();
        j.status = match outcome {
            Outcome::Completed => JobStatusKind::Completed,
            Outcome::Timeout => JobStatusKind::Timeout,
            Outcome::Cancelled => JobStatusKind::Cancelled,
            Outcome::Failed => JobStatusKind::Failed,
        };
        let total_processed = j.counters.processed + j.counters.filtered;
        let total_discovered = j.counters.discovered;
        drop(j);

        let payload = match outcome {
            Outcome::Completed => ProgressEventPayload::JobCompleted {
                job_id: stream_job_id(job).await,
                total_processed,
                total_discovered,
            },
            Outcome::Timeout => ProgressEventPayload::JobTimeout {
                job_id: stream_job_id(job).await,
                total_processed,
                total_discovered,
                message: "job exceeded its time budget".to_string(),
            },
            Outcome::Cancelled => ProgressEventPayload::JobFailed {
                job_id: stream_job_id(job).await,
                error: "cancelled".to_string(),
                total_processed: Some(total_processed),
                total_discovered: Some(total_discovered),
            },
            Outcome::Failed => ProgressEventPayload::JobFailed {
                job_id: stream_job_id(job).await,
                error: "job failed".to_string(),
                total_processed: Some(total_processed),
                total_discovered: Some(total_discovered),
            },
        };
        stream.publish(payload).await;

        tracing::info!(
            job_id = %stream_job_id(job).await,
            ?outcome,
            total_processed,
            total_discovered,
            "job finished"
        );

        outcome
    }

    async fn fail(&self, job: &Arc<Mutex<Job>>, stream: &Arc<JobStream>, reason: &str) -> Outcome {
        let mut j = job.lock().await;
        j.status = JobStatusKind::Failed;
        j.error = Some(reason.to_string());
        j.completed_at = Some(chrono::Utc::now());
        j.updated_at = j.completed_at.unwrap();
        let job_id = j.job_id.clone();
        drop(j);
        tracing::warn!(job_id = %job_id, reason, "job failed");
        stream
            .publish(ProgressEventPayload::JobFailed {
                job_id,
                error: reason.to_string(),
                total_processed: Some(0),
                total_discovered: Some(0),
            })
            .await;
        Outcome::Failed
    }
}

fn job_quality_ok(page: &PageResult) -> bool {
    page.quality.reason.is_none()
}

/// Emits a `time_update` event once per second (spec §4.7's `tick()`) until
/// the frontier drains or cancellation fires, whichever comes first.
async fn tick_time_updates(
    job: Arc<Mutex<Job>>,
    stream: Arc<JobStream>,
    queue: Arc<JobQueue>,
    cancellation: CancellationToken,
) {
    let start = std::time::Instant::now();
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.tick().await; // first tick fires immediately; we want the first at +1s
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancellation.cancelled() => return,
        }

        let pending = queue.pending_count().await;
        let in_flight = queue.in_flight_count().await;
        let (total_processed, total_discovered) = {
            let j = job.lock().await;
            (j.counters.processed + j.counters.filtered, j.counters.discovered)
        };
        let elapsed = start.elapsed().as_secs_f64();
        stream
            .publish(ProgressEventPayload::TimeUpdate {
                elapsed,
                formatted: format_elapsed(elapsed),
                total_processed,
                total_discovered,
                queue_size: pending + in_flight,
                pending_count: pending,
            })
            .await;

        if pending == 0 && in_flight == 0 {
            return;
        }
    }
}

fn format_elapsed(secs: f64) -> String {
    let total = secs.round() as u64;
    format!("{}m {}s", total / 60, total % 60)
}

async fn stream_job_id(job: &Arc<Mutex<Job>>) -> String {
    job.lock().await.job_id.clone()
}

fn origin_of(normalized_url: &str) -> String {
    url::Url::parse(normalized_url)
        .ok()
        .map(|u| format!("{}://{}", u.scheme(), u.host_str().unwrap_or("")))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobConfig;

    #[tokio::test]
    async fn origin_of_strips_path() {
        assert_eq!(origin_of("https://example.com/docs"), "https://example.com");
    }

    #[test]
    fn format_elapsed_renders_minutes_and_seconds() {
        assert_eq!(format_elapsed(0.0), "0m 0s");
        assert_eq!(format_elapsed(65.4), "1m 5s");
    }

    #[tokio::test]
    async fn fail_marks_job_failed_and_emits_terminal_event() {
        let orch = Orchestrator::new(UrlCache::shared(), Arc::new(RateLimitedFetcher::new()));
        let job = Arc::new(Mutex::new(Job::new(
            "job-1".to_string(),
            "user-1".to_string(),
            "not a url".to_string(),
            JobConfig::default(),
        )));
        let stream = Arc::new(JobStream::new("job-1"));
        let outcome = orch.run(job.clone(), stream.clone(), CancellationToken::new()).await;
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(job.lock().await.status, JobStatusKind::Failed);
        assert_eq!(stream.last_event_id().await, 2);
    }
}
