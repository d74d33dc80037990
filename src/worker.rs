//! Worker Pool: `concurrency` cooperating tasks draining a single job's
//! queue. Each claimed item goes through the same eight-step pipeline —
//! normalise/validate, cache lookup, fetch, extract, score, record,
//! discover, account — regardless of which worker happens to claim it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::cache::UrlCache;
use crate::crawler::fetcher::{FetchError, FetchOptions, RateLimitedFetcher};
use crate::crawler::robots::RobotsChecker;
use crate::crawler::{domain_from_url, extractor};
use crate::models::{
    CacheEntry, Job, JobConfig, PageResult, PageResultStatus, ProgressEventPayload, Quality,
    QualityReason,
};
use crate::normalize::{self, JobDedup};
use crate::queue::{JobQueue, NewItem};
use crate::stream::JobStream;

/// Everything one item's processing needs, shared across a job's workers.
pub struct WorkerContext {
    pub job: Arc<Mutex<Job>>,
    pub config: JobConfig,
    pub seed_origin: String,
    pub queue: Arc<JobQueue>,
    pub cache: Arc<UrlCache>,
    pub dedup: Arc<Mutex<JobDedup>>,
    pub fetcher: Arc<RateLimitedFetcher>,
    pub stream: Arc<JobStream>,
    pub cancellation: CancellationToken,
    pub pages: Arc<Mutex<Vec<PageResult>>>,
    /// Set when the seed URL (depth 0) exhausts its retries without a
    /// successful fetch — spec §4.7 treats this as fatal, unlike an
    /// ordinary per-URL failure deeper in the crawl.
    pub seed_fetch_failed: Arc<Mutex<Option<String>>>,
    robots: RwLock<HashMap<String, Arc<RobotsChecker>>>,
}

impl WorkerContext {
    pub fn new(
        job: Arc<Mutex<Job>>,
        config: JobConfig,
        seed_origin: String,
        queue: Arc<JobQueue>,
        cache: Arc<UrlCache>,
        fetcher: Arc<RateLimitedFetcher>,
        stream: Arc<JobStream>,
        cancellation: CancellationToken,
    ) -> Self {
        WorkerContext {
            job,
            config,
            seed_origin,
            queue,
            cache,
            dedup: Arc::new(Mutex::new(JobDedup::new())),
            fetcher,
            stream,
            cancellation,
            pages: Arc::new(Mutex::new(Vec::new())),
            seed_fetch_failed: Arc::new(Mutex::new(None)),
            robots: RwLock::new(HashMap::new()),
        }
    }

    async fn robots_allows(&self, url: &str) -> bool {
        if !self.config.respect_robots {
            return true;
        }
        let domain = match domain_from_url(url) {
            Some(d) => d,
            None => return true,
        };
        {
            let cached = self.robots.read().await;
            if let Some(checker) = cached.get(&domain) {
                return checker.is_allowed(url, crate::crawler::fetcher::USER_AGENT);
            }
        }
        let checker = RobotsChecker::new(&domain)
            .await
            .unwrap_or_else(|_| RobotsChecker::from_content(""));
        let allowed = checker.is_allowed(url, crate::crawler::fetcher::USER_AGENT);
        self.robots
            .write()
            .await
            .insert(domain, Arc::new(checker));
        allowed
    }
}

/// Runs `concurrency` worker loops to completion (each exits once the queue
/// is drained or cancellation fires) and returns the finished page results.
pub async fn run_pool(ctx: Arc<WorkerContext>, concurrency: usize) -> Vec<PageResult> {
    let mut handles = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move { worker_loop(ctx).await }));
    }
    for handle in handles {
        let _ = handle.await;
    }
    ctx.pages.lock().await.clone()
}

async fn worker_loop(ctx: Arc<WorkerContext>) {
    loop {
        if ctx.cancellation.is_cancelled() {
            return;
        }
        let items = ctx.queue.claim_batch(1).await;
        if items.is_empty() {
            if ctx.queue.pending_count().await == 0 && ctx.queue.in_flight_count().await == 0 {
                return;
            }
            tokio::select! {
                _ = ctx.queue.notify.notified() => {}
                _ = ctx.cancellation.cancelled() => return,
                _ = tokio::time::sleep(std::time::Duration::from_millis(150)) => {}
            }
            continue;
        }
        for item in items {
            if ctx.cancellation.is_cancelled() {
                return;
            }
            process_item(&ctx, item).await;
        }
    }
}

async fn process_item(ctx: &Arc<WorkerContext>, item: crate::models::QueueItem) {
    let depth = item.depth;
    let url = item.normalized_url.clone();

    ctx.stream
        .publish(ProgressEventPayload::UrlStarted {
            url: url.clone(),
            depth,
        })
        .await;

    // Step 1: normalise/validate. The item is already normalised at
    // enqueue time; re-check validity defensively in case config changed.
    if url.is_empty() || !normalize::is_valid_url(&url, &ctx.seed_origin, ctx.config.follow_external_links) {
        skip(ctx, &item, "invalid url").await;
        return;
    }

    if !ctx.config.force_refresh {
        if let Some(entry) = ctx.cache.get(&url).await {
            let below_threshold = entry.quality_score < ctx.config.quality_threshold;
            ctx.stream
                .publish(ProgressEventPayload::UrlCrawled {
                    url: url.clone(),
                    success: true,
                    content_length: entry.content_markdown.len(),
                    title: Some(entry.title.clone()),
                    from_cache: Some(true),
                    quality: Some(Quality {
                        score: entry.quality_score,
                        reason: below_threshold.then_some(QualityReason::BelowThreshold),
                    }),
                })
                .await;

            let page = PageResult {
                job_id: item.job_id.clone(),
                url: url.clone(),
                title: entry.title.clone(),
                content_markdown: entry.content_markdown.clone(),
                content_hash: entry.content_hash.clone(),
                word_count: entry.word_count,
                has_code: entry.content_markdown.contains("```"),
                depth,
                parent: item.parent_url.clone(),
                hierarchy: crate::models::Hierarchy::default(),
                anchor: None,
                status: PageResultStatus::Complete,
                error: None,
                timestamp: chrono::Utc::now(),
                token_count: None,
                quality: Quality {
                    score: entry.quality_score,
                    reason: below_threshold.then_some(QualityReason::BelowThreshold),
                },
            };
            ctx.pages.lock().await.push(page);

            {
                let mut job = ctx.job.lock().await;
                if below_threshold {
                    job.counters.filtered += 1;
                } else {
                    job.counters.processed += 1;
                }
                job.updated_at = chrono::Utc::now();
            }

            ctx.queue.complete(item.item_id).await;
            finish_success(ctx, &item, entry.clone(), entry.links.clone()).await;
            return;
        }
    }

    if !ctx.robots_allows(&url).await {
        tracing::debug!(url = %url, "blocked by robots.txt");
        ctx.queue.fail(item.item_id, false).await;
        bump_failed(ctx).await;
        ctx.stream
            .publish(ProgressEventPayload::UrlFailed {
                url: url.clone(),
                error: FetchError::RobotsDenied.to_string(),
            })
            .await;
        return;
    }

    let fetch_opts = FetchOptions {
        rate_limit_ms: ctx.config.rate_limit_ms,
        page_timeout_ms: ctx.config.page_timeout_ms,
        max_retries: ctx.config.max_retries,
    };

    let fetched = match ctx.fetcher.fetch(&url, fetch_opts).await {
        Ok(r) => r,
        Err(err) => {
            let terminal = ctx.queue.fail(item.item_id, err.is_retryable()).await;
            if terminal {
                bump_failed(ctx).await;
                tracing::warn!(url = %url, error = %err, "fetch failed");
                ctx.stream
                    .publish(ProgressEventPayload::UrlFailed {
                        url: url.clone(),
                        error: err.to_string(),
                    })
                    .await;
                if depth == 0 {
                    *ctx.seed_fetch_failed.lock().await = Some(err.to_string());
                    ctx.cancellation.cancel();
                }
            }
            return;
        }
    };

    let extract_opts = extractor::ExtractOptions {
        include_code_blocks: ctx.config.include_code_blocks,
        exclude_navigation: ctx.config.exclude_navigation,
        include_anchors: ctx.config.include_anchors,
    };

    let extracted = match extractor::extract(&fetched.body, &fetched.final_url, extract_opts) {
        Ok(e) => e,
        Err(err) => {
            let terminal = ctx.queue.fail(item.item_id, false).await;
            if terminal {
                bump_failed(ctx).await;
                ctx.stream
                    .publish(ProgressEventPayload::UrlFailed {
                        url: url.clone(),
                        error: err.to_string(),
                    })
                    .await;
            }
            return;
        }
    };

    // Step 4: content-hash dedup.
    let is_new_content = ctx.dedup.lock().await.mark_content(&extracted.content_hash);
    if !is_new_content {
        skip(ctx, &item, "duplicate content").await;
        return;
    }

    // Step 5: quality gate.
    let has_code = extracted.markdown.contains("```");
    let heading_count = [
        &extracted.hierarchy.lvl0,
        &extracted.hierarchy.lvl1,
        &extracted.hierarchy.lvl2,
        &extracted.hierarchy.lvl3,
        &extracted.hierarchy.lvl4,
        &extracted.hierarchy.lvl5,
    ]
    .iter()
    .filter(|h| h.is_some())
    .count() as u32;
    let score = crate::crawler::quality::assess(extracted.word_count, heading_count, has_code);
    let below_threshold = score < ctx.config.quality_threshold;

    let entry = CacheEntry {
        url_hash: normalize::url_hash(&url),
        url: url.clone(),
        title: extracted.title.clone(),
        content_markdown: extracted.markdown.clone(),
        links: extracted.links.clone(),
        quality_score: score,
        word_count: extracted.word_count,
        content_hash: extracted.content_hash.clone(),
        cached_at: chrono::Utc::now(),
        ttl_secs: crate::cache::DEFAULT_TTL_SECS,
    };
    ctx.cache.put(&url, entry.clone()).await;

    ctx.stream
        .publish(ProgressEventPayload::UrlCrawled {
            url: url.clone(),
            success: true,
            content_length: extracted.markdown.len(),
            title: Some(extracted.title.clone()),
            from_cache: Some(false),
            quality: Some(Quality {
                score,
                reason: below_threshold.then_some(QualityReason::BelowThreshold),
            }),
        })
        .await;

    let page = PageResult {
        job_id: item.job_id.clone(),
        url: url.clone(),
        title: extracted.title.clone(),
        content_markdown: extracted.markdown.clone(),
        content_hash: extracted.content_hash.clone(),
        word_count: extracted.word_count,
        has_code,
        depth,
        parent: item.parent_url.clone(),
        hierarchy: extracted.hierarchy.clone(),
        anchor: extracted.anchor.clone(),
        status: PageResultStatus::Complete,
        error: None,
        timestamp: chrono::Utc::now(),
        token_count: None,
        quality: Quality {
            score,
            reason: below_threshold.then_some(QualityReason::BelowThreshold),
        },
    };
    ctx.pages.lock().await.push(page);

    {
        let mut job = ctx.job.lock().await;
        if below_threshold {
            job.counters.filtered += 1;
        } else {
            job.counters.processed += 1;
        }
        job.updated_at = chrono::Utc::now();
    }

    ctx.queue.complete(item.item_id).await;
    finish_success(ctx, &item, entry, extracted.links).await;
}

/// Shared tail of the cache-hit and fresh-fetch paths: discover outbound
/// links and fan them into the queue, subject to depth and page caps.
async fn finish_success(
    ctx: &Arc<WorkerContext>,
    item: &crate::models::QueueItem,
    _entry: CacheEntry,
    links: Vec<String>,
) {
    let next_depth = item.depth + 1;
    if next_depth > ctx.config.max_depth {
        emit_progress(ctx).await;
        return;
    }

    let base = url::Url::parse(&item.normalized_url).ok();
    let mut fresh = Vec::new();
    let mut dedup = ctx.dedup.lock().await;
    let mut job = ctx.job.lock().await;
    for raw in &links {
        if job.counters.discovered >= ctx.config.max_pages {
            break;
        }
        let normalized = normalize::normalize_url(raw, base.as_ref());
        if !normalize::is_valid_url(&normalized, &ctx.seed_origin, ctx.config.follow_external_links) {
            continue;
        }
        if !dedup.mark_visited(&normalized) {
            continue;
        }
        job.counters.discovered += 1;
        ctx.stream
            .publish(ProgressEventPayload::SentToProcessing {
                url: normalized.clone(),
            })
            .await;
        fresh.push(NewItem {
            url: raw.clone(),
            normalized_url: normalized,
            depth: next_depth,
            parent_url: Some(item.normalized_url.clone()),
        });
    }
    let total_discovered = job.counters.discovered;
    drop(job);
    drop(dedup);

    if !fresh.is_empty() {
        let discovered_urls: Vec<String> = fresh.iter().map(|n| n.normalized_url.clone()).collect();
        let count = fresh.len();
        let inserted = ctx.queue.enqueue(fresh).await;
        if inserted > 0 {
            let mut job = ctx.job.lock().await;
            job.counters.queued += inserted as u32;
            drop(job);
            ctx.stream
                .publish(ProgressEventPayload::UrlsDiscovered {
                    source_url: item.normalized_url.clone(),
                    discovered_urls,
                    count,
                    total_discovered,
                })
                .await;
        }
    }

    emit_progress(ctx).await;
}

async fn emit_progress(ctx: &Arc<WorkerContext>) {
    let job = ctx.job.lock().await;
    let counters = job.counters.clone();
    drop(job);
    ctx.stream
        .publish(ProgressEventPayload::Progress {
            processed: counters.processed + counters.filtered,
            discovered: counters.discovered,
            queued: counters.queued,
            pending: ctx.queue.pending_count().await,
        })
        .await;
}

async fn skip(ctx: &Arc<WorkerContext>, item: &crate::models::QueueItem, reason: &str) {
    ctx.queue.complete(item.item_id).await;
    {
        let mut job = ctx.job.lock().await;
        job.counters.skipped += 1;
        job.updated_at = chrono::Utc::now();
    }
    ctx.stream
        .publish(ProgressEventPayload::UrlSkipped {
            url: item.normalized_url.clone(),
            reason: reason.to_string(),
        })
        .await;
}

async fn bump_failed(ctx: &Arc<WorkerContext>) {
    let mut job = ctx.job.lock().await;
    job.counters.failed += 1;
    job.updated_at = chrono::Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JobConfig {
        JobConfig {
            max_depth: 1,
            max_pages: 10,
            quality_threshold: 0,
            respect_robots: false,
            ..Default::default()
        }
    }

    fn test_job() -> Job {
        Job::new(
            "job-1".to_string(),
            "user-1".to_string(),
            "https://example.com/docs".to_string(),
            test_config(),
        )
    }

    #[tokio::test]
    async fn cache_hit_completes_item_and_records_page() {
        let job = Arc::new(Mutex::new(test_job()));
        let queue = Arc::new(JobQueue::new("job-1", 3));
        let cache = UrlCache::shared();
        cache
            .put(
                "https://example.com/docs",
                CacheEntry {
                    url_hash: normalize::url_hash("https://example.com/docs"),
                    url: "https://example.com/docs".to_string(),
                    title: "Docs".to_string(),
                    content_markdown: "# Docs\n\nhello".to_string(),
                    links: vec![],
                    quality_score: 80,
                    word_count: 2,
                    content_hash: "x".to_string(),
                    cached_at: chrono::Utc::now(),
                    ttl_secs: crate::cache::DEFAULT_TTL_SECS,
                },
            )
            .await;

        let ctx = Arc::new(WorkerContext::new(
            job.clone(),
            test_config(),
            "https://example.com".to_string(),
            queue.clone(),
            cache,
            Arc::new(RateLimitedFetcher::new()),
            Arc::new(JobStream::new("job-1")),
            CancellationToken::new(),
        ));

        queue
            .enqueue(vec![NewItem {
                url: "https://example.com/docs".to_string(),
                normalized_url: "https://example.com/docs".to_string(),
                depth: 0,
                parent_url: None,
            }])
            .await;
        let item = queue.claim_batch(1).await.remove(0);

        process_item(&ctx, item).await;

        assert_eq!(queue.in_flight_count().await, 0);
        assert_eq!(queue.pending_count().await, 0);
        assert_eq!(ctx.pages.lock().await.len(), 1);
        assert_eq!(job.lock().await.counters.processed, 1);
    }

    #[tokio::test]
    async fn finish_success_enqueues_unvisited_links_only() {
        let job = Arc::new(Mutex::new(test_job()));
        let queue = Arc::new(JobQueue::new("job-1", 3));
        let ctx = Arc::new(WorkerContext::new(
            job,
            test_config(),
            "https://example.com".to_string(),
            queue.clone(),
            UrlCache::shared(),
            Arc::new(RateLimitedFetcher::new()),
            Arc::new(JobStream::new("job-1")),
            CancellationToken::new(),
        ));

        let item = crate::models::QueueItem {
            item_id: 1,
            job_id: "job-1".to_string(),
            url: "https://example.com/docs".to_string(),
            normalized_url: "https://example.com/docs".to_string(),
            url_hash: normalize::url_hash("https://example.com/docs"),
            depth: 0,
            parent_url: None,
            state: crate::models::QueueItemState::InFlight,
            attempts: 1,
            enqueued_at: chrono::Utc::now(),
            claimed_at: Some(chrono::Utc::now()),
        };

        let links = vec![
            "https://example.com/docs/a".to_string(),
            "https://example.com/docs/a".to_string(),
            "https://other.com/docs/b".to_string(),
        ];

        finish_success(
            &ctx,
            &item,
            CacheEntry {
                url_hash: String::new(),
                url: item.url.clone(),
                title: String::new(),
                content_markdown: String::new(),
                links: links.clone(),
                quality_score: 100,
                word_count: 10,
                content_hash: "x".to_string(),
                cached_at: chrono::Utc::now(),
                ttl_secs: 10,
            },
            links,
        )
        .await;

        assert_eq!(queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn finish_success_respects_max_depth() {
        let job = Arc::new(Mutex::new(test_job()));
        let mut cfg = test_config();
        cfg.max_depth = 0;
        let queue = Arc::new(JobQueue::new("job-1", 3));
        let ctx = Arc::new(WorkerContext::new(
            job,
            cfg,
            "https://example.com".to_string(),
            queue.clone(),
            UrlCache::shared(),
            Arc::new(RateLimitedFetcher::new()),
            Arc::new(JobStream::new("job-1")),
            CancellationToken::new(),
        ));

        let item = crate::models::QueueItem {
            item_id: 1,
            job_id: "job-1".to_string(),
            url: "https://example.com/docs".to_string(),
            normalized_url: "https://example.com/docs".to_string(),
            url_hash: normalize::url_hash("https://example.com/docs"),
            depth: 0,
            parent_url: None,
            state: crate::models::QueueItemState::InFlight,
            attempts: 1,
            enqueued_at: chrono::Utc::now(),
            claimed_at: Some(chrono::Utc::now()),
        };

        finish_success(
            &ctx,
            &item,
            CacheEntry {
                url_hash: String::new(),
                url: item.url.clone(),
                title: String::new(),
                content_markdown: String::new(),
                links: vec!["https://example.com/docs/a".to_string()],
                quality_score: 100,
                word_count: 10,
                content_hash: "x".to_string(),
                cached_at: chrono::Utc::now(),
                ttl_secs: 10,
            },
            vec!["https://example.com/docs/a".to_string()],
        )
        .await;

        assert_eq!(queue.pending_count().await, 0);
    }
}
