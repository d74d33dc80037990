//! Job Registry: the single authority for job lifecycle — creation,
//! lookup, listing, cancellation, and download — each operation scoped to
//! the requesting `user_id`. A job belonging to another user is reported as
//! not found rather than forbidden, so existence is never leaked across
//! accounts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::UrlCache;
use crate::crawler::fetcher::RateLimitedFetcher;
use crate::models::{Job, JobConfig, JobSummary};
use crate::normalize::ssrf_guard;
use crate::orchestrator::Orchestrator;
use crate::stream::JobStream;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job not found")]
    NotFound,
    #[error("invalid seed url: {0}")]
    InvalidSeedUrl(String),
    #[error("invalid job configuration: {0}")]
    InvalidConfig(#[from] crate::models::ConfigValidationError),
    #[error("too many concurrent jobs")]
    TooManyJobs,
}

/// Result of a download request: a job can be queried before it finishes
/// (`NotReady`), after it finishes with no page clearing the quality
/// threshold (`NoContent`), or after it finishes with an artifact (`Ready`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    NotReady,
    NoContent,
    Ready(String),
}

struct JobHandle {
    job: Arc<Mutex<Job>>,
    stream: Arc<JobStream>,
    cancellation: CancellationToken,
}

const REAP_INTERVAL: Duration = Duration::from_secs(60);

pub struct JobRegistry {
    cache: Arc<UrlCache>,
    fetcher: Arc<RateLimitedFetcher>,
    jobs: Mutex<HashMap<String, JobHandle>>,
    max_concurrent_jobs: usize,
}

impl JobRegistry {
    pub fn new(
        cache: Arc<UrlCache>,
        fetcher: Arc<RateLimitedFetcher>,
        max_concurrent_jobs: usize,
    ) -> Self {
        JobRegistry {
            cache,
            fetcher,
            jobs: Mutex::new(HashMap::new()),
            max_concurrent_jobs,
        }
    }

    /// Builds a shared registry and spawns its background reaper, which
    /// evicts terminal jobs older than `retention_secs` past completion so
    /// the process doesn't accumulate job records forever.
    pub fn shared(
        cache: Arc<UrlCache>,
        fetcher: Arc<RateLimitedFetcher>,
        max_concurrent_jobs: usize,
        retention_secs: u64,
    ) -> Arc<Self> {
        let registry = Arc::new(Self::new(cache, fetcher, max_concurrent_jobs));
        let weak = Arc::downgrade(&registry);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(REAP_INTERVAL).await;
                match weak.upgrade() {
                    Some(registry) => registry.reap(retention_secs).await,
                    None => return,
                }
            }
        });
        registry
    }

    /// Removes every job handle whose job reached a terminal state more
    /// than `retention_secs` ago.
    async fn reap(&self, retention_secs: u64) {
        let now = chrono::Utc::now();
        let mut jobs = self.jobs.lock().await;
        let mut expired = Vec::new();
        for (job_id, handle) in jobs.iter() {
            let job = handle.job.lock().await;
            let Some(completed_at) = job.completed_at else {
                continue;
            };
            let age = (now - completed_at).num_seconds();
            if age >= 0 && age as u64 > retention_secs {
                expired.push(job_id.clone());
            }
        }
        for job_id in &expired {
            jobs.remove(job_id);
        }
        drop(jobs);
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "reaped expired jobs");
        }
    }

    /// Validates the seed URL and config, registers the job, and spawns the
    /// orchestrator in the background. Returns immediately with the job in
    /// `pending`/`running` state. Rejects with [`RegistryError::TooManyJobs`]
    /// once the process-wide cap of non-terminal jobs is reached.
    pub async fn create(
        self: &Arc<Self>,
        user_id: String,
        seed_url: String,
        config: JobConfig,
    ) -> Result<Job, RegistryError> {
        config.validate()?;
        ssrf_guard(&seed_url).map_err(|e| RegistryError::InvalidSeedUrl(e.to_string()))?;

        let mut jobs = self.jobs.lock().await;
        let active_count = {
            let mut count = 0;
            for handle in jobs.values() {
                if !handle.job.lock().await.status.is_terminal() {
                    count += 1;
                }
            }
            count
        };
        if active_count >= self.max_concurrent_jobs {
            return Err(RegistryError::TooManyJobs);
        }

        let job_id = Uuid::new_v4().to_string();
        let job = Job::new(job_id.clone(), user_id, seed_url, config);
        let job_arc = Arc::new(Mutex::new(job.clone()));
        let stream = Arc::new(JobStream::new(job_id.clone()));
        let cancellation = CancellationToken::new();

        jobs.insert(
            job_id.clone(),
            JobHandle {
                job: job_arc.clone(),
                stream: stream.clone(),
                cancellation: cancellation.clone(),
            },
        );
        drop(jobs);

        tracing::info!(job_id = %job_id, user_id = %job.user_id, seed_url = %job.seed_url, "job created");

        let registry = self.clone();
        let job_for_task = job_arc.clone();
        tokio::spawn(async move {
            let orchestrator = Orchestrator::new(registry.cache.clone(), registry.fetcher.clone());
            orchestrator.run(job_for_task, stream, cancellation).await;
        });

        Ok(job)
    }

    pub async fn get(&self, job_id: &str, user_id: &str) -> Result<Job, RegistryError> {
        let jobs = self.jobs.lock().await;
        let handle = jobs.get(job_id).ok_or(RegistryError::NotFound)?;
        let job = handle.job.lock().await;
        if job.user_id != user_id {
            return Err(RegistryError::NotFound);
        }
        Ok(job.clone())
    }

    pub async fn list_active(&self, user_id: &str) -> Vec<JobSummary> {
        let jobs = self.jobs.lock().await;
        let mut out = Vec::new();
        for handle in jobs.values() {
            let job = handle.job.lock().await;
            if job.user_id == user_id && !job.status.is_terminal() {
                out.push(JobSummary::from(&*job));
            }
        }
        out
    }

    pub async fn cancel(&self, job_id: &str, user_id: &str) -> Result<(), RegistryError> {
        let jobs = self.jobs.lock().await;
        let handle = jobs.get(job_id).ok_or(RegistryError::NotFound)?;
        let job = handle.job.lock().await;
        if job.user_id != user_id {
            return Err(RegistryError::NotFound);
        }
        let terminal = job.status.is_terminal();
        drop(job);
        if !terminal {
            handle.cancellation.cancel();
            tracing::info!(job_id = %job_id, "job cancelled");
        }
        Ok(())
    }

    /// Returns the job's serialized artifact (every included page's
    /// envelope, concatenated) once it has reached a terminal state.
    pub async fn download(&self, job_id: &str, user_id: &str) -> Result<DownloadOutcome, RegistryError> {
        let job = self.get(job_id, user_id).await?;
        if !job.status.is_terminal() {
            return Ok(DownloadOutcome::NotReady);
        }
        match job.final_markdown {
            Some(markdown) => Ok(DownloadOutcome::Ready(markdown)),
            None => Ok(DownloadOutcome::NoContent),
        }
    }

    pub async fn subscribe_stream(&self, job_id: &str, user_id: &str) -> Result<Arc<JobStream>, RegistryError> {
        let jobs = self.jobs.lock().await;
        let handle = jobs.get(job_id).ok_or(RegistryError::NotFound)?;
        let job = handle.job.lock().await;
        if job.user_id != user_id {
            return Err(RegistryError::NotFound);
        }
        Ok(handle.stream.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<JobRegistry> {
        JobRegistry::shared(UrlCache::shared(), Arc::new(RateLimitedFetcher::new()), 5, 3600)
    }

    #[tokio::test]
    async fn reap_evicts_only_terminal_jobs_past_retention() {
        let reg = Arc::new(JobRegistry::new(UrlCache::shared(), Arc::new(RateLimitedFetcher::new()), 5));
        let job = reg
            .create(
                "user-1".to_string(),
                "https://example.com/docs".to_string(),
                JobConfig::default(),
            )
            .await
            .unwrap();

        {
            let jobs = reg.jobs.lock().await;
            let mut j = jobs.get(&job.job_id).unwrap().job.lock().await;
            j.status = crate::models::JobStatusKind::Completed;
            j.completed_at = Some(chrono::Utc::now() - chrono::Duration::seconds(120));
        }

        reg.reap(60).await;
        assert!(reg.get(&job.job_id, "user-1").await.is_err());
    }

    #[tokio::test]
    async fn reap_keeps_non_terminal_and_fresh_jobs() {
        let reg = Arc::new(JobRegistry::new(UrlCache::shared(), Arc::new(RateLimitedFetcher::new()), 5));
        let job = reg
            .create(
                "user-1".to_string(),
                "https://example.com/docs".to_string(),
                JobConfig::default(),
            )
            .await
            .unwrap();

        reg.reap(60).await;
        assert!(reg.get(&job.job_id, "user-1").await.is_ok());
    }

    #[tokio::test]
    async fn create_rejects_once_concurrent_cap_reached() {
        let reg = JobRegistry::shared(UrlCache::shared(), Arc::new(RateLimitedFetcher::new()), 1, 3600);
        reg.create(
            "user-1".to_string(),
            "https://example.com/docs".to_string(),
            JobConfig::default(),
        )
        .await
        .unwrap();

        let err = reg
            .create(
                "user-1".to_string(),
                "https://example.com/other".to_string(),
                JobConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::TooManyJobs));
    }

    #[tokio::test]
    async fn create_rejects_ssrf_seed_url() {
        let reg = registry();
        let err = reg
            .create(
                "user-1".to_string(),
                "http://127.0.0.1/".to_string(),
                JobConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSeedUrl(_)));
    }

    #[tokio::test]
    async fn create_rejects_invalid_config() {
        let reg = registry();
        let mut config = JobConfig::default();
        config.max_concurrent_requests = 0;
        let err = reg
            .create("user-1".to_string(), "https://example.com".to_string(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn get_is_scoped_to_owning_user() {
        let reg = registry();
        let job = reg
            .create(
                "user-1".to_string(),
                "https://example.com/docs".to_string(),
                JobConfig::default(),
            )
            .await
            .unwrap();

        assert!(reg.get(&job.job_id, "user-1").await.is_ok());
        let err = reg.get(&job.job_id, "user-2").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound));
    }

    #[tokio::test]
    async fn unknown_job_id_is_not_found() {
        let reg = registry();
        let err = reg.get("nonexistent", "user-1").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound));
    }

    #[tokio::test]
    async fn cancel_is_scoped_to_owning_user() {
        let reg = registry();
        let job = reg
            .create(
                "user-1".to_string(),
                "https://example.com/docs".to_string(),
                JobConfig::default(),
            )
            .await
            .unwrap();

        let err = reg.cancel(&job.job_id, "user-2").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound));
        assert!(reg.cancel(&job.job_id, "user-1").await.is_ok());
    }
}
