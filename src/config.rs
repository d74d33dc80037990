use std::env;

/// Process-wide configuration, loaded once at startup from the environment.
/// Per-job crawl parameters live in [`crate::models::JobConfig`] instead —
/// this is the ambient stack: bind address, the key used to sign anonymous
/// identity tokens, and the knobs that bound total resource usage across
/// every job the process is running.
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC-SHA256 key used to sign the anonymous user-identity token.
    pub shared_secret: String,
    pub bind_host: String,
    pub port: u16,
    /// Upper bound on jobs running concurrently, process-wide.
    pub max_concurrent_jobs: usize,
    /// Default `max_concurrent_requests` for a job that doesn't specify one.
    pub default_worker_concurrency: usize,
    /// How long a terminal job's record remains queryable.
    pub job_retention_secs: u64,
    /// Lifetime of a minted anonymous identity token.
    pub anon_token_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let shared_secret =
            env::var("SHARED_SECRET").map_err(|_| ConfigError::Missing("SHARED_SECRET"))?;

        let bind_host = env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidValue("PORT", "must be a valid u16"))?;

        let max_concurrent_jobs = env::var("MAX_CONCURRENT_JOBS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::InvalidValue("MAX_CONCURRENT_JOBS", "must be a valid usize")
            })?;

        let default_worker_concurrency = env::var("DEFAULT_WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::InvalidValue("DEFAULT_WORKER_CONCURRENCY", "must be a valid usize")
            })?;

        let job_retention_secs = env::var("JOB_RETENTION_SECS")
            .unwrap_or_else(|_| (7 * 24 * 60 * 60).to_string())
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue("JOB_RETENTION_SECS", "must be a valid u64"))?;

        let anon_token_ttl_secs = env::var("ANON_TOKEN_TTL_SECS")
            .unwrap_or_else(|_| (365 * 24 * 60 * 60).to_string())
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue("ANON_TOKEN_TTL_SECS", "must be a valid u64")
            })?;

        Ok(Config {
            shared_secret,
            bind_host,
            port,
            max_concurrent_jobs,
            default_worker_concurrency,
            job_retention_secs,
            anon_token_ttl_secs,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, &'static str),
}
