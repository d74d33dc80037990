//! Fetcher: a rate-limited, retrying HTTP client with backoff, timeout, and
//! user-agent policy. One `DomainLimiter` per host, shared across workers,
//! enforces the per-host minimum gap between requests.

use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

pub const USER_AGENT: &str = "Documentation Crawler — Friendly Bot";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("denied by robots.txt")]
    RobotsDenied,
    #[error("rate limited")]
    RateLimited,
}

impl FetchError {
    /// Network errors and 5xx are retryable; 4xx and robots denials are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Timeout)
            || matches!(self, FetchError::HttpStatus(code) if *code >= 500)
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub final_url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub rate_limit_ms: u64,
    pub page_timeout_ms: u64,
    pub max_retries: u32,
}

type DomainLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Clone)]
pub struct RateLimitedFetcher {
    client: Client,
    domain_limiters: Arc<RwLock<HashMap<String, Arc<DomainLimiter>>>>,
}

impl RateLimitedFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .pool_max_idle_per_host(20)
            .build()
            .expect("failed to build HTTP client");

        RateLimitedFetcher {
            client,
            domain_limiters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_limiter(&self, domain: &str, rate_limit_ms: u64) -> Arc<DomainLimiter> {
        {
            let limiters = self.domain_limiters.read().await;
            if let Some(limiter) = limiters.get(domain) {
                return limiter.clone();
            }
        }

        let mut limiters = self.domain_limiters.write().await;
        limiters
            .entry(domain.to_string())
            .or_insert_with(|| {
                let period = Duration::from_millis(rate_limit_ms.max(1));
                let quota = Quota::with_period(period)
                    .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1).unwrap()));
                Arc::new(RateLimiter::direct(quota))
            })
            .clone()
    }

    /// Fetches `url`, honouring the per-host rate limiter, a per-request
    /// timeout, and exponential backoff retries on network errors and 5xx.
    /// 4xx responses fail immediately without retry.
    pub async fn fetch(&self, url: &str, opts: FetchOptions) -> Result<FetchResult, FetchError> {
        let domain = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_default();

        let limiter = self.get_limiter(&domain, opts.rate_limit_ms).await;

        let mut attempt = 0;
        loop {
            limiter.until_ready().await;

            let result = self.fetch_once(url, opts.page_timeout_ms).await;
            match result {
                Ok(res) => return Ok(res),
                Err(err) if err.is_retryable() && attempt < opts.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
                    tracing::debug!(url, attempt, error = %err, backoff_secs = backoff.as_secs(), "retrying fetch");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, url: &str, page_timeout_ms: u64) -> Result<FetchResult, FetchError> {
        let request = self.client.get(url).send();
        let response = tokio::time::timeout(Duration::from_millis(page_timeout_ms), request)
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(status_code));
        }

        let final_url = response.url().to_string();
        let mut headers = HashMap::new();
        for (name, value) in response.headers().iter() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = tokio::time::timeout(Duration::from_millis(page_timeout_ms), response.text())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(FetchResult {
            status_code,
            body,
            headers,
            final_url,
        })
    }
}

impl Default for RateLimitedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_5xx_are_retryable() {
        assert!(FetchError::Network("boom".into()).is_retryable());
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::HttpStatus(503).is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        assert!(!FetchError::HttpStatus(404).is_retryable());
        assert!(!FetchError::RobotsDenied.is_retryable());
    }
}
