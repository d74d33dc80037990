pub mod extractor;
pub mod fetcher;
pub mod quality;
pub mod robots;
pub mod sitemap;

pub use fetcher::{FetchError, FetchOptions, RateLimitedFetcher};
pub use robots::RobotsChecker;

use url::Url;

/// Extract the domain (host) portion from a URL string.
pub fn domain_from_url(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}
