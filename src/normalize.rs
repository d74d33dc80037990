//! URL normalisation, validity filtering, SSRF guard, and the hash
//! functions used for per-job and cross-job deduplication.

use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use std::collections::HashSet;
use std::net::IpAddr;
use url::Url;

const DENYLIST_PATHS: &[&str] = &[
    "/cdn-cgi/",
    "/wp-admin/",
    "/wp-content/",
    "/wp-includes/",
    "/assets/",
    "/static/",
    "/dist/",
    "/login",
    "/signup",
    "/register",
    "/account/",
];

const BINARY_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".css", ".js", ".xml", ".pdf",
];

const DOC_HINTS: &[&str] = &[
    "/docs/",
    "/documentation/",
    "/guide/",
    "/reference/",
    "/manual/",
    "/learn/",
    "/tutorial/",
    "/api/",
    "/getting-started",
    "/quickstart",
    "/introduction",
];

/// Normalise a URL per the repository's canonicalisation rules. Returns the
/// empty string for an empty or unparseable input; callers treat that as
/// "skip".
///
/// Order: resolve relative to `base` if given, lowercase scheme and host,
/// strip default ports, drop the fragment, drop the query string entirely
/// (lossy by design), lowercase the path, strip a trailing slash unless the
/// path is root.
pub fn normalize_url(raw: &str, base: Option<&Url>) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let parsed = match base {
        Some(b) => match b.join(raw) {
            Ok(u) => u,
            Err(_) => return String::new(),
        },
        None => match Url::parse(raw) {
            Ok(u) => u,
            Err(_) => return String::new(),
        },
    };

    let scheme = parsed.scheme().to_lowercase();
    let host = match parsed.host_str() {
        Some(h) => h.to_lowercase(),
        None => return String::new(),
    };

    let default_port = match scheme.as_str() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    let port = parsed.port().filter(|p| Some(*p) != default_port);

    let mut path = parsed.path().to_lowercase();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    if path.is_empty() {
        path.push('/');
    }

    let mut out = format!("{scheme}://{host}");
    if let Some(p) = port {
        out.push_str(&format!(":{p}"));
    }
    out.push_str(&path);
    out
}

/// Validity filter applied after normalisation.
pub fn is_valid_url(normalized: &str, seed_origin: &str, follow_external_links: bool) -> bool {
    if normalized.is_empty() {
        return false;
    }

    let url = match Url::parse(normalized) {
        Ok(u) => u,
        Err(_) => return false,
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }

    if !follow_external_links {
        let host = url.host_str().unwrap_or("");
        if !origin_matches(host, seed_origin) {
            return false;
        }
    }

    let path = url.path();

    if DENYLIST_PATHS.iter().any(|p| path.starts_with(p) || path == p.trim_end_matches('/')) {
        return false;
    }

    if BINARY_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }

    if DOC_HINTS.iter().any(|hint| path.starts_with(hint)) {
        return true;
    }

    path.len() > 1
}

fn origin_matches(host: &str, seed_origin: &str) -> bool {
    let seed_host = Url::parse(seed_origin)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()));
    match seed_host {
        Some(seed_host) => host.eq_ignore_ascii_case(&seed_host),
        None => false,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SsrfError {
    #[error("scheme must be http or https")]
    DisallowedScheme,
    #[error("host resolves to a disallowed private or loopback address: {0}")]
    PrivateHost(String),
}

/// Reject seed URLs that point at loopback, link-local, or private address
/// space, or that use a non-http(s) scheme. Applied once, at Job Registry
/// creation time, to any externally supplied seed URL.
pub fn ssrf_guard(url: &str) -> Result<(), SsrfError> {
    let parsed = Url::parse(url).map_err(|_| SsrfError::DisallowedScheme)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(SsrfError::DisallowedScheme);
    }

    let host = parsed.host_str().unwrap_or("");
    if host.eq_ignore_ascii_case("localhost") {
        return Err(SsrfError::PrivateHost(host.to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_disallowed_ip(&ip) {
            return Err(SsrfError::PrivateHost(host.to_string()));
        }
    }

    Ok(())
}

fn is_disallowed_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_private()
                || v4.octets()[0] == 10
                || (v4.octets()[0] == 172 && (16..=31).contains(&v4.octets()[1]))
                || (v4.octets()[0] == 192 && v4.octets()[1] == 168)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// SHA-1 of the scheme-stripped normalised URL — the primary per-job
/// deduplication key. http and https variants of the same URL collapse to
/// the same hash.
pub fn url_hash(normalized_url: &str) -> String {
    let without_scheme = normalized_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(normalized_url);
    let mut hasher = Sha1::new();
    hasher.update(without_scheme.as_bytes());
    hex::encode(hasher.finalize())
}

/// Scheme-preserving SHA-1, tracked alongside `url_hash` as an auxiliary
/// signal so protocol-only variants of a URL remain distinguishable where
/// that distinction matters.
pub fn url_hash_scheme_aware(normalized_url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(normalized_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-1 of lowercased, whitespace-collapsed Markdown — used to detect
/// duplicate content across distinct URLs.
pub fn content_hash(markdown: &str) -> String {
    let collapsed = markdown
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha1::new();
    hasher.update(collapsed.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of the normalised URL, truncated to 16 hex chars and prefixed
/// `crawl:` — the URL Cache's storage key.
pub fn cache_key(normalized_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("crawl:{}", &digest[..16])
}

/// Per-job dedup state: the visited-URL sets and the content-hash set.
/// Callers hold this behind a mutex and use `mark_visited` as the atomic
/// claim-or-skip primitive.
#[derive(Debug, Default)]
pub struct JobDedup {
    visited: HashSet<String>,
    visited_scheme_aware: HashSet<String>,
    content_hashes: HashSet<String>,
}

impl JobDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic w.r.t. the caller's lock: returns `true` (and records the
    /// hash) the first time a URL is seen, `false` on every subsequent call
    /// for the same normalized URL.
    pub fn mark_visited(&mut self, normalized_url: &str) -> bool {
        let hash = url_hash(normalized_url);
        let aux = url_hash_scheme_aware(normalized_url);
        self.visited_scheme_aware.insert(aux);
        self.visited.insert(hash)
    }

    pub fn has_visited(&self, normalized_url: &str) -> bool {
        self.visited.contains(&url_hash(normalized_url))
    }

    /// Returns `true` if this is the first time this content hash has been
    /// seen in the job; `false` on collision (caller marks the page skipped
    /// with reason "duplicate content").
    pub fn mark_content(&mut self, hash: &str) -> bool {
        self.content_hashes.insert(hash.to_string())
    }
}
