//! Anonymous identity: every request is attributed to a `user_id` scoped by
//! a signed, cookie-carried opaque token rather than a login. The token is
//! an HMAC-SHA256-signed `{user_id}.{expires_at}` pair, minted on first
//! contact and persisted for a configurable lifetime (one year by default).

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "doc_crawler_anon";

/// The caller's anonymous identity, resolved by [`anonymous_identity`] and
/// available to handlers as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

fn sign(secret: &str, user_id: &str, expires_at: u64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(user_id.as_bytes());
    mac.update(b".");
    mac.update(expires_at.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify_token(secret: &str, token: &str) -> Option<String> {
    let mut parts = token.splitn(3, '.');
    let user_id = parts.next()?;
    let expires_at: u64 = parts.next()?.parse().ok()?;
    let signature = parts.next()?;

    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    if now > expires_at {
        return None;
    }

    if sign(secret, user_id, expires_at) == signature {
        Some(user_id.to_string())
    } else {
        None
    }
}

fn mint(secret: &str, ttl_secs: u64) -> (String, String) {
    let user_id = Uuid::new_v4().to_string();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let expires_at = now + ttl_secs;
    let signature = sign(secret, &user_id, expires_at);
    (user_id.clone(), format!("{user_id}.{expires_at}.{signature}"))
}

/// Resolves the caller's anonymous identity: verifies the signed cookie if
/// present and unexpired, mints and sets a fresh one otherwise.
pub async fn anonymous_identity(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let existing = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| find_cookie(cookies, COOKIE_NAME))
        .and_then(|token| verify_token(&state.config.shared_secret, &token));

    let (user_id, set_cookie) = match existing {
        Some(user_id) => (user_id, None),
        None => {
            let (user_id, token) =
                mint(&state.config.shared_secret, state.config.anon_token_ttl_secs);
            let cookie = format!(
                "{COOKIE_NAME}={token}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
                state.config.anon_token_ttl_secs
            );
            (user_id, Some(cookie))
        }
    };

    request.extensions_mut().insert(UserId(user_id));
    let mut response = next.run(request).await;
    if let Some(cookie) = set_cookie {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

fn find_cookie(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_then_verify_round_trips() {
        let (user_id, token) = mint("secret", 3600);
        assert_eq!(verify_token("secret", &token), Some(user_id));
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        let (_, token) = mint("secret", 3600);
        let mut tampered = token.clone();
        tampered.push('f');
        assert_eq!(verify_token("secret", &tampered), None);
    }

    #[test]
    fn verify_rejects_expired_token() {
        let (_, token) = mint("secret", 0);
        std::thread::sleep(std::time::Duration::from_secs(1));
        assert_eq!(verify_token("secret", &token), None);
    }

    #[test]
    fn find_cookie_extracts_named_value() {
        let cookies = "other=1; doc_crawler_anon=abc123; third=2";
        assert_eq!(
            find_cookie(cookies, COOKIE_NAME),
            Some("abc123".to_string())
        );
    }
}
