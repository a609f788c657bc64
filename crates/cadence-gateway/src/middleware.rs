use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use cadence_security::{RateDecision, RateLimiter};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

/// Bucket shared by callers with neither an accepted key nor a known peer.
const SHARED_BUCKET: &str = "anonymous";

/// API keys accepted by the gateway. Empty means auth is off.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Accepted keys, compared verbatim.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// Accept exactly `api_keys`.
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Whether requests must present a key.
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    fn accepts(&self, key: &str) -> bool {
        self.api_keys.iter().any(|k| k == key)
    }
}

/// State shared by the auth and rate-limit layers.
#[derive(Clone)]
pub struct MiddlewareState {
    /// Absent when rate limiting is off.
    pub rate_limiter: Option<Arc<RateLimiter>>,
    /// Keys checked by the auth layer.
    pub auth: AuthConfig,
}

/// `?api_key=` query parameter.
#[derive(serde::Deserialize, Default)]
pub struct AuthQuery {
    /// Key passed in the query string.
    pub api_key: Option<String>,
}

/// `Authorization: Bearer <key>` first, then `?api_key=<key>`.
fn presented_key(headers: &HeaderMap, query: &AuthQuery) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.api_key.clone())
}

/// Rate-limit identity of a request.
///
/// A key counts only when auth is on and accepts it. Everything else is
/// bucketed by peer address, or shares one bucket when the peer is unknown.
fn client_identity(
    auth: &AuthConfig,
    presented: Option<&str>,
    peer: Option<SocketAddr>,
) -> String {
    match (presented, peer) {
        (Some(key), _) if auth.is_enabled() && auth.accepts(key) => format!("key:{key}"),
        (_, Some(addr)) => format!("ip:{}", addr.ip()),
        _ => SHARED_BUCKET.to_string(),
    }
}

fn reject(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": kind, "message": message })),
    )
        .into_response()
}

/// Rejects requests without a configured API key. `/health` is always open.
pub async fn auth_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if !state.auth.is_enabled() || request.uri().path() == "/health" {
        return next.run(request).await;
    }

    match presented_key(&headers, &query) {
        Some(k) if state.auth.accepts(&k) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request: invalid API key");
            reject(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid API key")
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request: missing API key");
            reject(StatusCode::UNAUTHORIZED, "unauthorized", "API key required")
        }
    }
}

/// Token bucket per accepted API key or peer address.
///
/// Runs before auth, so rejected key guesses spend the caller's bucket too.
pub async fn rate_limit_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = &state.rate_limiter else {
        return next.run(request).await;
    };
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let presented = presented_key(&headers, &query);
    let client = client_identity(&state.auth, presented.as_deref(), peer);

    match limiter.check(&client) {
        RateDecision::Allowed => next.run(request).await,
        RateDecision::Limited { retry_after } => {
            let who = peer.map_or_else(|| "unknown".to_string(), |a| a.ip().to_string());
            warn!(path = %request.uri().path(), peer = %who, "Rate limited request");
            let mut resp = reject(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded",
            );
            let secs = retry_after.as_secs_f64().ceil().min(86_400.0) as u64;
            if let Ok(v) = HeaderValue::from_str(&secs.max(1).to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, v);
            }
            resp
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_disabled() {
        assert!(!AuthConfig::new(vec![]).is_enabled());
        assert!(AuthConfig::new(vec!["k".into()]).is_enabled());
    }

    #[test]
    fn test_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        let query = AuthQuery {
            api_key: Some("from-query".into()),
        };
        assert_eq!(presented_key(&headers, &query).as_deref(), Some("from-header"));
        assert_eq!(
            presented_key(&HeaderMap::new(), &query).as_deref(),
            Some("from-query")
        );
        assert!(presented_key(&HeaderMap::new(), &AuthQuery::default()).is_none());
    }

    #[test]
    fn test_unverified_keys_never_pick_the_bucket() {
        let peer: SocketAddr = "203.0.113.9:51000".parse().unwrap();
        let off = AuthConfig::default();
        assert_eq!(client_identity(&off, Some("made-up"), Some(peer)), "ip:203.0.113.9");
        assert_eq!(client_identity(&off, Some("made-up"), None), SHARED_BUCKET);

        let on = AuthConfig::new(vec!["ops".into()]);
        assert_eq!(client_identity(&on, Some("ops"), Some(peer)), "key:ops");
        assert_eq!(client_identity(&on, Some("guess"), Some(peer)), "ip:203.0.113.9");
    }
}
