//! Authentication and rate-limiting middleware.
//!
//! Auth: `Authorization: Bearer hb_...` API keys, hashed and looked up in
//! storage. Read-type keys are rejected on mutating methods. A
//! fire-and-forget task touches the key's `last_used_at`.
//!
//! Rate limiting: per-key sliding 1-second window, 100 req/s on the
//! ingest path and 30 req/s elsewhere, with `X-RateLimit-*` headers on
//! every limited response.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use loophive_core::{RATE_LIMIT_INGEST, RATE_LIMIT_QUERY};

use crate::auth::{hash_key, AuthContext};
use crate::error::ApiError;
use crate::state::AppState;

/// Paths that bypass authentication. The streaming endpoint does its own
/// auth via a query-parameter token.
const PUBLIC_PATHS: [&str; 4] = ["/health", "/docs", "/openapi.json", "/dashboard"];
const PUBLIC_PREFIXES: [&str; 2] = ["/v1/stream", "/static"];

fn is_public(path: &str) -> bool {
    let trimmed = path.trim_end_matches('/');
    PUBLIC_PATHS.contains(&trimmed) || PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_public(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| {
            ApiError::unauthorized(
                "Missing or invalid Authorization header. Use: Bearer {api_key}",
            )
        })?
        .to_string();

    let info = state
        .storage
        .authenticate(&hash_key(&token))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid API key"))?;

    // Read-only keys can't write.
    let is_mutation = matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    );
    if is_mutation && !info.key_type.can_write() {
        return Err(ApiError::forbidden(
            "Read-only API key cannot perform write operations",
        ));
    }

    // Fire-and-forget last_used_at touch.
    {
        let storage = state.storage.clone();
        let key_id = info.key_id.clone();
        tokio::spawn(async move {
            if let Err(error) = storage.touch_api_key(&key_id).await {
                tracing::warn!(error = %error, "touch_api_key failed");
            }
        });
    }

    request.extensions_mut().insert(AuthContext {
        tenant_id: info.tenant_id,
        key_id: info.key_id,
        key_type: info.key_type,
    });
    Ok(next.run(request).await)
}

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Per-key sliding-window rate limiter. Each window is a mutex-guarded
/// deque of request instants, pruned on every check.
pub struct RateLimiter {
    windows: DashMap<String, Mutex<VecDeque<Instant>>>,
    window: Duration,
}

/// Outcome of one admission check.
pub struct RateDecision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Unix timestamp at which the window resets.
    pub reset: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            window: Duration::from_secs(1),
        }
    }

    pub fn check(&self, key_id: &str, limit: usize) -> RateDecision {
        let now = Instant::now();
        let reset = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() + 1)
            .unwrap_or(0);

        let entry = self
            .windows
            .entry(key_id.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut window = entry.lock().expect("rate window poisoned");
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            window.pop_front();
        }

        if window.len() >= limit {
            return RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset,
            };
        }
        window.push_back(now);
        RateDecision {
            allowed: true,
            limit,
            remaining: limit - window.len(),
            reset,
        }
    }

    /// Drop all window state (test hook).
    pub fn reset(&self) {
        self.windows.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();
    if is_public(&path) {
        return Ok(next.run(request).await);
    }
    // Runs after auth, which injected the context.
    let Some(auth) = request.extensions().get::<AuthContext>().cloned() else {
        return Ok(next.run(request).await);
    };

    let limit = if path.trim_end_matches('/') == "/v1/ingest" {
        RATE_LIMIT_INGEST
    } else {
        RATE_LIMIT_QUERY
    };
    let decision = state.rate_limiter.check(&auth.key_id, limit);

    if !decision.allowed {
        let mut response = ApiError::rate_limited(limit).into_response();
        insert_rate_headers(&mut response, &decision);
        return Ok(response);
    }

    let mut response = next.run(request).await;
    insert_rate_headers(&mut response, &decision);
    Ok(response)
}

fn insert_rate_headers(response: &mut Response, decision: &RateDecision) {
    use axum::http::HeaderValue;
    let headers = response.headers_mut();
    headers.insert(
        "X-RateLimit-Limit",
        HeaderValue::from_str(&decision.limit.to_string()).expect("numeric header"),
    );
    headers.insert(
        "X-RateLimit-Remaining",
        HeaderValue::from_str(&decision.remaining.to_string()).expect("numeric header"),
    );
    headers.insert(
        "X-RateLimit-Reset",
        HeaderValue::from_str(&decision.reset.to_string()).expect("numeric header"),
    );
}
