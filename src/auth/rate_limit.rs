//! Sliding-window rate limiting.
//!
//! DashMap-backed and per-process, which matches the single-instance exchange.
//! Clients are identified by forwarded IP headers with a shared-bucket
//! fallback.

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::utils::response::ApiError;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window_secs: 60,
        }
    }
}

#[derive(Clone)]
struct WindowEntry {
    request_count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    entries: Arc<DashMap<String, WindowEntry>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let entries: Arc<DashMap<String, WindowEntry>> = Arc::new(DashMap::new());

        // Periodically drop idle windows.
        let cleanup = entries.clone();
        let window_secs = config.window_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(window_secs * 2));
            loop {
                interval.tick().await;
                let now = Instant::now();
                let window = Duration::from_secs(window_secs);
                cleanup.retain(|_, entry| now.duration_since(entry.window_start) < window);
            }
        });

        Self { entries, config }
    }

    /// Returns seconds until reset when the client is over budget.
    pub fn check(&self, client_id: &str) -> Result<(), u64> {
        let now = Instant::now();
        let window = Duration::from_secs(self.config.window_secs);

        let mut entry = self
            .entries
            .entry(client_id.to_string())
            .or_insert_with(|| WindowEntry {
                request_count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= window {
            entry.request_count = 0;
            entry.window_start = now;
        }
        entry.request_count += 1;

        if entry.request_count > self.config.max_requests {
            let elapsed = now.duration_since(entry.window_start).as_secs();
            return Err(self.config.window_secs.saturating_sub(elapsed).max(1));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct RateLimiterState(pub Arc<RateLimiter>);

impl RateLimiterState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self(Arc::new(RateLimiter::new(config)))
    }
}

/// Identify the client by `X-Forwarded-For` / `X-Real-IP`, falling back to a
/// shared bucket.
pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiterState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client_id = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get("X-Real-IP")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    match limiter.0.check(&client_id) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => {
            tracing::warn!(client = %client_id, retry_after_secs, "rate limit exceeded");
            let mut response =
                ApiError::rate_limited("too many requests, slow down").into_response();
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
    }
}
