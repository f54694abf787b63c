//! Per-route, per-client-IP sliding-window rate limiting.
//!
//! Generalizes a single global in-memory limiter into a keyed map of
//! limiters: every [`RateLimiterLayer`] is scoped to one route (built with
//! its own `max_requests`/`window`) and keys its sliding window on the
//! caller's IP address, so `/auth/login` and `/events/ingest` can carry
//! different limits without sharing state.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Sliding-window limiter keyed by an arbitrary string (the client IP).
#[derive(Clone)]
pub struct KeyedRateLimiter {
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    max_requests: u32,
    window: Duration,
}

impl KeyedRateLimiter {
    /// Allow `max_requests` per `key` within `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Convenience constructor for a per-minute limit.
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub async fn check(&self, key: &str) -> Result<(), ()> {
        let now = Instant::now();
        let mut guard = self.inner.lock().await;
        let timestamps = guard.entry(key.to_owned()).or_default();

        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() as u32 >= self.max_requests {
            return Err(());
        }

        timestamps.push_back(now);

        // Bound memory: drop keys that have gone idle for a full window.
        if guard.len() > 10_000 {
            guard.retain(|_, ts| {
                ts.back()
                    .is_some_and(|&last| now.duration_since(last) <= self.window)
            });
        }

        Ok(())
    }

    pub fn into_layer(self, route: &'static str) -> RateLimiterLayer {
        RateLimiterLayer {
            limiter: self,
            route,
        }
    }
}

fn client_key(req: &Request<Body>) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_owned();
                }
            }
        }
    }
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    "unknown".to_owned()
}

/// Tower [`Layer`](tower::Layer) enforcing a [`KeyedRateLimiter`] for one named route.
#[derive(Clone)]
pub struct RateLimiterLayer {
    limiter: KeyedRateLimiter,
    route: &'static str,
}

impl<S: Clone> tower::Layer<S> for RateLimiterLayer {
    type Service = RateLimiterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimiterService {
            limiter: self.limiter.clone(),
            route: self.route,
            inner,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiterService<S> {
    limiter: KeyedRateLimiter,
    route: &'static str,
    inner: S,
}

impl<S> tower::Service<Request<Body>> for RateLimiterService<S>
where
    S: tower::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: IntoResponse,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let route = self.route;
        let key = client_key(&req);
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if limiter.check(&key).await.is_err() {
                tracing::warn!(route, client = %key, "rate limit exceeded");
                return Ok((StatusCode::TOO_MANY_REQUESTS, "too many requests").into_response());
            }
            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_the_limit() {
        let limiter = KeyedRateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("1.2.3.4").await.is_ok());
        assert!(limiter.check("1.2.3.4").await.is_ok());
        assert!(limiter.check("1.2.3.4").await.is_err());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = KeyedRateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("1.2.3.4").await.is_ok());
        assert!(limiter.check("5.6.7.8").await.is_ok());
        assert!(limiter.check("1.2.3.4").await.is_err());
    }

    #[tokio::test]
    async fn window_expires() {
        let limiter = KeyedRateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.check("1.2.3.4").await.is_ok());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check("1.2.3.4").await.is_ok());
    }
}
