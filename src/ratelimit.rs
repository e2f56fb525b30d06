//! Per-client request limiter
//!
//! Fixed-window counter keyed by client address. Best effort and local to
//! this process; a restart or a second instance starts counting afresh.

use bytes::Bytes;
use dashmap::DashMap;
use hyper::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::types::AppError;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window rate limiter
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_requests,
        }
    }

    /// Record a request for `client`. Returns `TooManyRequests` once the
    /// client has used up the current window.
    pub fn check(&self, client: &str) -> Result<(), AppError> {
        let now = Instant::now();
        let mut entry = self.windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started);
            let retry_after_secs = self.window.saturating_sub(elapsed).as_secs().max(1);
            debug!(client, retry_after_secs, "Rate limit exceeded");
            return Err(AppError::TooManyRequests { retry_after_secs });
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop windows that have expired
    pub fn sweep(&self) -> usize {
        let before = self.windows.len();
        let window = self.window;
        self.windows
            .retain(|_, w| w.started.elapsed() < window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Client key: first hop of X-Forwarded-For, else the socket address
pub fn client_key(req: &Request<Bytes>, remote: Option<SocketAddr>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Spawn a background task that sweeps expired windows
pub fn spawn_sweep_task(limiter: Arc<RateLimiter>) {
    let interval = limiter.window.max(Duration::from_secs(30));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = limiter.sweep();
            if removed > 0 {
                debug!(removed, remaining = limiter.tracked_clients(), "Rate limit sweep");
            }
        }
    });

    info!("Rate limit sweep task started");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_after_quota() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        for _ in 0..3 {
            assert!(limiter.check("203.0.113.7").is_ok());
        }
        match limiter.check("203.0.113.7") {
            Err(AppError::TooManyRequests { retry_after_secs }) => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        // Other clients are unaffected
        assert!(limiter.check("198.51.100.1").is_ok());
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1);
        assert!(limiter.check("c").is_ok());
        assert!(limiter.check("c").is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("c").is_ok());
    }

    #[test]
    fn test_sweep_removes_expired() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 5);
        limiter.check("a").unwrap();
        limiter.check("b").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_client_key_prefers_forwarded_for() {
        let req = Request::builder()
            .header("X-Forwarded-For", "203.0.113.7, 10.0.0.2")
            .body(Bytes::new())
            .unwrap();
        let remote: SocketAddr = "10.0.0.2:5123".parse().unwrap();
        assert_eq!(client_key(&req, Some(remote)), "203.0.113.7");

        let bare = Request::builder().body(Bytes::new()).unwrap();
        assert_eq!(client_key(&bare, Some(remote)), "10.0.0.2");
        assert_eq!(client_key(&bare, None), "unknown");
    }
}
