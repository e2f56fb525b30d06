//! Process-local request and integration counters
//!
//! Rendered as Prometheus text on `/metrics` and as JSON on `/api/status`.

use serde::Serialize;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::cache::TieredCacheStats;

#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    pub requests_total: AtomicU64,
    pub responses_2xx: AtomicU64,
    pub responses_3xx: AtomicU64,
    pub responses_4xx: AtomicU64,
    pub responses_5xx: AtomicU64,
    pub rate_limited: AtomicU64,
    pub payment_orders_created: AtomicU64,
    pub payments_verified: AtomicU64,
    pub payments_failed: AtomicU64,
    pub emails_sent: AtomicU64,
    pub emails_failed: AtomicU64,
    pub chat_requests: AtomicU64,
    pub chat_fallbacks: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests_total: u64,
    pub responses_2xx: u64,
    pub responses_3xx: u64,
    pub responses_4xx: u64,
    pub responses_5xx: u64,
    pub rate_limited: u64,
    pub payment_orders_created: u64,
    pub payments_verified: u64,
    pub payments_failed: u64,
    pub emails_sent: u64,
    pub emails_failed: u64,
    pub chat_requests: u64,
    pub chat_fallbacks: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests_total: AtomicU64::new(0),
            responses_2xx: AtomicU64::new(0),
            responses_3xx: AtomicU64::new(0),
            responses_4xx: AtomicU64::new(0),
            responses_5xx: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            payment_orders_created: AtomicU64::new(0),
            payments_verified: AtomicU64::new(0),
            payments_failed: AtomicU64::new(0),
            emails_sent: AtomicU64::new(0),
            emails_failed: AtomicU64::new(0),
            chat_requests: AtomicU64::new(0),
            chat_fallbacks: AtomicU64::new(0),
        }
    }

    /// Increment a counter by one
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a finished request by status class
    pub fn record_status(&self, status: u16) {
        Self::incr(&self.requests_total);
        let bucket = match status {
            200..=299 => &self.responses_2xx,
            300..=399 => &self.responses_3xx,
            400..=499 => &self.responses_4xx,
            _ => &self.responses_5xx,
        };
        Self::incr(bucket);
        if status == 429 {
            Self::incr(&self.rate_limited);
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            requests_total: load(&self.requests_total),
            responses_2xx: load(&self.responses_2xx),
            responses_3xx: load(&self.responses_3xx),
            responses_4xx: load(&self.responses_4xx),
            responses_5xx: load(&self.responses_5xx),
            rate_limited: load(&self.rate_limited),
            payment_orders_created: load(&self.payment_orders_created),
            payments_verified: load(&self.payments_verified),
            payments_failed: load(&self.payments_failed),
            emails_sent: load(&self.emails_sent),
            emails_failed: load(&self.emails_failed),
            chat_requests: load(&self.chat_requests),
            chat_fallbacks: load(&self.chat_fallbacks),
        }
    }

    /// Prometheus text exposition
    pub fn render_prometheus(&self, cache: &TieredCacheStats) -> String {
        let s = self.snapshot();
        let mut out = String::with_capacity(2048);

        let mut metric = |name: &str, kind: &str, help: &str, samples: &[(&str, u64)]| {
            let _ = writeln!(out, "# HELP roadwise_{name} {help}");
            let _ = writeln!(out, "# TYPE roadwise_{name} {kind}");
            for (labels, value) in samples {
                if labels.is_empty() {
                    let _ = writeln!(out, "roadwise_{name} {value}");
                } else {
                    let _ = writeln!(out, "roadwise_{name}{{{labels}}} {value}");
                }
            }
        };

        metric("uptime_seconds", "gauge", "Seconds since process start", &[("", s.uptime_secs)]);
        metric("http_requests_total", "counter", "HTTP requests handled", &[("", s.requests_total)]);
        metric(
            "http_responses_total",
            "counter",
            "HTTP responses by status class",
            &[
                ("class=\"2xx\"", s.responses_2xx),
                ("class=\"3xx\"", s.responses_3xx),
                ("class=\"4xx\"", s.responses_4xx),
                ("class=\"5xx\"", s.responses_5xx),
            ],
        );
        metric("rate_limited_total", "counter", "Requests rejected by the rate limiter", &[("", s.rate_limited)]);
        metric(
            "payments_total",
            "counter",
            "Payment gateway events",
            &[
                ("event=\"order_created\"", s.payment_orders_created),
                ("event=\"verified\"", s.payments_verified),
                ("event=\"failed\"", s.payments_failed),
            ],
        );
        metric(
            "emails_total",
            "counter",
            "Transactional emails by result",
            &[("result=\"sent\"", s.emails_sent), ("result=\"failed\"", s.emails_failed)],
        );
        metric(
            "chat_requests_total",
            "counter",
            "Chatbot requests",
            &[("reply=\"model\"", s.chat_requests.saturating_sub(s.chat_fallbacks)), ("reply=\"fallback\"", s.chat_fallbacks)],
        );
        metric("cache_entries", "gauge", "Entries in the local cache", &[("", cache.local.entries as u64)]);
        metric(
            "cache_lookups_total",
            "counter",
            "Cache lookups by result",
            &[
                ("result=\"local_hit\"", cache.local.hits),
                ("result=\"local_miss\"", cache.local.misses),
                ("result=\"external_hit\"", cache.external_hits),
                ("result=\"stale\"", cache.stale_served),
            ],
        );
        metric("cache_external_errors_total", "counter", "External cache tier failures", &[("", cache.external_errors)]);
        metric("cache_evictions_total", "counter", "Local cache evictions", &[("", cache.local.evictions)]);

        out
    }
}
