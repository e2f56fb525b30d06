//! Health check endpoints
//!
//! Kubernetes-style probes:
//! - /health, /healthz - liveness (the process is serving)
//! - /ready, /readyz - readiness (database reachable, or dev mode)
//!
//! plus /version for deployment verification, /metrics in Prometheus text
//! format and /api/status with the same counters as JSON.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::cache::TieredCacheStats;
use crate::metrics::MetricsSnapshot;
use crate::payments::PaymentProvider;
use crate::routes::common::json_response;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub uptime: u64,
    pub mode: &'static str,
    pub node_id: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: DatabaseHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    pub configured: bool,
    pub connected: bool,
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    commit: &'static str,
    commit_full: &'static str,
    build_time: &'static str,
    service: &'static str,
}

/// Operational snapshot for `/api/status`
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub node_id: String,
    pub mode: &'static str,
    pub database_connected: bool,
    pub payment_providers: Vec<PaymentProvider>,
    pub mailer: &'static str,
    pub chat_configured: bool,
    pub rate_limited_clients: usize,
    pub metrics: MetricsSnapshot,
    pub cache: TieredCacheStats,
}

fn mode(state: &AppState) -> &'static str {
    if state.args.dev_mode {
        "development"
    } else {
        "production"
    }
}

/// Liveness probe
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        mode: mode(state),
        node_id: state.args.node_id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    json_response(StatusCode::OK, &response)
}

/// Readiness probe. Without a database the service is ready only in dev mode.
pub async fn readiness_check(state: &AppState) -> Response<Full<Bytes>> {
    let connected = match &state.mongo {
        Some(mongo) => mongo.ping().await,
        None => false,
    };
    let ready = connected || state.args.dev_mode;

    let response = ReadinessResponse {
        ready,
        database: DatabaseHealth {
            configured: state.mongo.is_some(),
            connected,
        },
        error: (!connected).then(|| "Database not connected".to_string()),
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &response)
}

pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "roadwise",
    };
    json_response(StatusCode::OK, &response)
}

/// Prometheus text exposition
pub fn metrics(state: &AppState) -> Response<Full<Bytes>> {
    let body = state.metrics.render_prometheus(&state.cache.stats());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

pub async fn status(state: &AppState) -> Response<Full<Bytes>> {
    let database_connected = match &state.mongo {
        Some(mongo) => mongo.ping().await,
        None => false,
    };

    let response = StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        node_id: state.args.node_id.to_string(),
        mode: mode(state),
        database_connected,
        payment_providers: state.payments.configured(),
        mailer: state.mailer.name(),
        chat_configured: state.chat.is_configured(),
        rate_limited_clients: state.rate_limiter.tracked_clients(),
        metrics: state.metrics.snapshot(),
        cache: state.cache.stats(),
    };
    json_response(StatusCode::OK, &response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::state;
    use http_body_util::BodyExt;

    async fn body_json(resp: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_always_ok() {
        let resp = health_check(&state());
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["mode"], "development");
    }

    #[tokio::test]
    async fn test_ready_in_dev_mode_without_database() {
        let resp = readiness_check(&state()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["database"]["connected"], false);
    }

    #[tokio::test]
    async fn test_not_ready_in_production_without_database() {
        let mut args = crate::config::test_args();
        args.dev_mode = false;
        args.jwt_secret = Some("a-production-secret-of-at-least-32-chars".into());
        let state = AppState::new(args, None).unwrap();
        let resp = readiness_check(&state).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_version_names_service() {
        let body = body_json(version_info()).await;
        assert_eq!(body["service"], "roadwise");
    }

    #[tokio::test]
    async fn test_metrics_is_prometheus_text() {
        let resp = metrics(&state());
        assert!(resp.headers()["Content-Type"].to_str().unwrap().starts_with("text/plain"));
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("roadwise_http_requests_total"));
    }

    #[tokio::test]
    async fn test_status_reports_integrations() {
        let body = body_json(status(&state()).await).await;
        assert_eq!(body["database_connected"], false);
        assert_eq!(body["mailer"], "log");
        assert_eq!(body["chat_configured"], false);
        assert!(body["payment_providers"].as_array().unwrap().is_empty());
    }
}
