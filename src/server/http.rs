//! HTTP server implementation
//!
//! hyper http1 with TokioIo. Bodies are collected up front (capped at
//! 1 MiB) and handlers receive `Request<Bytes>`.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::ratelimit::client_key;
use crate::routes::{
    self, admin, auth_routes, certificates, chat, courses, enrollments, health, inquiries,
    instructors, payments, results, students, testimonials,
    common::{is_item, item, json_response, HandlerResult},
};
use crate::server::AppState;
use crate::types::{AppError, Result};

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Accept connections until ctrl-c
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Roadwise listening on {} as node {}",
        state.args.listen, state.args.node_id
    );
    if state.args.dev_mode {
        warn!("Development mode enabled - dev session secret, mail logged only");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { Ok::<_, Infallible>(handle_request(state, addr, req).await) }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            debug!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

/// Collect the body, dispatch and account for one request
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let request_id = Uuid::new_v4();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = tracing::info_span!("request", id = %request_id, %method, %path);

    async move {
        let started = Instant::now();
        Metrics::incr(&state.metrics.requests_total);

        let (parts, body) = req.into_parts();
        let response = match Limited::new(body, MAX_BODY_BYTES).collect().await {
            Ok(collected) => {
                let req = Request::from_parts(parts, collected.to_bytes());
                match dispatch(&state, addr, req).await {
                    Ok(response) => response,
                    Err(e) => e.into_response(),
                }
            }
            Err(e) => {
                debug!("Body rejected: {}", e);
                payload_too_large()
            }
        };

        let status = response.status();
        state.metrics.record_status(status.as_u16());
        info!(
            client = %addr,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{} {}",
            method,
            path
        );

        with_request_id(response, request_id)
    }
    .instrument(span)
    .await
}

async fn dispatch(state: &Arc<AppState>, addr: SocketAddr, req: Request<Bytes>) -> HandlerResult {
    if is_rate_limited(req.method(), req.uri().path()) {
        let key = client_key(&req, Some(addr));
        if let Err(e) = state.rate_limiter.check(&key) {
            Metrics::incr(&state.metrics.rate_limited);
            warn!(client = %key, path = %req.uri().path(), "Rate limit exceeded");
            return Err(e);
        }
    }
    route(state, req).await
}

/// Public mutating endpoints that count against the per-client quota
fn is_rate_limited(method: &Method, path: &str) -> bool {
    *method == Method::POST
        && matches!(
            path,
            "/api/auth/login"
                | "/api/auth/register"
                | "/api/inquiries"
                | "/api/chat"
                | "/api/testimonials"
                | "/api/payments/order"
        )
}

/// Route a request with its collected body
pub(crate) async fn route(state: &AppState, req: Request<Bytes>) -> HandlerResult {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        // CORS preflight
        (Method::OPTIONS, _) => Ok(preflight_response()),

        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => Ok(health::health_check(state)),

        // Readiness probe - database connected (or dev mode)
        (Method::GET, "/ready") | (Method::GET, "/readyz") => Ok(health::readiness_check(state).await),

        (Method::GET, "/version") => Ok(health::version_info()),
        (Method::GET, "/metrics") => Ok(health::metrics(state)),
        (Method::GET, "/api/status") => Ok(health::status(state).await),

        // ====================================================================
        // Auth
        // ====================================================================
        (Method::POST, "/api/auth/register") => auth_routes::register(&req, state).await,
        (Method::POST, "/api/auth/login") => auth_routes::login(&req, state).await,
        (Method::POST, "/api/auth/logout") => auth_routes::logout(state),
        (Method::GET, "/api/auth/me") => auth_routes::me(&req, state).await,
        (Method::GET, "/api/auth/session") => auth_routes::session(&req, state).await,

        // ====================================================================
        // Public catalogue
        // ====================================================================
        (Method::GET, "/api/courses") => courses::list(&req, state).await,
        (Method::GET, p) if is_item(p, "/api/courses/") => {
            courses::get(&req, state, item(p, "/api/courses/").unwrap_or_default()).await
        }
        (Method::GET, "/api/instructors") => instructors::list(&req, state).await,
        (Method::GET, p) if is_item(p, "/api/instructors/") => {
            instructors::get(&req, state, item(p, "/api/instructors/").unwrap_or_default()).await
        }
        (Method::GET, "/api/testimonials") => testimonials::list(&req, state).await,
        (Method::POST, "/api/testimonials") => testimonials::submit(&req, state).await,
        (Method::GET, "/api/results") => results::list(&req, state).await,
        (Method::POST, "/api/inquiries") => inquiries::create(&req, state).await,
        (Method::GET, p) if is_item(p, "/api/certificates/verify/") => {
            certificates::verify(state, item(p, "/api/certificates/verify/").unwrap_or_default()).await
        }
        (Method::POST, "/api/chat") => chat::chat(&req, state).await,

        // ====================================================================
        // Student area
        // ====================================================================
        (Method::GET, "/api/student/dashboard") => students::dashboard(&req, state).await,
        (Method::GET, "/api/student/profile") => students::profile(&req, state).await,
        (Method::PUT, "/api/student/profile") => students::update_profile(&req, state).await,
        (Method::POST, "/api/enrollments") => enrollments::create(&req, state).await,

        // ====================================================================
        // Payments
        // ====================================================================
        (Method::POST, "/api/payments/order") => payments::create_order(&req, state).await,
        (Method::POST, "/api/payments/razorpay/verify") => payments::razorpay_verify(&req, state).await,
        (Method::POST, "/api/payments/razorpay/webhook") => payments::razorpay_webhook(&req, state).await,
        (Method::POST, "/api/payments/phonepe/callback") => payments::phonepe_callback(&req, state).await,
        (Method::GET, p) if is_item(p, "/api/payments/phonepe/status/") => {
            payments::phonepe_status(&req, state, item(p, "/api/payments/phonepe/status/").unwrap_or_default())
                .await
        }

        // ====================================================================
        // Admin back office
        // ====================================================================
        (_, p) if p.starts_with("/api/admin/") => admin_route(state, req, &path).await,

        _ => Err(AppError::NotFound(format!("No route for {}", path))),
    }
}

/// Admin routes, all of which require the ADMIN role
async fn admin_route(state: &AppState, req: Request<Bytes>, path: &str) -> HandlerResult {
    const COURSES: &str = "/api/admin/courses/";
    const INSTRUCTORS: &str = "/api/admin/instructors/";
    const STUDENTS: &str = "/api/admin/students/";
    const ENROLLMENTS: &str = "/api/admin/enrollments/";
    const CERTIFICATES: &str = "/api/admin/certificates/";
    const INQUIRIES: &str = "/api/admin/inquiries/";
    const TESTIMONIALS: &str = "/api/admin/testimonials/";
    const RESULTS: &str = "/api/admin/results/";

    let method = req.method().clone();
    let id = |prefix: &str| item(path, prefix).unwrap_or_default().to_string();

    match (method, path) {
        (Method::GET, "/api/admin/stats") => admin::stats(&req, state).await,
        (Method::GET, "/api/admin/audit-logs") => admin::audit_logs(&req, state).await,
        (Method::DELETE, "/api/admin/cache") => admin::clear_cache(&req, state).await,
        (Method::PUT, p) if routes::role_path_id(p).is_some() => {
            let user_id = routes::role_path_id(p).unwrap_or_default();
            admin::update_role(&req, state, user_id).await
        }

        (Method::GET, "/api/admin/courses") => courses::admin_list(&req, state).await,
        (Method::POST, "/api/admin/courses") => courses::create(&req, state).await,
        (Method::PUT, p) if is_item(p, COURSES) => courses::update(&req, state, &id(COURSES)).await,
        (Method::DELETE, p) if is_item(p, COURSES) => courses::delete(&req, state, &id(COURSES)).await,

        (Method::GET, "/api/admin/instructors") => instructors::admin_list(&req, state).await,
        (Method::POST, "/api/admin/instructors") => instructors::create(&req, state).await,
        (Method::PUT, p) if is_item(p, INSTRUCTORS) => {
            instructors::update(&req, state, &id(INSTRUCTORS)).await
        }
        (Method::DELETE, p) if is_item(p, INSTRUCTORS) => {
            instructors::delete(&req, state, &id(INSTRUCTORS)).await
        }

        (Method::GET, "/api/admin/students") => students::admin_list(&req, state).await,
        (Method::GET, p) if is_item(p, STUDENTS) => students::admin_get(&req, state, &id(STUDENTS)).await,
        (Method::PUT, p) if is_item(p, STUDENTS) => students::admin_update(&req, state, &id(STUDENTS)).await,
        (Method::DELETE, p) if is_item(p, STUDENTS) => {
            students::admin_delete(&req, state, &id(STUDENTS)).await
        }

        (Method::GET, "/api/admin/enrollments") => enrollments::admin_list(&req, state).await,
        (Method::PUT, p) if is_item(p, ENROLLMENTS) => {
            enrollments::admin_update(&req, state, &id(ENROLLMENTS)).await
        }

        (Method::GET, "/api/admin/certificates") => certificates::admin_list(&req, state).await,
        (Method::POST, "/api/admin/certificates") => certificates::issue(&req, state).await,
        (Method::DELETE, p) if is_item(p, CERTIFICATES) => {
            certificates::revoke(&req, state, &id(CERTIFICATES)).await
        }

        (Method::GET, "/api/admin/inquiries") => inquiries::admin_list(&req, state).await,
        (Method::PUT, p) if is_item(p, INQUIRIES) => inquiries::admin_update(&req, state, &id(INQUIRIES)).await,
        (Method::DELETE, p) if is_item(p, INQUIRIES) => {
            inquiries::admin_delete(&req, state, &id(INQUIRIES)).await
        }

        (Method::GET, "/api/admin/testimonials") => testimonials::admin_list(&req, state).await,
        (Method::PUT, p) if is_item(p, TESTIMONIALS) => {
            testimonials::admin_update(&req, state, &id(TESTIMONIALS)).await
        }
        (Method::DELETE, p) if is_item(p, TESTIMONIALS) => {
            testimonials::admin_delete(&req, state, &id(TESTIMONIALS)).await
        }

        (Method::GET, "/api/admin/results") => results::admin_list(&req, state).await,
        (Method::POST, "/api/admin/results") => results::create(&req, state).await,
        (Method::PUT, p) if is_item(p, RESULTS) => results::update(&req, state, &id(RESULTS)).await,
        (Method::DELETE, p) if is_item(p, RESULTS) => results::delete(&req, state, &id(RESULTS)).await,

        _ => Err(AppError::NotFound(format!("No route for {}", path))),
    }
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization, X-VERIFY, X-Razorpay-Signature")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .header("Access-Control-Max-Age", "86400")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn payload_too_large() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        &serde_json::json!({
            "error": format!("Request body exceeds {} bytes", MAX_BODY_BYTES),
            "code": "PAYLOAD_TOO_LARGE",
        }),
    )
}

fn with_request_id(mut response: Response<Full<Bytes>>, id: Uuid) -> Response<Full<Bytes>> {
    if let Ok(value) = id.to_string().parse() {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}
