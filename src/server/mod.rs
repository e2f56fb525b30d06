//! HTTP server and shared application state

pub mod http;

pub use http::run;

use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::auth::{JwtValidator, SessionVerifier};
use crate::cache::{CacheConfig, ExternalStore, RestKvStore, TieredCache};
use crate::chat::ChatService;
use crate::config::Args;
use crate::db::MongoClient;
use crate::logging::AuditLogger;
use crate::mail::{self, Mailer};
use crate::metrics::Metrics;
use crate::payments::PaymentService;
use crate::ratelimit::RateLimiter;
use crate::types::{AppError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Absent only in dev mode when the database is unreachable
    pub mongo: Option<MongoClient>,
    pub sessions: SessionVerifier,
    pub cache: Arc<TieredCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub payments: PaymentService,
    pub mailer: Arc<dyn Mailer>,
    pub chat: ChatService,
    pub metrics: Arc<Metrics>,
    pub audit: AuditLogger,
    pub started_at: Instant,
}

impl AppState {
    /// Build every service from configuration
    pub fn new(args: Args, mongo: Option<MongoClient>) -> Result<Self> {
        let jwt = match args.jwt_secret.clone() {
            Some(secret) => JwtValidator::new(secret, args.jwt_expiry_seconds)?,
            None if args.dev_mode => JwtValidator::new_dev(),
            None => return Err(AppError::Config("JWT_SECRET is required".into())),
        };
        let sessions = SessionVerifier::new(
            jwt,
            args.session_cookie_name.clone(),
            args.session_cookie_secure,
            mongo.clone(),
        );

        let external: Option<Arc<dyn ExternalStore>> =
            match (&args.cache.cache_rest_url, &args.cache.cache_rest_token) {
                (Some(url), Some(token)) => {
                    info!("External cache tier enabled");
                    Some(Arc::new(RestKvStore::new(url, token)?))
                }
                _ => None,
            };
        let cache = Arc::new(TieredCache::new(CacheConfig::from_args(&args.cache), external));

        let rate_limiter = Arc::new(RateLimiter::new(
            args.rate_limit_window(),
            args.rate_limit_max_requests,
        ));
        let payments = PaymentService::from_args(&args.payments, &args.public_url)?;
        let mailer = mail::from_args(&args.smtp)?;
        let chat = ChatService::new(&args.chat, &args.school_name)?;
        let audit = AuditLogger::new(mongo.clone());

        Ok(Self {
            args,
            mongo,
            sessions,
            cache,
            rate_limiter,
            payments,
            mailer,
            chat,
            metrics: Arc::new(Metrics::new()),
            audit,
            started_at: Instant::now(),
        })
    }
}
