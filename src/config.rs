//! Configuration for roadwise
//!
//! CLI arguments and environment variable handling using clap.
//! Every flag can also be supplied through the environment (or a `.env` file).

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Minimum accepted JWT secret length
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Roadwise - driving school management service
#[derive(Parser, Debug, Clone)]
#[command(name = "roadwise")]
#[command(about = "Driving school management service (courses, enrollments, payments, back office)")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (dev JWT secret, database optional, mail logged)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Public base URL of the site (used in payment redirects and emails)
    #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:3000")]
    pub public_url: String,

    /// School name shown in emails and chatbot replies
    #[arg(long, env = "SCHOOL_NAME", default_value = "Roadwise Driving School")]
    pub school_name: String,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "roadwise")]
    pub mongodb_db: String,

    /// JWT secret for session token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Session lifetime in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "604800")]
    pub jwt_expiry_seconds: u64,

    /// Name of the session cookie
    #[arg(long, env = "SESSION_COOKIE_NAME", default_value = "session")]
    pub session_cookie_name: String,

    /// Mark the session cookie Secure (HTTPS only)
    #[arg(long, env = "SESSION_COOKIE_SECURE", default_value = "false")]
    pub session_cookie_secure: bool,

    /// Rate limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value = "60")]
    pub rate_limit_window_secs: u64,

    /// Maximum rate-limited requests per client per window
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value = "20")]
    pub rate_limit_max_requests: u32,

    /// Cache configuration
    #[command(flatten)]
    pub cache: CacheArgs,

    /// Payment gateway configuration
    #[command(flatten)]
    pub payments: PaymentArgs,

    /// SMTP configuration
    #[command(flatten)]
    pub smtp: SmtpArgs,

    /// Chatbot configuration
    #[command(flatten)]
    pub chat: ChatArgs,

    /// Sentry DSN for error reporting (disabled when unset)
    #[arg(long, env = "SENTRY_DSN")]
    pub sentry_dsn: Option<String>,

    /// Environment name reported to Sentry
    #[arg(long, env = "SENTRY_ENVIRONMENT", default_value = "production")]
    pub sentry_environment: String,

    /// Sentry traces sample rate (0.0 - 1.0)
    #[arg(long, env = "SENTRY_TRACES_SAMPLE_RATE", default_value = "0.0")]
    pub sentry_traces_sample_rate: f32,
}

/// Log formatter selection
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Two-tier cache configuration
#[derive(Parser, Debug, Clone)]
pub struct CacheArgs {
    /// Maximum entries in the process-local cache
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value = "5000")]
    pub cache_max_entries: usize,

    /// TTL for public listings in seconds
    #[arg(long, env = "CACHE_LIST_TTL_SECS", default_value = "300")]
    pub cache_list_ttl_secs: u64,

    /// TTL for stale fallback snapshots in seconds
    #[arg(long, env = "CACHE_STALE_TTL_SECS", default_value = "86400")]
    pub cache_stale_ttl_secs: u64,

    /// Redis REST endpoint for the external cache tier (optional)
    #[arg(long, env = "CACHE_REST_URL")]
    pub cache_rest_url: Option<String>,

    /// Bearer token for the Redis REST endpoint
    #[arg(long, env = "CACHE_REST_TOKEN")]
    pub cache_rest_token: Option<String>,
}

/// Payment gateway credentials
#[derive(Parser, Debug, Clone)]
pub struct PaymentArgs {
    /// Razorpay key id
    #[arg(long, env = "RAZORPAY_KEY_ID")]
    pub razorpay_key_id: Option<String>,

    /// Razorpay key secret
    #[arg(long, env = "RAZORPAY_KEY_SECRET")]
    pub razorpay_key_secret: Option<String>,

    /// Razorpay webhook secret
    #[arg(long, env = "RAZORPAY_WEBHOOK_SECRET")]
    pub razorpay_webhook_secret: Option<String>,

    /// Razorpay API base URL
    #[arg(long, env = "RAZORPAY_BASE_URL", default_value = "https://api.razorpay.com")]
    pub razorpay_base_url: String,

    /// PhonePe merchant id
    #[arg(long, env = "PHONEPE_MERCHANT_ID")]
    pub phonepe_merchant_id: Option<String>,

    /// PhonePe salt key
    #[arg(long, env = "PHONEPE_SALT_KEY")]
    pub phonepe_salt_key: Option<String>,

    /// PhonePe salt index
    #[arg(long, env = "PHONEPE_SALT_INDEX", default_value = "1")]
    pub phonepe_salt_index: u32,

    /// PhonePe API base URL
    #[arg(
        long,
        env = "PHONEPE_BASE_URL",
        default_value = "https://api-preprod.phonepe.com/apis/pg-sandbox"
    )]
    pub phonepe_base_url: String,

    /// Currency for orders
    #[arg(long, env = "PAYMENT_CURRENCY", default_value = "INR")]
    pub currency: String,
}

/// SMTP relay configuration
#[derive(Parser, Debug, Clone)]
pub struct SmtpArgs {
    /// SMTP relay host (mail is logged instead of sent when unset)
    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    /// SMTP port
    #[arg(long, env = "SMTP_PORT", default_value = "587")]
    pub smtp_port: u16,

    /// SMTP username
    #[arg(long, env = "SMTP_USER")]
    pub smtp_user: Option<String>,

    /// SMTP password
    #[arg(long, env = "SMTP_PASSWORD")]
    pub smtp_password: Option<String>,

    /// Sender address
    #[arg(long, env = "MAIL_FROM", default_value = "Roadwise <no-reply@roadwise.local>")]
    pub mail_from: String,

    /// Address that receives inquiry notifications
    #[arg(long, env = "ADMIN_EMAIL")]
    pub admin_email: Option<String>,
}

/// Chatbot endpoint configuration
#[derive(Parser, Debug, Clone)]
pub struct ChatArgs {
    /// OpenAI-compatible API base URL (e.g. https://api.openai.com/v1)
    #[arg(long, env = "CHAT_API_URL")]
    pub chat_api_url: Option<String>,

    /// API key for the chat endpoint
    #[arg(long, env = "CHAT_API_KEY")]
    pub chat_api_key: Option<String>,

    /// Model name
    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-4o-mini")]
    pub chat_model: String,

    /// Request timeout in seconds
    #[arg(long, env = "CHAT_TIMEOUT_SECS", default_value = "20")]
    pub chat_timeout_secs: u64,
}

impl Args {
    /// Rate limit window as a Duration
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if let Some(ref secret) = self.jwt_secret {
            if secret.len() < MIN_JWT_SECRET_LEN {
                return Err(format!(
                    "JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters"
                ));
            }
        }

        if self.rate_limit_window_secs == 0 {
            return Err("RATE_LIMIT_WINDOW_SECS must be greater than zero".to_string());
        }

        if self.payments.razorpay_key_id.is_some() != self.payments.razorpay_key_secret.is_some() {
            return Err("RAZORPAY_KEY_ID and RAZORPAY_KEY_SECRET must be set together".to_string());
        }

        if self.payments.phonepe_merchant_id.is_some() != self.payments.phonepe_salt_key.is_some() {
            return Err("PHONEPE_MERCHANT_ID and PHONEPE_SALT_KEY must be set together".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_args() -> Args {
    Args::parse_from(["roadwise", "--dev-mode"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_defaults_validate() {
        let args = test_args();
        assert!(args.dev_mode);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_production_requires_secret() {
        let mut args = test_args();
        args.dev_mode = false;
        args.jwt_secret = None;
        assert!(args.validate().is_err());

        args.jwt_secret = Some("short".into());
        assert!(args.validate().is_err());

        args.jwt_secret = Some("a-production-secret-of-at-least-32-chars".into());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_gateway_credentials_must_pair() {
        let mut args = test_args();
        args.payments.razorpay_key_id = Some("rzp_test_123".into());
        assert!(args.validate().is_err());
        args.payments.razorpay_key_secret = Some("secret".into());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_zero_rate_window_rejected() {
        let mut args = test_args();
        args.rate_limit_window_secs = 0;
        assert!(args.validate().is_err());
    }
}
