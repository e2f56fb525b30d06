//! Logging infrastructure for roadwise
//!
//! - tracing subscriber setup (text or JSON, Sentry layer when enabled)
//! - [`observability`]: Sentry client initialisation
//! - [`audit`]: audit trail for back office mutations

pub mod audit;
pub mod observability;

pub use audit::{AuditEvent, AuditLogger};
pub use observability::init_sentry;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `log_level` when set.
pub fn init_tracing(log_level: &str, format: LogFormat, with_sentry: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("roadwise={},info", log_level).into());

    let (text, json) = match format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .with(with_sentry.then(|| sentry::integrations::tracing::layer()))
        .init();
}
