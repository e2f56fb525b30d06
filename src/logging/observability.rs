//! Error reporting
//!
//! Sentry receives panics, `error!` events from the tracing layer, and the
//! 5xx responses reported by `AppError::into_response`.

use tracing::info;

use crate::config::Args;

/// Initialise Sentry when a DSN is configured.
///
/// The returned guard flushes pending events on drop, so keep it alive
/// for the lifetime of `main`.
pub fn init_sentry(args: &Args) -> Option<sentry::ClientInitGuard> {
    let dsn = args.sentry_dsn.as_deref().filter(|d| !d.is_empty())?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(args.sentry_environment.clone().into()),
            traces_sample_rate: args.sentry_traces_sample_rate.clamp(0.0, 1.0),
            server_name: Some(args.node_id.to_string().into()),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    if guard.is_enabled() {
        info!(environment = %args.sentry_environment, "Sentry error reporting enabled");
    }
    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_dsn_no_client() {
        let args = crate::config::test_args();
        assert!(init_sentry(&args).is_none());

        let mut args = args;
        args.sentry_dsn = Some(String::new());
        assert!(init_sentry(&args).is_none());
    }
}
