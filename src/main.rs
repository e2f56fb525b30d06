//! Roadwise - driving school management service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use roadwise::{
    cache::spawn_cleanup_task,
    config::Args,
    db::MongoClient,
    logging::{init_sentry, init_tracing},
    ratelimit::spawn_sweep_task,
    server, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Sentry first so the tracing layer has a client to report to
    let sentry_guard = init_sentry(&args);
    init_tracing(&args.log_level, args.log_format, sentry_guard.is_some());

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Roadwise - {}", args.school_name);
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Public URL: {}", args.public_url);
    info!("MongoDB database: {}", args.mongodb_db);
    info!(
        "SMTP: {}",
        args.smtp.smtp_host.as_deref().unwrap_or("not configured (mail is logged)")
    );
    info!(
        "External cache: {}",
        if args.cache.cache_rest_url.is_some() { "enabled" } else { "local only" }
    );
    info!("======================================");

    // MongoDB is optional in dev mode
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => Some(client),
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, continuing without): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let state = Arc::new(AppState::new(args, mongo)?);

    let providers = state.payments.configured();
    if providers.is_empty() {
        warn!("No payment gateway configured; order creation will fail");
    } else {
        info!(?providers, "Payment gateways ready");
    }

    spawn_cleanup_task(Arc::clone(&state.cache));
    spawn_sweep_task(Arc::clone(&state.rate_limiter));

    server::run(state).await?;

    info!("Roadwise stopped");
    Ok(())
}
