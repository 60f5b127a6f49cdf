use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use porkbun_webhook::{
    config::{Config, LogFormat},
    porkbun::PorkbunApi,
    provider::Provider,
    registrar::RegistrarClient,
    router, AppState,
};

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => {
            eprintln!(
                "[tracing] using RUST_LOG={}",
                std::env::var("RUST_LOG").unwrap_or_default()
            );
            f
        }
        Err(e) => {
            let default = cfg.default_log_filter();
            eprintln!("[tracing] RUST_LOG not set or invalid ({e}), defaulting to: {default}");
            EnvFilter::new(default)
        }
    };

    // Exactly one of the two layers is set.
    let (text, json) = match cfg.log_format {
        LogFormat::Logfmt => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(false)
                    .with_ansi(true),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();

    info!("Porkbun API  : {}", cfg.api_url);
    info!("Domain filter: {}", cfg.domain_filter_list().join(", "));
    info!("Default TTL  : {}s", cfg.default_ttl);
    info!("Retries      : {} attempt(s), {}ms base backoff", cfg.max_attempts, cfg.retry_base_delay_ms);
    if cfg.dry_run {
        warn!("Dry-run mode : mutations are logged, not sent");
    }

    let api = PorkbunApi::new(&cfg)?;
    let ip = api
        .ping()
        .await
        .context("Porkbun rejected the credentials (POST /ping)")?;
    info!("Porkbun credentials OK (seen from {ip})");

    let client = RegistrarClient::new(Arc::new(api), &cfg);
    let provider = Provider::new(&cfg, client);
    let app = router(AppState::new(provider));

    let addr = cfg.listen_addr()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
