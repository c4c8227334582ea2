use anyhow::Context;
use clap::Parser;
use guestcap::api::create_api_server;
use guestcap::config::ServerConfig;
use guestcap::metrics::{install_recorder, start_metrics_server, MetricsConfig};
use guestcap::ratelimit::GovernorRateLimiter;
use guestcap::session::{UploadService, UploadStore};
use guestcap::storage::PresignedStorage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often idle rate-limit keys and abandoned sessions are swept
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Active sessions older than this are abandoned
const STALE_SESSION_AGE_SECS: i64 = 24 * 60 * 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::parse();

    match config.metrics_addr {
        Some(addr) => {
            start_metrics_server(MetricsConfig::with_addr(addr))?;
            info!("Metrics listener on http://{}/metrics", addr);
        }
        None => {
            install_recorder()?;
        }
    }

    let store = Arc::new(
        UploadStore::new(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?,
    );
    let storage = Arc::new(PresignedStorage::new(
        config.storage_url.clone(),
        config.storage_bucket.clone(),
        &config.signing_secret,
    ));

    let settings = config.service_settings();
    let upload_limiter = Arc::new(GovernorRateLimiter::new(settings.upload_policy.clone()));
    let api_limiter = Arc::new(GovernorRateLimiter::new(settings.api_policy.clone()));
    let service = Arc::new(
        UploadService::new(store.clone(), storage, settings)
            .with_upload_limiter(upload_limiter.clone())
            .with_api_limiter(api_limiter.clone()),
    );

    let maintenance = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                interval.tick().await;
                upload_limiter.retain_recent();
                api_limiter.retain_recent();
                match store.cleanup_stale_sessions(STALE_SESSION_AGE_SECS).await {
                    Ok(0) => {}
                    Ok(removed) => info!("Removed {} abandoned upload sessions", removed),
                    Err(e) => warn!("Session cleanup failed: {}", e),
                }
            }
        })
    };

    let app = create_api_server(service);
    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    info!("guestcap-server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await?;

    maintenance.abort();
    store.close().await;
    Ok(())
}
