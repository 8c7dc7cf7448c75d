//! Herald intake server binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::redis_pool::create_redis_pool;
use herald_engine::registry::{DeviceRegistry, RedisDeviceRegistry};
use herald_notifier::PushHub;

use herald_api::routes::create_router;
use herald_api::state::AppState;

const DEFAULT_LOG_FILTER: &str =
    "herald_api=info,herald_notifier=info,herald_engine=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();

    tracing::info!("Starting Herald push dispatcher...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Device registry
    let redis = create_redis_pool(&config.redis_url).await?;
    let registry: Arc<dyn DeviceRegistry> = Arc::new(RedisDeviceRegistry::new(redis));

    // Push handlers. A bad push configuration disables push, not the server.
    let hub = match PushHub::from_config(&config.push, registry.clone()) {
        Ok(hub) => hub,
        Err(e) => {
            tracing::error!(error = %e, "Push configuration rejected, push disabled");
            PushHub::new()
        }
    };
    let hub = Arc::new(hub);

    let app = create_router(AppState::new(hub.clone(), registry)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "Intake server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    hub.stop();
    let drained = hub
        .drain(Duration::from_millis(config.drain_timeout_ms))
        .await;
    if !drained {
        tracing::warn!("Shutdown with pushes still in flight");
    }

    tracing::info!("Herald stopped.");
    Ok(())
}
