mod cache;
mod handlers;
mod metrics;
mod server;

use std::{env, sync::Arc};

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uplan_core::{config::Settings, fetch::HttpFetcher, service::FeedService, store::FeedStore};

use crate::{cache::RedisCache, handlers::AppState, metrics::Metrics};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uplan_server=info,uplan_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let redis_url = env::var("REDIS_URL")
        .map_err(|_| anyhow::anyhow!("REDIS_URL environment variable is required"))?;
    let backend = RedisCache::new(&redis_url, None)
        .await
        .context("Failed to initialize the shared cache")?;

    let store = FeedStore::connect(&settings.database_url, settings.database_max_connections)
        .await
        .context("Failed to open the database")?;
    let fetcher = HttpFetcher::new(&settings.user_agent, settings.upstream_timeout)?;
    let trust_forwarded_for = settings.trust_forwarded_for;

    let service = FeedService::new(settings, Arc::new(backend), Arc::new(fetcher), store)?;

    // Without a current semester no bare create request can be served.
    let semester = service.current_semester().await.map_err(|e| {
        tracing::error!("Failed to fetch current semester, exiting: {}", e);
        e
    })?;
    tracing::info!("Current semester: {}", semester);

    let metrics = Metrics::new().context("Failed to register metrics")?;

    server::start_server(AppState {
        service: Arc::new(service),
        metrics,
        trust_forwarded_for,
    })
    .await
}
