use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use block_api::blocks::{
    InMemoryCache, ListenerIndex, MatcherCache, PgBlockCatalog, PredicateRegistry, RedisCache,
    RegionComposer, ResultCache, StaticListenerSource, VisibilityEvaluator,
};
use block_api::config::Config;
use block_api::db::create_pool;
use block_api::routes::build_router;
use block_api::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_CRATE_NAME"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting block API v{}", env!("CARGO_PKG_VERSION"));

    // Block catalog (PostgreSQL)
    let pool = create_pool(&config.database_url).await?;
    let catalog = Arc::new(PgBlockCatalog::new(pool));

    // Result cache: Redis when configured, otherwise in-process
    let cache: Arc<dyn ResultCache> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Invalid REDIS_URL")?;
            info!("Block cache backed by Redis (ttl {}s)", config.block_cache_ttl_secs);
            Arc::new(RedisCache::new(
                client,
                env!("CARGO_PKG_NAME"),
                config.block_cache_ttl_secs,
            ))
        }
        None => {
            info!(
                "Block cache kept in memory (up to {} entries per group)",
                config.block_cache_max_entries
            );
            Arc::new(InMemoryCache::with_max_entries(config.block_cache_max_entries))
        }
    };

    let listeners = Arc::new(StaticListenerSource::from_listeners(&config.active_listeners));
    info!(
        "{} block listeners active at startup",
        config.active_listeners.len()
    );

    let evaluator = VisibilityEvaluator::new(
        MatcherCache::new(config.pattern_settings()),
        Arc::new(PredicateRegistry::with_builtins()),
        cache.clone(),
    );
    let composer = RegionComposer::new(
        catalog,
        evaluator,
        ListenerIndex::new(listeners.clone(), cache.clone()),
        cache,
        config.themes(),
    );
    info!(
        "Themes: front '{}' ({} regions), back '{}' ({} regions)",
        config.front_theme.id,
        config.front_theme.regions.len(),
        config.back_theme.id,
        config.back_theme.regions.len()
    );

    // Build app state
    let state = AppState {
        composer: Arc::new(composer),
        listeners,
        default_locale: config.default_locale.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
