use std::sync::Arc;

use anyhow::Result;

use adaptest::cache::CacheManager;
use adaptest::config::Config;
use adaptest::engine::AdaptiveEngine;
use adaptest::logging;
use adaptest::questions::QuestionService;
use adaptest::scheduler::CleanupScheduler;
use adaptest::server::{self, AppContext};
use adaptest::session::SessionCoordinator;
use adaptest::source::{ExternalQuestionApi, QuestionSource};
use adaptest::store::postgres::PostgresWarmStore;
use adaptest::store::redis::RedisHotStore;
use adaptest::store::{HotStore, WarmStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    logging::init_logging(&config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "adaptest starting");

    // Process-wide services, constructed once and injected everywhere
    let warm: Arc<dyn WarmStore> =
        Arc::new(PostgresWarmStore::new(&config.database_url, config.run_migrations).await?);
    let hot: Arc<dyn HotStore> = Arc::new(RedisHotStore::new(&config.redis_url).await?);
    let source: Arc<dyn QuestionSource> = Arc::new(ExternalQuestionApi::new(&config.external_api)?);

    let cache = Arc::new(CacheManager::new(
        Arc::clone(&hot),
        Arc::clone(&warm),
        Arc::clone(&source),
        config.cache.clone(),
    ));
    let questions = Arc::new(QuestionService::new(
        Arc::clone(&cache),
        Arc::clone(&warm),
        Arc::clone(&hot),
        config.cache.question_ttl_seconds,
    ));
    let coordinator = Arc::new(SessionCoordinator::new(
        Arc::clone(&hot),
        Arc::clone(&warm),
        Arc::clone(&questions),
        AdaptiveEngine::new(config.adaptive.learning_rate),
        config.adaptive.clone(),
        config.session.clone(),
    ));

    let scheduler = Arc::new(CleanupScheduler::new(
        Arc::clone(&hot),
        config.session.cleanup_interval_minutes,
        config.session.inactivity_threshold_minutes,
    ));
    scheduler.start().await;

    let bind_addr = config.bind_addr.clone();
    let ctx = Arc::new(AppContext {
        config,
        hot,
        warm,
        source,
        cache,
        questions,
        coordinator,
        scheduler: Arc::clone(&scheduler),
    });

    let app = server::router(ctx);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Adaptive testing service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tear down background work before exiting
    scheduler.stop().await;
    tracing::info!("adaptest stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
