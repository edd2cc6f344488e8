/// Cache manager waterfall behavior against in-memory tier fakes:
/// tier ordering, write-through, stats identities, invalidation, refresh,
/// expiry fall-through, and warmup reporting.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, Utc};

use adaptest::cache::CacheManager;
use adaptest::config::CacheTtlConfig;
use adaptest::source::QuestionSource;
use adaptest::store::{HotStore, PoolLevel, WarmStore};

use common::{make_pool, make_question, MemoryHotStore, MemoryWarmStore, StubQuestionSource};

struct Tiers {
    hot: Arc<MemoryHotStore>,
    warm: Arc<MemoryWarmStore>,
    source: Arc<StubQuestionSource>,
    cache: CacheManager,
}

fn build(source: StubQuestionSource) -> Tiers {
    let hot = Arc::new(MemoryHotStore::new());
    let warm = Arc::new(MemoryWarmStore::new());
    let source = Arc::new(source);

    let cache = CacheManager::new(
        Arc::clone(&hot) as Arc<dyn HotStore>,
        Arc::clone(&warm) as Arc<dyn WarmStore>,
        Arc::clone(&source) as Arc<dyn QuestionSource>,
        CacheTtlConfig::default(),
    );

    Tiers {
        hot,
        warm,
        source,
        cache,
    }
}

fn sample_source() -> StubQuestionSource {
    StubQuestionSource::with_pool(make_pool(
        PoolLevel::Topic,
        "X",
        vec![
            make_question("q1", vec![1, 0, 0, 0, 0], 0.2, 1.0),
            make_question("q2", vec![0, 1, 0, 0, 0], 0.4, 1.5),
        ],
    ))
}

#[tokio::test]
async fn cold_read_drives_tier3_then_hot_hits() {
    let tiers = build(sample_source());

    // Both caches empty: the read goes all the way to the external API.
    let pool = tiers
        .cache
        .get_question_pool(PoolLevel::Topic, "X", true)
        .await
        .expect("pool available upstream");
    assert_eq!(pool.total_questions, 2);
    assert_eq!(tiers.source.fetches(), 1);

    let stats = tiers.cache.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.redis_misses, 1);
    assert_eq!(stats.supabase_misses, 1);
    assert_eq!(stats.external_api_calls, 1);

    // Second read is a Tier 1 hit, no new remote call.
    tiers
        .cache
        .get_question_pool(PoolLevel::Topic, "X", true)
        .await
        .expect("cached");
    assert_eq!(tiers.source.fetches(), 1);

    let stats = tiers.cache.stats();
    assert_eq!(stats.redis_hits, 1);
    assert_eq!(stats.total_requests, 2);

    // Counter identities hold.
    assert_eq!(stats.total_requests, stats.redis_hits + stats.redis_misses);
    assert_eq!(
        stats.redis_misses,
        stats.supabase_hits + stats.supabase_misses
    );

    // Invalidate, then read again: the remote is consulted a second time.
    assert!(
        tiers
            .cache
            .invalidate_question_pool(PoolLevel::Topic, "X")
            .await
    );
    tiers
        .cache
        .get_question_pool(PoolLevel::Topic, "X", true)
        .await
        .expect("refetched");
    assert_eq!(tiers.source.fetches(), 2);
}

#[tokio::test]
async fn tier3_fetch_writes_through_to_both_tiers() {
    let tiers = build(sample_source());

    tiers
        .cache
        .get_question_pool(PoolLevel::Topic, "X", true)
        .await
        .expect("pool available upstream");

    assert!(tiers.warm.has_pool("topic_X"));
    assert!(tiers.hot.has_pool("topic_X"));
}

#[tokio::test]
async fn warm_hit_promotes_to_hot() {
    let tiers = build(StubQuestionSource::new());
    tiers.warm.seed_pool(
        make_pool(
            PoolLevel::Chapter,
            "C",
            vec![make_question("q1", vec![1, 0, 0, 0, 0], 0.2, 1.0)],
        ),
        Utc::now() + Duration::days(7),
    );

    tiers
        .cache
        .get_question_pool(PoolLevel::Chapter, "C", true)
        .await
        .expect("warm hit");

    let stats = tiers.cache.stats();
    assert_eq!(stats.supabase_hits, 1);
    assert_eq!(stats.external_api_calls, 0);
    assert!(tiers.hot.has_pool("chapter_C"), "write-through to Tier 1");
}

#[tokio::test]
async fn expired_warm_row_falls_through_to_tier3() {
    let tiers = build(sample_source());
    tiers.warm.seed_pool(
        make_pool(
            PoolLevel::Topic,
            "X",
            vec![make_question("stale", vec![1, 0, 0, 0, 0], 0.2, 1.0)],
        ),
        Utc::now() - Duration::hours(1),
    );

    let pool = tiers
        .cache
        .get_question_pool(PoolLevel::Topic, "X", true)
        .await
        .expect("refetched upstream");

    // The stale copy was discarded and replaced with the upstream snapshot.
    assert_eq!(pool.total_questions, 2);
    assert_eq!(tiers.source.fetches(), 1);

    let stats = tiers.cache.stats();
    assert_eq!(stats.supabase_misses, 1);
}

#[tokio::test]
async fn degraded_hot_tier_is_absorbed() {
    let tiers = build(StubQuestionSource::new());
    tiers.warm.seed_pool(
        make_pool(
            PoolLevel::Topic,
            "X",
            vec![make_question("q1", vec![1, 0, 0, 0, 0], 0.2, 1.0)],
        ),
        Utc::now() + Duration::days(7),
    );
    tiers.hot.failing.store(true, Ordering::SeqCst);

    // The hot tier errors on read and on write-through, but the waterfall
    // still serves the pool from the warm tier.
    let pool = tiers
        .cache
        .get_question_pool(PoolLevel::Topic, "X", true)
        .await
        .expect("served despite degraded Tier 1");
    assert_eq!(pool.total_questions, 1);

    let stats = tiers.cache.stats();
    assert_eq!(stats.redis_misses, 1);
    assert_eq!(stats.supabase_hits, 1);
}

#[tokio::test]
async fn all_tiers_failing_returns_none() {
    let tiers = build(StubQuestionSource::new());
    tiers.source.failing.store(true, Ordering::SeqCst);

    assert!(tiers
        .cache
        .get_question_pool(PoolLevel::Topic, "missing", true)
        .await
        .is_none());
}

#[tokio::test]
async fn refresh_always_consults_tier3() {
    let tiers = build(sample_source());

    tiers
        .cache
        .get_question_pool(PoolLevel::Topic, "X", true)
        .await
        .expect("initial fetch");
    assert_eq!(tiers.source.fetches(), 1);

    // Refresh bypasses both populated tiers.
    tiers
        .cache
        .refresh_question_pool(PoolLevel::Topic, "X")
        .await
        .expect("refreshed");
    assert_eq!(tiers.source.fetches(), 2);
}

#[tokio::test]
async fn warmup_reports_per_pool_without_aborting() {
    let tiers = build(sample_source());

    let report = tiers
        .cache
        .warmup(&[
            (PoolLevel::Topic, "X".to_string()),
            (PoolLevel::Topic, "missing".to_string()),
        ])
        .await;

    assert_eq!(report.success, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.details.len(), 2);
    assert_eq!(report.details[0].status, "success");
    assert_eq!(report.details[0].questions, Some(2));
    assert_eq!(report.details[1].status, "failed");
}

#[tokio::test]
async fn reset_zeroes_counters() {
    let tiers = build(sample_source());
    tiers
        .cache
        .get_question_pool(PoolLevel::Topic, "X", true)
        .await
        .expect("fetch");

    tiers.cache.reset_stats();
    let stats = tiers.cache.stats();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.redis_hits, 0);
    assert_eq!(stats.external_api_calls, 0);
    assert_eq!(stats.overall_cache_hit_rate, 0.0);
}
