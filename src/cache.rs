/// Three-tier question-pool cache
///
/// Read waterfall: hot store (Tier 1) → warm store (Tier 2) → external API
/// (Tier 3, source of truth), with write-through on the way back out. A tier
/// that errors is logged and treated as a miss; only when all three fail is
/// None returned. Write-through goes warm first, then hot, so a crash
/// between the two writes leaves the durable tier populated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CacheTtlConfig;
use crate::source::QuestionSource;
use crate::store::{HotStore, PoolLevel, QuestionPool, WarmStore};

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Waterfall counters, incremented from concurrent request handlers.
#[derive(Debug, Default)]
struct CacheCounters {
    redis_hits: AtomicU64,
    redis_misses: AtomicU64,
    supabase_hits: AtomicU64,
    supabase_misses: AtomicU64,
    external_api_calls: AtomicU64,
    total_requests: AtomicU64,
}

/// Point-in-time view of the counters with derived hit rates (percentages,
/// rounded to two decimals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub redis_hits: u64,
    pub redis_misses: u64,
    pub supabase_hits: u64,
    pub supabase_misses: u64,
    pub external_api_calls: u64,
    pub total_requests: u64,
    pub redis_hit_rate: f64,
    pub supabase_hit_rate: f64,
    pub external_api_rate: f64,
    pub overall_cache_hit_rate: f64,
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Warmup reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupDetail {
    pub pool_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmupReport {
    pub success: u32,
    pub failed: u32,
    pub details: Vec<WarmupDetail>,
}

// ---------------------------------------------------------------------------
// CacheManager
// ---------------------------------------------------------------------------

pub struct CacheManager {
    hot: Arc<dyn HotStore>,
    warm: Arc<dyn WarmStore>,
    source: Arc<dyn QuestionSource>,
    ttl: CacheTtlConfig,
    counters: CacheCounters,
}

impl CacheManager {
    pub fn new(
        hot: Arc<dyn HotStore>,
        warm: Arc<dyn WarmStore>,
        source: Arc<dyn QuestionSource>,
        ttl: CacheTtlConfig,
    ) -> Self {
        tracing::info!("3-tier cache manager initialized");
        CacheManager {
            hot,
            warm,
            source,
            ttl,
            counters: CacheCounters::default(),
        }
    }

    /// Waterfall read. Returns None only when every tier misses or fails.
    pub async fn get_question_pool(
        &self,
        level: PoolLevel,
        level_id: &str,
        fetch_all_pages: bool,
    ) -> Option<QuestionPool> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        let pool_id = level.pool_id(level_id);

        // Tier 1: hot store
        match self.hot.get_cached_question_pool(&pool_id).await {
            Ok(Some(pool)) => {
                self.counters.redis_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(pool_id = %pool_id, "Tier 1 hit");
                return Some(pool);
            }
            Ok(None) => {
                self.counters.redis_misses.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.redis_misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(pool_id = %pool_id, error = %e, "Hot tier error, continuing to Tier 2");
            }
        }

        // Tier 2: warm store
        match self.warm.get_cached_question_pool(&pool_id).await {
            Ok(Some(pool)) => {
                self.counters.supabase_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(pool_id = %pool_id, "Tier 2 hit");
                // Write-through to Tier 1
                if let Err(e) = self
                    .hot
                    .cache_question_pool(&pool_id, &pool, self.ttl.redis_pool_ttl_seconds)
                    .await
                {
                    tracing::warn!(pool_id = %pool_id, error = %e, "Failed to write pool through to hot tier");
                }
                return Some(pool);
            }
            Ok(None) => {
                self.counters.supabase_misses.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.supabase_misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(pool_id = %pool_id, error = %e, "Warm tier error, continuing to Tier 3");
            }
        }

        // Tier 3: authoritative external API
        self.counters
            .external_api_calls
            .fetch_add(1, Ordering::Relaxed);
        match self.source.fetch_pool(level, level_id, fetch_all_pages).await {
            Ok(Some(pool)) => {
                self.write_through(&pool_id, &pool).await;
                Some(pool)
            }
            Ok(None) => {
                tracing::error!(pool_id = %pool_id, "External API returned no data");
                None
            }
            Err(e) => {
                tracing::error!(pool_id = %pool_id, error = %e, "External API error");
                None
            }
        }
    }

    /// Write-through after a Tier 3 fetch: warm first (durable), then hot.
    /// Either write failing degrades to a cache miss next time — logged only.
    async fn write_through(&self, pool_id: &str, pool: &QuestionPool) {
        let expires_at = Utc::now() + Duration::seconds(self.ttl.warm_pool_ttl_seconds as i64);
        if let Err(e) = self.warm.cache_question_pool(pool, expires_at).await {
            tracing::warn!(pool_id = %pool_id, error = %e, "Failed to cache pool in warm tier");
        }
        if let Err(e) = self
            .hot
            .cache_question_pool(pool_id, pool, self.ttl.redis_pool_ttl_seconds)
            .await
        {
            tracing::warn!(pool_id = %pool_id, error = %e, "Failed to cache pool in hot tier");
        }
    }

    /// Delete the pool from both cache tiers. Per-tier failures do not abort
    /// the other tier; returns true only when both deletions succeeded.
    pub async fn invalidate_question_pool(&self, level: PoolLevel, level_id: &str) -> bool {
        let pool_id = level.pool_id(level_id);
        tracing::info!(pool_id = %pool_id, "Invalidating question pool from all tiers");

        let hot_ok = match self.hot.invalidate_question_pool(&pool_id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(pool_id = %pool_id, error = %e, "Failed to invalidate hot tier");
                false
            }
        };

        let warm_ok = match self.warm.invalidate_question_pool(&pool_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(pool_id = %pool_id, error = %e, "Failed to invalidate warm tier");
                false
            }
        };

        hot_ok && warm_ok
    }

    /// Force-refresh: drop both cache tiers, then drive a Tier 3 fetch.
    pub async fn refresh_question_pool(
        &self,
        level: PoolLevel,
        level_id: &str,
    ) -> Option<QuestionPool> {
        tracing::info!(pool_id = %level.pool_id(level_id), "Force refreshing question pool");
        self.invalidate_question_pool(level, level_id).await;
        self.get_question_pool(level, level_id, true).await
    }

    /// Pre-warm the cache for a batch of pools. Individual failures are
    /// reported per pool; the batch always runs to completion.
    pub async fn warmup(&self, pools: &[(PoolLevel, String)]) -> WarmupReport {
        tracing::info!(count = pools.len(), "Warming up cache");
        let mut report = WarmupReport::default();

        for (level, level_id) in pools {
            let pool_id = level.pool_id(level_id);
            match self.get_question_pool(*level, level_id, true).await {
                Some(pool) => {
                    report.success += 1;
                    report.details.push(WarmupDetail {
                        pool_id,
                        status: "success".to_string(),
                        questions: Some(pool.total_questions),
                        error: None,
                    });
                }
                None => {
                    report.failed += 1;
                    report.details.push(WarmupDetail {
                        pool_id,
                        status: "failed".to_string(),
                        questions: None,
                        error: Some("No data returned".to_string()),
                    });
                }
            }
        }

        tracing::info!(
            success = report.success,
            failed = report.failed,
            "Cache warmup complete"
        );
        report
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let redis_hits = self.counters.redis_hits.load(Ordering::Relaxed);
        let redis_misses = self.counters.redis_misses.load(Ordering::Relaxed);
        let supabase_hits = self.counters.supabase_hits.load(Ordering::Relaxed);
        let supabase_misses = self.counters.supabase_misses.load(Ordering::Relaxed);
        let external_api_calls = self.counters.external_api_calls.load(Ordering::Relaxed);
        let total_requests = self.counters.total_requests.load(Ordering::Relaxed);

        CacheStatsSnapshot {
            redis_hits,
            redis_misses,
            supabase_hits,
            supabase_misses,
            external_api_calls,
            total_requests,
            redis_hit_rate: percent(redis_hits, total_requests),
            supabase_hit_rate: percent(supabase_hits, total_requests),
            external_api_rate: percent(external_api_calls, total_requests),
            overall_cache_hit_rate: percent(redis_hits + supabase_hits, total_requests),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.redis_hits.store(0, Ordering::Relaxed);
        self.counters.redis_misses.store(0, Ordering::Relaxed);
        self.counters.supabase_hits.store(0, Ordering::Relaxed);
        self.counters.supabase_misses.store(0, Ordering::Relaxed);
        self.counters.external_api_calls.store(0, Ordering::Relaxed);
        self.counters.total_requests.store(0, Ordering::Relaxed);
        tracing::info!("Cache statistics reset");
    }
}
