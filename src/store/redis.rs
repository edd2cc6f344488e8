/// Redis-backed implementation of HotStore
///
/// Key layout:
///   session:{session_id}:state   JSON session projection, inactivity TTL
///   lock:{session_id}:{qid}      submission lock, SET NX EX, ~5s TTL
///   pool:{pool_id}               JSON pool snapshot, 24h TTL
///   question:{question_id}       JSON question with answer stripped, 1h TTL
///
/// Uses a multiplexed ConnectionManager; each operation clones it, which is
/// cheap and keeps the store free of in-process locks.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::AdaptestError;
use crate::store::{HotStore, HotStoreStats, Question, QuestionPool, SessionState};

pub struct RedisHotStore {
    conn: ConnectionManager,
}

impl RedisHotStore {
    /// Connect to Redis at redis_url and build the shared connection manager.
    pub async fn new(redis_url: &str) -> Result<Self, AdaptestError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AdaptestError::Storage(format!("Invalid Redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AdaptestError::Storage(format!("Failed to connect to Redis: {}", e)))?;

        Ok(RedisHotStore { conn })
    }

    fn session_key(session_id: &str) -> String {
        format!("session:{}:state", session_id)
    }

    fn lock_key(session_id: &str, question_id: &str) -> String {
        format!("lock:{}:{}", session_id, question_id)
    }

    fn pool_key(pool_id: &str) -> String {
        format!("pool:{}", pool_id)
    }

    fn question_key(question_id: &str) -> String {
        format!("question:{}", question_id)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AdaptestError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AdaptestError::Storage(format!("Redis GET failed: {}", e)))?;

        match data {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| AdaptestError::Storage(format!("Malformed cached JSON: {}", e))),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), AdaptestError> {
        let payload = serde_json::to_string(value)
            .map_err(|e| AdaptestError::Storage(format!("Failed to serialize for cache: {}", e)))?;

        let mut conn = self.conn.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_seconds)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AdaptestError::Storage(format!("Redis SETEX failed: {}", e)))?;

        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<bool, AdaptestError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AdaptestError::Storage(format!("Redis DEL failed: {}", e)))?;

        Ok(deleted > 0)
    }

    /// Cursor-based SCAN over a key pattern (never KEYS — it blocks the server).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, AdaptestError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| AdaptestError::Storage(format!("Redis SCAN failed: {}", e)))?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl HotStore for RedisHotStore {
    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }

    async fn store_session_state(
        &self,
        session_id: &str,
        state: &SessionState,
        ttl_seconds: u64,
    ) -> Result<(), AdaptestError> {
        self.set_json(&Self::session_key(session_id), state, ttl_seconds)
            .await?;
        tracing::debug!(session_id = %session_id, "Stored session state");
        Ok(())
    }

    async fn get_session_state(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionState>, AdaptestError> {
        self.get_json(&Self::session_key(session_id)).await
    }

    async fn delete_session_state(&self, session_id: &str) -> Result<bool, AdaptestError> {
        self.delete_key(&Self::session_key(session_id)).await
    }

    async fn acquire_submission_lock(
        &self,
        session_id: &str,
        question_id: &str,
        ttl_seconds: u64,
    ) -> Result<bool, AdaptestError> {
        let mut conn = self.conn.clone();
        // SET NX EX: the atomic set-if-absent claim. A nil reply means the
        // lock is already held by an in-flight submission.
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::lock_key(session_id, question_id))
            .arg(Utc::now().to_rfc3339())
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| AdaptestError::Storage(format!("Redis SET NX failed: {}", e)))?;

        Ok(reply.is_some())
    }

    async fn release_submission_lock(
        &self,
        session_id: &str,
        question_id: &str,
    ) -> Result<(), AdaptestError> {
        self.delete_key(&Self::lock_key(session_id, question_id))
            .await?;
        Ok(())
    }

    async fn cache_question_pool(
        &self,
        pool_id: &str,
        pool: &QuestionPool,
        ttl_seconds: u64,
    ) -> Result<(), AdaptestError> {
        self.set_json(&Self::pool_key(pool_id), pool, ttl_seconds)
            .await?;
        tracing::info!(pool_id = %pool_id, ttl_seconds, "Cached question pool in hot store");
        Ok(())
    }

    async fn get_cached_question_pool(
        &self,
        pool_id: &str,
    ) -> Result<Option<QuestionPool>, AdaptestError> {
        self.get_json(&Self::pool_key(pool_id)).await
    }

    async fn invalidate_question_pool(&self, pool_id: &str) -> Result<bool, AdaptestError> {
        let deleted = self.delete_key(&Self::pool_key(pool_id)).await?;
        if deleted {
            tracing::info!(pool_id = %pool_id, "Invalidated question pool from hot store");
        }
        Ok(deleted)
    }

    async fn cache_question(
        &self,
        question: &Question,
        ttl_seconds: u64,
    ) -> Result<(), AdaptestError> {
        // Never cache the correct answer where clients could fish for it
        let safe = question.stripped();
        self.set_json(&Self::question_key(&question.id), &safe, ttl_seconds)
            .await
    }

    async fn get_cached_question(
        &self,
        question_id: &str,
    ) -> Result<Option<Question>, AdaptestError> {
        self.get_json(&Self::question_key(question_id)).await
    }

    async fn session_ids(&self) -> Result<Vec<String>, AdaptestError> {
        let keys = self.scan_keys("session:*:state").await?;
        Ok(keys
            .iter()
            .filter_map(|k| {
                k.strip_prefix("session:")
                    .and_then(|rest| rest.strip_suffix(":state"))
                    .map(|id| id.to_string())
            })
            .collect())
    }

    async fn stats(&self) -> Result<HotStoreStats, AdaptestError> {
        Ok(HotStoreStats {
            active_sessions: self.scan_keys("session:*:state").await?.len() as u64,
            active_locks: self.scan_keys("lock:*").await?.len() as u64,
            cached_pools: self.scan_keys("pool:*").await?.len() as u64,
            cached_questions: self.scan_keys("question:*").await?.len() as u64,
        })
    }
}
