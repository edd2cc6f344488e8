/// Storage abstraction layer
///
/// Domain record types plus the two store traits: HotStore (Redis-backed
/// Tier 1 — transient session state, submission locks, cache projections)
/// and WarmStore (PostgreSQL-backed Tier 2 — the canonical copy of students,
/// sessions, responses, proficiencies, and the durable pool cache).
/// The trait seams let tests substitute in-memory fakes.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::EndCriteria;
use crate::errors::AdaptestError;

pub mod postgres;
pub mod redis;

// ---------------------------------------------------------------------------
// Questions and pools
// ---------------------------------------------------------------------------

/// A single multiple-choice item with its IRT parameters.
///
/// Immutable once cached. `correct_answer` is None on copies that have been
/// stripped for client delivery or hot-store caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    /// 0/1 indicator of which latent concepts the item loads on
    #[serde(default = "default_concepts")]
    pub concepts: Vec<u8>,
    /// IRT difficulty `b`
    #[serde(default = "default_difficulty")]
    pub difficulty: f64,
    /// IRT discrimination `a`
    #[serde(default = "default_discrimination")]
    pub discrimination: f64,
    /// IRT guessing `c` — stored and transported, unused by the 2PL scorer
    #[serde(default = "default_guessing")]
    pub guessing: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<String>,
}

fn default_concepts() -> Vec<u8> {
    vec![1, 0, 0, 0, 0]
}

fn default_difficulty() -> f64 {
    0.5
}

fn default_discrimination() -> f64 {
    1.0
}

fn default_guessing() -> f64 {
    0.25
}

impl Question {
    /// Copy with the correct answer removed, safe for clients and shared caches.
    pub fn stripped(&self) -> Question {
        Question {
            correct_answer: None,
            ..self.clone()
        }
    }
}

/// Hierarchy level a question pool is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolLevel {
    Topic,
    Chapter,
    Subject,
    Class,
    Exam,
}

impl fmt::Display for PoolLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolLevel::Topic => write!(f, "topic"),
            PoolLevel::Chapter => write!(f, "chapter"),
            PoolLevel::Subject => write!(f, "subject"),
            PoolLevel::Class => write!(f, "class"),
            PoolLevel::Exam => write!(f, "exam"),
        }
    }
}

impl FromStr for PoolLevel {
    type Err = AdaptestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topic" => Ok(PoolLevel::Topic),
            "chapter" => Ok(PoolLevel::Chapter),
            "subject" => Ok(PoolLevel::Subject),
            "class" => Ok(PoolLevel::Class),
            "exam" => Ok(PoolLevel::Exam),
            other => Err(AdaptestError::validation(
                "level",
                &format!(
                    "Invalid level '{}': must be one of topic, chapter, subject, class, exam",
                    other
                ),
            )),
        }
    }
}

impl PoolLevel {
    /// Canonical pool id for a (level, level_id) pair.
    pub fn pool_id(&self, level_id: &str) -> String {
        format!("{}_{}", self, level_id)
    }
}

/// Which cache tier a pool snapshot was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Redis,
    Supabase,
    ExternalApi,
}

/// A read-only question pool snapshot with cache provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPool {
    pub pool_id: String,
    pub level: PoolLevel,
    pub level_id: String,
    pub attribute_count: u32,
    /// Per-concept metadata descriptors, passed through from the source
    #[serde(default)]
    pub attributes: Vec<serde_json::Value>,
    pub questions: Vec<Question>,
    pub total_questions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_tier: Option<CacheTier>,
}

// ---------------------------------------------------------------------------
// Students, sessions, responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRow {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Expired,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(format!("Unknown session status: {}", other)),
        }
    }
}

/// Canonical session record in the warm store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub student_id: String,
    pub question_pool_id: String,
    pub status: SessionStatus,
    pub initial_proficiency: Vec<f64>,
    pub final_proficiency: Option<Vec<f64>>,
    pub total_questions: i32,
    pub correct_responses: i32,
    pub accuracy: Option<f64>,
    pub learning_gain: Option<f64>,
    pub test_efficiency: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

/// Append-only response record. At most one row exists per
/// (session_id, question_id) — enforced by a unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRow {
    pub id: String,
    pub student_id: String,
    pub session_id: String,
    pub question_id: String,
    /// 0 = incorrect, 1 = correct
    pub response: i16,
    pub is_correct: bool,
    pub proficiency_before: Vec<f64>,
    pub proficiency_after: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Hot-store projection of an active session. Losing it degrades in-flight
/// UX; the canonical record stays in the warm store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub student_id: String,
    pub question_pool_id: String,
    pub current_proficiency: Vec<f64>,
    pub next_question_id: Option<String>,
    pub status: SessionStatus,
    pub questions_answered: u32,
    pub correct_count: u32,
    pub end_criteria: EndCriteria,
    pub last_activity: DateTime<Utc>,
}

/// Key counts by namespace, for the hot-store debug endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HotStoreStats {
    pub active_sessions: u64,
    pub active_locks: u64,
    pub cached_pools: u64,
    pub cached_questions: u64,
}

// ---------------------------------------------------------------------------
// HotStore trait (Tier 1)
// ---------------------------------------------------------------------------

/// Ephemeral key-value tier: session state with inactivity TTLs, submission
/// locks via atomic set-if-absent, and TTL'd cache projections.
///
/// All implementations must be Send + Sync to support concurrent access.
#[async_trait]
pub trait HotStore: Send + Sync {
    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> bool;

    /// Write the session projection with the inactivity TTL.
    async fn store_session_state(
        &self,
        session_id: &str,
        state: &SessionState,
        ttl_seconds: u64,
    ) -> Result<(), AdaptestError>;

    async fn get_session_state(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionState>, AdaptestError>;

    /// Returns true if a projection existed and was removed.
    async fn delete_session_state(&self, session_id: &str) -> Result<bool, AdaptestError>;

    /// Atomic set-if-absent claim over (session_id, question_id).
    /// Returns false when the lock is already held.
    async fn acquire_submission_lock(
        &self,
        session_id: &str,
        question_id: &str,
        ttl_seconds: u64,
    ) -> Result<bool, AdaptestError>;

    async fn release_submission_lock(
        &self,
        session_id: &str,
        question_id: &str,
    ) -> Result<(), AdaptestError>;

    async fn cache_question_pool(
        &self,
        pool_id: &str,
        pool: &QuestionPool,
        ttl_seconds: u64,
    ) -> Result<(), AdaptestError>;

    async fn get_cached_question_pool(
        &self,
        pool_id: &str,
    ) -> Result<Option<QuestionPool>, AdaptestError>;

    async fn invalidate_question_pool(&self, pool_id: &str) -> Result<bool, AdaptestError>;

    /// Cache a single question with the correct answer stripped.
    async fn cache_question(
        &self,
        question: &Question,
        ttl_seconds: u64,
    ) -> Result<(), AdaptestError>;

    async fn get_cached_question(
        &self,
        question_id: &str,
    ) -> Result<Option<Question>, AdaptestError>;

    /// Ids of all sessions that currently have a hot projection.
    async fn session_ids(&self) -> Result<Vec<String>, AdaptestError>;

    /// Key counts by namespace for monitoring.
    async fn stats(&self) -> Result<HotStoreStats, AdaptestError>;

    /// Remove session projections whose last_activity is older than the
    /// threshold. Returns the number of sessions pruned. Never touches the
    /// warm store — canonical rows remain.
    async fn cleanup_inactive_sessions(
        &self,
        inactivity_minutes: i64,
    ) -> Result<u32, AdaptestError> {
        let threshold = Duration::minutes(inactivity_minutes);
        let now = Utc::now();
        let mut removed = 0u32;

        for session_id in self.session_ids().await? {
            match self.get_session_state(&session_id).await {
                Ok(Some(state)) => {
                    if now.signed_duration_since(state.last_activity) > threshold {
                        if self.delete_session_state(&session_id).await? {
                            removed += 1;
                            tracing::info!(session_id = %session_id, "Pruned inactive session");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Failed to inspect session during cleanup");
                }
            }
        }

        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// WarmStore trait (Tier 2)
// ---------------------------------------------------------------------------

/// Durable row-oriented tier. Owns the canonical form of students, sessions,
/// responses, and proficiencies, and carries the TTL'd pool cache.
#[async_trait]
pub trait WarmStore: Send + Sync {
    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> bool;

    // Students and proficiency

    /// Fetch the student, creating it (with neutral 0.5 proficiency for each
    /// supplied concept) when absent.
    async fn get_or_create_student(
        &self,
        student_id: &str,
        concept_names: &[String],
    ) -> Result<StudentRow, AdaptestError>;

    async fn get_student(&self, student_id: &str) -> Result<Option<StudentRow>, AdaptestError>;

    async fn create_proficiencies(
        &self,
        student_id: &str,
        values: &[f64],
        concept_names: &[String],
    ) -> Result<(), AdaptestError>;

    /// Current proficiency vector, ordered by concept name. Empty when the
    /// student has no records yet.
    async fn get_proficiency(&self, student_id: &str) -> Result<Vec<f64>, AdaptestError>;

    async fn get_concept_names(&self, student_id: &str) -> Result<Vec<String>, AdaptestError>;

    /// Upsert the per-concept proficiency rows atomically per row.
    async fn upsert_proficiencies(
        &self,
        student_id: &str,
        concept_names: &[String],
        values: &[f64],
    ) -> Result<(), AdaptestError>;

    // Sessions

    async fn create_session(&self, row: &SessionRow) -> Result<(), AdaptestError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>, AdaptestError>;

    async fn update_session_activity(&self, session_id: &str) -> Result<(), AdaptestError>;

    #[allow(clippy::too_many_arguments)]
    async fn complete_session(
        &self,
        session_id: &str,
        final_proficiency: &[f64],
        total_questions: u32,
        correct_responses: u32,
        learning_gain: f64,
        test_efficiency: f64,
    ) -> Result<(), AdaptestError>;

    async fn get_test_history(&self, student_id: &str) -> Result<Vec<SessionRow>, AdaptestError>;

    // Responses

    /// Append a response record. A second write for the same
    /// (session_id, question_id) is a silent no-op.
    async fn store_response(&self, row: &ResponseRow) -> Result<(), AdaptestError>;

    /// Canonical response history for a session, ordered by timestamp.
    async fn get_session_responses(
        &self,
        student_id: &str,
        session_id: &str,
    ) -> Result<Vec<ResponseRow>, AdaptestError>;

    // Tier-2 pool cache

    async fn cache_question_pool(
        &self,
        pool: &QuestionPool,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AdaptestError>;

    /// Returns None when the pool is absent or its TTL has lapsed; expired
    /// rows are invalidated on the way out.
    async fn get_cached_question_pool(
        &self,
        pool_id: &str,
    ) -> Result<Option<QuestionPool>, AdaptestError>;

    async fn invalidate_question_pool(&self, pool_id: &str) -> Result<(), AdaptestError>;

    // Questions

    /// Store manually uploaded questions under a fresh pool id.
    async fn store_questions(
        &self,
        pool_id: &str,
        questions: &[Question],
    ) -> Result<(), AdaptestError>;

    async fn get_questions_by_pool(&self, pool_id: &str)
        -> Result<Vec<Question>, AdaptestError>;

    async fn get_question_by_id(
        &self,
        question_id: &str,
    ) -> Result<Option<Question>, AdaptestError>;
}
