/// Question management: upload validation, pool routing, Q-matrix building,
/// and single-question lookup with hot-cache write-through.
///
/// Pool ids shaped "{level}_{level_id}" belong to the 3-tier cache; uploaded
/// pools get bare UUIDs and are read from the warm questions table directly.
/// The closed level vocabulary means the two id spaces cannot collide.

use std::str::FromStr;
use std::sync::Arc;

use uuid::Uuid;

use crate::cache::CacheManager;
use crate::engine::QMatrix;
use crate::errors::AdaptestError;
use crate::store::{HotStore, PoolLevel, Question, WarmStore};

pub struct QuestionService {
    cache: Arc<CacheManager>,
    warm: Arc<dyn WarmStore>,
    hot: Arc<dyn HotStore>,
    question_ttl_seconds: u64,
}

impl QuestionService {
    pub fn new(
        cache: Arc<CacheManager>,
        warm: Arc<dyn WarmStore>,
        hot: Arc<dyn HotStore>,
        question_ttl_seconds: u64,
    ) -> Self {
        QuestionService {
            cache,
            warm,
            hot,
            question_ttl_seconds,
        }
    }

    /// Validate and store an uploaded question set under a fresh pool id.
    pub async fn store_questions(
        &self,
        raw_questions: &[serde_json::Value],
    ) -> Result<String, AdaptestError> {
        let questions = validate_questions(raw_questions)?;
        let pool_id = Uuid::new_v4().to_string();
        self.warm.store_questions(&pool_id, &questions).await?;
        tracing::info!(pool_id = %pool_id, count = questions.len(), "Stored uploaded questions");
        Ok(pool_id)
    }

    /// Load a pool's questions by id, routing through the 3-tier cache when
    /// the id names a hierarchy level.
    pub async fn get_questions(&self, pool_id: &str) -> Result<Vec<Question>, AdaptestError> {
        if let Some((level, level_id)) = parse_pool_ref(pool_id) {
            return Ok(self
                .cache
                .get_question_pool(level, level_id, true)
                .await
                .map(|pool| pool.questions)
                .unwrap_or_default());
        }

        self.warm.get_questions_by_pool(pool_id).await
    }

    /// Single-question lookup: hot cache first (answer already stripped),
    /// then the warm store with write-through.
    pub async fn get_question_by_id(
        &self,
        question_id: &str,
    ) -> Result<Option<Question>, AdaptestError> {
        match self.hot.get_cached_question(question_id).await {
            Ok(Some(question)) => {
                tracing::debug!(question_id = %question_id, "Question cache hit");
                return Ok(Some(question));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(question_id = %question_id, error = %e, "Question cache read failed");
            }
        }

        let question = self.warm.get_question_by_id(question_id).await?;

        if let Some(ref q) = question {
            if let Err(e) = self.hot.cache_question(q, self.question_ttl_seconds).await {
                tracing::warn!(question_id = %question_id, error = %e, "Failed to cache question");
            }
        }

        Ok(question)
    }

    /// Q-matrix for a pool: question id → concept indicator vector.
    pub fn build_q_matrix(questions: &[Question]) -> QMatrix {
        questions
            .iter()
            .map(|q| (q.id.clone(), q.concepts.clone()))
            .collect()
    }
}

/// Split a pool id of the form "{level}_{level_id}" into its parts.
/// Returns None for ids outside the hierarchy vocabulary (uploaded pools).
pub fn parse_pool_ref(pool_id: &str) -> Option<(PoolLevel, &str)> {
    let (prefix, rest) = pool_id.split_once('_')?;
    if rest.is_empty() {
        return None;
    }
    PoolLevel::from_str(prefix).ok().map(|level| (level, rest))
}

/// Validate uploaded question JSON and convert to typed records.
fn validate_questions(raw: &[serde_json::Value]) -> Result<Vec<Question>, AdaptestError> {
    if raw.is_empty() {
        return Err(AdaptestError::validation("questions", "No questions provided"));
    }

    const REQUIRED_FIELDS: [&str; 4] = ["id", "content", "options", "correct_answer"];

    let mut questions = Vec::with_capacity(raw.len());
    for (i, value) in raw.iter().enumerate() {
        let obj = value.as_object().ok_or_else(|| {
            AdaptestError::validation("questions", &format!("Question {} is not an object", i + 1))
        })?;

        for field in REQUIRED_FIELDS {
            if !obj.contains_key(field) {
                return Err(AdaptestError::validation(
                    field,
                    &format!("Question {} missing required field: {}", i + 1, field),
                ));
            }
        }

        if let Some(concepts) = obj.get("concepts") {
            if !concepts.is_array() {
                return Err(AdaptestError::validation(
                    "concepts",
                    &format!("Question {} has invalid concepts format", i + 1),
                ));
            }
        }

        if let Some(difficulty) = obj.get("difficulty") {
            if !difficulty.is_number() {
                return Err(AdaptestError::validation(
                    "difficulty",
                    &format!("Question {} has invalid difficulty value", i + 1),
                ));
            }
        }

        let question: Question = serde_json::from_value(value.clone()).map_err(|e| {
            AdaptestError::validation(
                "questions",
                &format!("Question {} is malformed: {}", i + 1, e),
            )
        })?;
        questions.push(question);
    }

    Ok(questions)
}
