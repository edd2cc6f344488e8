/// In-memory store fakes for integration tests
///
/// Implement the HotStore / WarmStore / QuestionSource seams over plain
/// HashMaps so the cache manager and session coordinator can be driven
/// end-to-end without Redis, PostgreSQL, or a live upstream. Failure
/// injection flags simulate degraded tiers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use adaptest::errors::AdaptestError;
use adaptest::source::QuestionSource;
use adaptest::store::{
    HotStore, HotStoreStats, PoolLevel, Question, QuestionPool, ResponseRow, SessionRow,
    SessionState, SessionStatus, StudentRow, WarmStore,
};

pub fn make_question(id: &str, concepts: Vec<u8>, difficulty: f64, discrimination: f64) -> Question {
    Question {
        id: id.to_string(),
        content: format!("question {}", id),
        options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        correct_answer: Some("a".to_string()),
        concepts,
        difficulty,
        discrimination,
        guessing: 0.25,
        topic_id: None,
        chapter_id: None,
        subject_id: None,
        class_id: None,
        exam_id: None,
    }
}

pub fn make_pool(level: PoolLevel, level_id: &str, questions: Vec<Question>) -> QuestionPool {
    let total_questions = questions.len();
    QuestionPool {
        pool_id: level.pool_id(level_id),
        level,
        level_id: level_id.to_string(),
        attribute_count: 5,
        attributes: Vec::new(),
        questions,
        total_questions,
        fetched_at: None,
        cache_tier: None,
    }
}

// ---------------------------------------------------------------------------
// Hot store fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryHotStore {
    sessions: Mutex<HashMap<String, SessionState>>,
    locks: Mutex<HashSet<String>>,
    pools: Mutex<HashMap<String, QuestionPool>>,
    questions: Mutex<HashMap<String, Question>>,
    /// When set, every read/write errors — simulates a degraded Tier 1.
    pub failing: AtomicBool,
}

impl MemoryHotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<(), AdaptestError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdaptestError::Storage("hot store down".to_string()));
        }
        Ok(())
    }

    pub fn has_pool(&self, pool_id: &str) -> bool {
        self.pools.lock().unwrap().contains_key(pool_id)
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn ping(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    async fn store_session_state(
        &self,
        session_id: &str,
        state: &SessionState,
        _ttl_seconds: u64,
    ) -> Result<(), AdaptestError> {
        self.check()?;
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn get_session_state(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionState>, AdaptestError> {
        self.check()?;
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn delete_session_state(&self, session_id: &str) -> Result<bool, AdaptestError> {
        self.check()?;
        Ok(self.sessions.lock().unwrap().remove(session_id).is_some())
    }

    async fn acquire_submission_lock(
        &self,
        session_id: &str,
        question_id: &str,
        _ttl_seconds: u64,
    ) -> Result<bool, AdaptestError> {
        self.check()?;
        Ok(self
            .locks
            .lock()
            .unwrap()
            .insert(format!("{}:{}", session_id, question_id)))
    }

    async fn release_submission_lock(
        &self,
        session_id: &str,
        question_id: &str,
    ) -> Result<(), AdaptestError> {
        self.check()?;
        self.locks
            .lock()
            .unwrap()
            .remove(&format!("{}:{}", session_id, question_id));
        Ok(())
    }

    async fn cache_question_pool(
        &self,
        pool_id: &str,
        pool: &QuestionPool,
        _ttl_seconds: u64,
    ) -> Result<(), AdaptestError> {
        self.check()?;
        self.pools
            .lock()
            .unwrap()
            .insert(pool_id.to_string(), pool.clone());
        Ok(())
    }

    async fn get_cached_question_pool(
        &self,
        pool_id: &str,
    ) -> Result<Option<QuestionPool>, AdaptestError> {
        self.check()?;
        Ok(self.pools.lock().unwrap().get(pool_id).cloned())
    }

    async fn invalidate_question_pool(&self, pool_id: &str) -> Result<bool, AdaptestError> {
        self.check()?;
        Ok(self.pools.lock().unwrap().remove(pool_id).is_some())
    }

    async fn cache_question(
        &self,
        question: &Question,
        _ttl_seconds: u64,
    ) -> Result<(), AdaptestError> {
        self.check()?;
        self.questions
            .lock()
            .unwrap()
            .insert(question.id.clone(), question.stripped());
        Ok(())
    }

    async fn get_cached_question(
        &self,
        question_id: &str,
    ) -> Result<Option<Question>, AdaptestError> {
        self.check()?;
        Ok(self.questions.lock().unwrap().get(question_id).cloned())
    }

    async fn session_ids(&self) -> Result<Vec<String>, AdaptestError> {
        self.check()?;
        Ok(self.sessions.lock().unwrap().keys().cloned().collect())
    }

    async fn stats(&self) -> Result<HotStoreStats, AdaptestError> {
        self.check()?;
        Ok(HotStoreStats {
            active_sessions: self.sessions.lock().unwrap().len() as u64,
            active_locks: self.locks.lock().unwrap().len() as u64,
            cached_pools: self.pools.lock().unwrap().len() as u64,
            cached_questions: self.questions.lock().unwrap().len() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// Warm store fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryWarmStore {
    students: Mutex<HashMap<String, StudentRow>>,
    proficiencies: Mutex<HashMap<String, BTreeMap<String, f64>>>,
    sessions: Mutex<HashMap<String, SessionRow>>,
    responses: Mutex<Vec<ResponseRow>>,
    pools: Mutex<HashMap<String, (QuestionPool, DateTime<Utc>)>>,
    questions: Mutex<HashMap<String, (String, Question)>>,
}

impl MemoryWarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pool(&self, pool_id: &str) -> bool {
        self.pools.lock().unwrap().contains_key(pool_id)
    }

    pub fn response_count(&self, session_id: &str) -> usize {
        self.responses
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.session_id == session_id)
            .count()
    }

    /// Seed the Tier-2 pool cache directly, with an explicit expiry.
    pub fn seed_pool(&self, pool: QuestionPool, expires_at: DateTime<Utc>) {
        for q in &pool.questions {
            self.questions
                .lock()
                .unwrap()
                .insert(q.id.clone(), (pool.pool_id.clone(), q.clone()));
        }
        self.pools
            .lock()
            .unwrap()
            .insert(pool.pool_id.clone(), (pool, expires_at));
    }
}

#[async_trait]
impl WarmStore for MemoryWarmStore {
    async fn ping(&self) -> bool {
        true
    }

    async fn get_or_create_student(
        &self,
        student_id: &str,
        concept_names: &[String],
    ) -> Result<StudentRow, AdaptestError> {
        if let Some(existing) = self.students.lock().unwrap().get(student_id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let row = StudentRow {
            id: student_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.students
            .lock()
            .unwrap()
            .insert(student_id.to_string(), row.clone());

        let initial = vec![0.5; concept_names.len()];
        self.create_proficiencies(student_id, &initial, concept_names)
            .await?;
        Ok(row)
    }

    async fn get_student(&self, student_id: &str) -> Result<Option<StudentRow>, AdaptestError> {
        Ok(self.students.lock().unwrap().get(student_id).cloned())
    }

    async fn create_proficiencies(
        &self,
        student_id: &str,
        values: &[f64],
        concept_names: &[String],
    ) -> Result<(), AdaptestError> {
        let mut all = self.proficiencies.lock().unwrap();
        let records = all.entry(student_id.to_string()).or_default();
        for (i, name) in concept_names.iter().enumerate() {
            records
                .entry(name.clone())
                .or_insert_with(|| values.get(i).copied().unwrap_or(0.5));
        }
        Ok(())
    }

    async fn get_proficiency(&self, student_id: &str) -> Result<Vec<f64>, AdaptestError> {
        Ok(self
            .proficiencies
            .lock()
            .unwrap()
            .get(student_id)
            .map(|records| records.values().copied().collect())
            .unwrap_or_default())
    }

    async fn get_concept_names(&self, student_id: &str) -> Result<Vec<String>, AdaptestError> {
        Ok(self
            .proficiencies
            .lock()
            .unwrap()
            .get(student_id)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_proficiencies(
        &self,
        student_id: &str,
        concept_names: &[String],
        values: &[f64],
    ) -> Result<(), AdaptestError> {
        let mut all = self.proficiencies.lock().unwrap();
        let records = all.entry(student_id.to_string()).or_default();
        for (name, value) in concept_names.iter().zip(values.iter()) {
            records.insert(name.clone(), *value);
        }
        Ok(())
    }

    async fn create_session(&self, row: &SessionRow) -> Result<(), AdaptestError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>, AdaptestError> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn update_session_activity(&self, session_id: &str) -> Result<(), AdaptestError> {
        if let Some(row) = self.sessions.lock().unwrap().get_mut(session_id) {
            row.last_activity = Utc::now();
        }
        Ok(())
    }

    async fn complete_session(
        &self,
        session_id: &str,
        final_proficiency: &[f64],
        total_questions: u32,
        correct_responses: u32,
        learning_gain: f64,
        test_efficiency: f64,
    ) -> Result<(), AdaptestError> {
        if let Some(row) = self.sessions.lock().unwrap().get_mut(session_id) {
            row.status = SessionStatus::Completed;
            row.final_proficiency = Some(final_proficiency.to_vec());
            row.total_questions = total_questions as i32;
            row.correct_responses = correct_responses as i32;
            row.accuracy = Some(if total_questions > 0 {
                correct_responses as f64 / total_questions as f64
            } else {
                0.0
            });
            row.learning_gain = Some(learning_gain);
            row.test_efficiency = Some(test_efficiency);
            row.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_test_history(&self, student_id: &str) -> Result<Vec<SessionRow>, AdaptestError> {
        let mut rows: Vec<SessionRow> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(rows)
    }

    async fn store_response(&self, row: &ResponseRow) -> Result<(), AdaptestError> {
        let mut responses = self.responses.lock().unwrap();
        // Mirror the unique-index no-op on (session_id, question_id)
        if responses
            .iter()
            .any(|r| r.session_id == row.session_id && r.question_id == row.question_id)
        {
            return Ok(());
        }
        responses.push(row.clone());
        Ok(())
    }

    async fn get_session_responses(
        &self,
        student_id: &str,
        session_id: &str,
    ) -> Result<Vec<ResponseRow>, AdaptestError> {
        let mut rows: Vec<ResponseRow> = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.student_id == student_id && r.session_id == session_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn cache_question_pool(
        &self,
        pool: &QuestionPool,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AdaptestError> {
        self.seed_pool(pool.clone(), expires_at);
        Ok(())
    }

    async fn get_cached_question_pool(
        &self,
        pool_id: &str,
    ) -> Result<Option<QuestionPool>, AdaptestError> {
        let expired = {
            let pools = self.pools.lock().unwrap();
            match pools.get(pool_id) {
                Some((_, expires_at)) if *expires_at < Utc::now() => true,
                Some((pool, _)) => return Ok(Some(pool.clone())),
                None => return Ok(None),
            }
        };
        if expired {
            self.invalidate_question_pool(pool_id).await?;
        }
        Ok(None)
    }

    async fn invalidate_question_pool(&self, pool_id: &str) -> Result<(), AdaptestError> {
        self.pools.lock().unwrap().remove(pool_id);
        self.questions
            .lock()
            .unwrap()
            .retain(|_, entry| entry.0 != pool_id);
        Ok(())
    }

    async fn store_questions(
        &self,
        pool_id: &str,
        questions: &[Question],
    ) -> Result<(), AdaptestError> {
        let mut all = self.questions.lock().unwrap();
        for q in questions {
            all.insert(q.id.clone(), (pool_id.to_string(), q.clone()));
        }
        Ok(())
    }

    async fn get_questions_by_pool(
        &self,
        pool_id: &str,
    ) -> Result<Vec<Question>, AdaptestError> {
        let mut rows: Vec<Question> = self
            .questions
            .lock()
            .unwrap()
            .values()
            .filter(|(owner, _)| owner == pool_id)
            .map(|(_, q)| q.clone())
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn get_question_by_id(
        &self,
        question_id: &str,
    ) -> Result<Option<Question>, AdaptestError> {
        Ok(self
            .questions
            .lock()
            .unwrap()
            .get(question_id)
            .map(|(_, q)| q.clone()))
    }
}

// ---------------------------------------------------------------------------
// Question source stub
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StubQuestionSource {
    pools: Mutex<HashMap<String, QuestionPool>>,
    pub fetch_calls: AtomicU64,
    pub failing: AtomicBool,
}

impl StubQuestionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(pool: QuestionPool) -> Self {
        let stub = Self::default();
        stub.pools
            .lock()
            .unwrap()
            .insert(pool.pool_id.clone(), pool);
        stub
    }

    pub fn fetches(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionSource for StubQuestionSource {
    async fn ping(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    async fn fetch_pool(
        &self,
        level: PoolLevel,
        level_id: &str,
        _fetch_all_pages: bool,
    ) -> Result<Option<QuestionPool>, AdaptestError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AdaptestError::Remote {
                status: 503,
                message: "upstream down".to_string(),
            });
        }
        Ok(self
            .pools
            .lock()
            .unwrap()
            .get(&level.pool_id(level_id))
            .cloned())
    }
}
