/// PostgreSQL-backed implementation of WarmStore
///
/// Uses sqlx with PgPool for connection pooling and durable persistence.
/// Supports optional migration execution on startup. Proficiency vectors and
/// question metadata are stored as JSONB and bound as serde_json::Value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    Row,
};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AdaptestError;
use crate::store::{
    CacheTier, PoolLevel, Question, QuestionPool, ResponseRow, SessionRow, SessionStatus,
    StudentRow, WarmStore,
};

/// PostgreSQL-backed warm store using a sqlx connection pool.
pub struct PostgresWarmStore {
    pool: PgPool,
}

impl PostgresWarmStore {
    /// Create a new PostgresWarmStore, connecting to the database at database_url.
    ///
    /// Configures a production-ready connection pool with sensible defaults.
    /// If run_migrations is true, automatically runs pending migrations on startup.
    pub async fn new(database_url: &str, run_migrations: bool) -> Result<Self, AdaptestError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| {
                AdaptestError::Storage(format!("Failed to connect to database: {}", e))
            })?;

        if run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| AdaptestError::Storage(format!("Migration failed: {}", e)))?;
        }

        Ok(PostgresWarmStore { pool })
    }

    /// Return the underlying PgPool for callers that need direct access.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// JSONB conversion helpers
// ---------------------------------------------------------------------------

fn f64s_to_json(values: &[f64]) -> serde_json::Value {
    serde_json::json!(values)
}

fn json_to_f64s(value: serde_json::Value) -> Result<Vec<f64>, AdaptestError> {
    serde_json::from_value(value)
        .map_err(|e| AdaptestError::Storage(format!("Malformed proficiency JSON: {}", e)))
}

fn concepts_to_json(concepts: &[u8]) -> serde_json::Value {
    serde_json::json!(concepts)
}

fn json_to_concepts(value: serde_json::Value) -> Result<Vec<u8>, AdaptestError> {
    serde_json::from_value(value)
        .map_err(|e| AdaptestError::Storage(format!("Malformed concepts JSON: {}", e)))
}

fn strings_to_json(values: &[String]) -> serde_json::Value {
    serde_json::json!(values)
}

fn json_to_strings(value: serde_json::Value) -> Result<Vec<String>, AdaptestError> {
    serde_json::from_value(value)
        .map_err(|e| AdaptestError::Storage(format!("Malformed options JSON: {}", e)))
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn row_to_question(row: &PgRow) -> Result<Question, AdaptestError> {
    let options: serde_json::Value = row
        .try_get("options")
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;
    let concepts: serde_json::Value = row
        .try_get("concepts")
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;

    Ok(Question {
        id: row.try_get("id").map_err(|e| AdaptestError::Storage(e.to_string()))?,
        content: row.try_get("content").map_err(|e| AdaptestError::Storage(e.to_string()))?,
        options: json_to_strings(options)?,
        correct_answer: row.try_get("correct_answer").unwrap_or(None),
        concepts: json_to_concepts(concepts)?,
        difficulty: row.try_get("difficulty").unwrap_or(0.5),
        discrimination: row.try_get("discrimination").unwrap_or(1.0),
        guessing: row.try_get("guessing").unwrap_or(0.25),
        topic_id: row.try_get("topic_id").unwrap_or(None),
        chapter_id: row.try_get("chapter_id").unwrap_or(None),
        subject_id: row.try_get("subject_id").unwrap_or(None),
        class_id: row.try_get("class_id").unwrap_or(None),
        exam_id: row.try_get("exam_id").unwrap_or(None),
    })
}

fn row_to_session(row: &PgRow) -> Result<SessionRow, AdaptestError> {
    let status: String = row
        .try_get("status")
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;
    let status = SessionStatus::from_str(&status).map_err(AdaptestError::Storage)?;

    let initial: serde_json::Value = row
        .try_get("initial_proficiency")
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;
    let final_prof: Option<serde_json::Value> = row.try_get("final_proficiency").unwrap_or(None);

    Ok(SessionRow {
        id: row.try_get("id").map_err(|e| AdaptestError::Storage(e.to_string()))?,
        student_id: row
            .try_get("student_id")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
        question_pool_id: row
            .try_get("question_pool_id")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
        status,
        initial_proficiency: json_to_f64s(initial)?,
        final_proficiency: final_prof.map(json_to_f64s).transpose()?,
        total_questions: row.try_get("total_questions").unwrap_or(0),
        correct_responses: row.try_get("correct_responses").unwrap_or(0),
        accuracy: row.try_get("accuracy").unwrap_or(None),
        learning_gain: row.try_get("learning_gain").unwrap_or(None),
        test_efficiency: row.try_get("test_efficiency").unwrap_or(None),
        started_at: row
            .try_get("started_at")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
        completed_at: row.try_get("completed_at").unwrap_or(None),
        last_activity: row
            .try_get("last_activity")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
    })
}

fn row_to_response(row: &PgRow) -> Result<ResponseRow, AdaptestError> {
    let before: serde_json::Value = row
        .try_get("proficiency_before")
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;
    let after: serde_json::Value = row
        .try_get("proficiency_after")
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;

    Ok(ResponseRow {
        id: row.try_get("id").map_err(|e| AdaptestError::Storage(e.to_string()))?,
        student_id: row
            .try_get("student_id")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
        question_id: row
            .try_get("question_id")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
        response: row.try_get("response").map_err(|e| AdaptestError::Storage(e.to_string()))?,
        is_correct: row
            .try_get("is_correct")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
        proficiency_before: json_to_f64s(before)?,
        proficiency_after: json_to_f64s(after)?,
        timestamp: row
            .try_get("timestamp")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
    })
}

fn row_to_student(row: &PgRow) -> Result<StudentRow, AdaptestError> {
    Ok(StudentRow {
        id: row.try_get("id").map_err(|e| AdaptestError::Storage(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?,
    })
}

const QUESTION_COLUMNS: &str = "id, content, options, correct_answer, concepts, difficulty, \
     discrimination, guessing, topic_id, chapter_id, subject_id, class_id, exam_id";

const SESSION_COLUMNS: &str = "id, student_id, question_pool_id, status, initial_proficiency, \
     final_proficiency, total_questions, correct_responses, accuracy, learning_gain, \
     test_efficiency, started_at, completed_at, last_activity";

#[async_trait]
impl WarmStore for PostgresWarmStore {
    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    async fn get_or_create_student(
        &self,
        student_id: &str,
        concept_names: &[String],
    ) -> Result<StudentRow, AdaptestError> {
        let existing = sqlx::query("SELECT id, created_at, updated_at FROM students WHERE id = $1")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        if let Some(row) = existing {
            return row_to_student(&row);
        }

        let now = Utc::now();
        sqlx::query("INSERT INTO students (id, created_at, updated_at) VALUES ($1, $2, $2)")
            .bind(student_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(format!("Failed to create student: {}", e)))?;

        // New student starts at neutral proficiency for every supplied concept
        let initial = vec![0.5; concept_names.len()];
        self.create_proficiencies(student_id, &initial, concept_names)
            .await?;

        tracing::info!(student_id = %student_id, concepts = concept_names.len(), "Created new student");

        Ok(StudentRow {
            id: student_id.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_student(&self, student_id: &str) -> Result<Option<StudentRow>, AdaptestError> {
        let row = sqlx::query("SELECT id, created_at, updated_at FROM students WHERE id = $1")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_student).transpose()
    }

    async fn create_proficiencies(
        &self,
        student_id: &str,
        values: &[f64],
        concept_names: &[String],
    ) -> Result<(), AdaptestError> {
        let now = Utc::now();
        for (i, concept_name) in concept_names.iter().enumerate() {
            let value = values.get(i).copied().unwrap_or(0.5);
            sqlx::query(
                "INSERT INTO student_proficiencies \
                 (student_id, concept_name, proficiency_value, confidence, created_at, updated_at) \
                 VALUES ($1, $2, $3, 0.0, $4, $4) \
                 ON CONFLICT (student_id, concept_name) DO NOTHING",
            )
            .bind(student_id)
            .bind(concept_name)
            .bind(value)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AdaptestError::Storage(format!("Failed to create proficiency record: {}", e))
            })?;
        }

        Ok(())
    }

    async fn get_proficiency(&self, student_id: &str) -> Result<Vec<f64>, AdaptestError> {
        let rows = sqlx::query(
            "SELECT proficiency_value FROM student_proficiencies \
             WHERE student_id = $1 ORDER BY concept_name",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get("proficiency_value")
                    .map_err(|e| AdaptestError::Storage(e.to_string()))
            })
            .collect()
    }

    async fn get_concept_names(&self, student_id: &str) -> Result<Vec<String>, AdaptestError> {
        let rows = sqlx::query(
            "SELECT concept_name FROM student_proficiencies \
             WHERE student_id = $1 ORDER BY concept_name",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get("concept_name")
                    .map_err(|e| AdaptestError::Storage(e.to_string()))
            })
            .collect()
    }

    async fn upsert_proficiencies(
        &self,
        student_id: &str,
        concept_names: &[String],
        values: &[f64],
    ) -> Result<(), AdaptestError> {
        if concept_names.len() != values.len() {
            return Err(AdaptestError::Storage(format!(
                "Proficiency length mismatch for {}: {} concepts, {} values",
                student_id,
                concept_names.len(),
                values.len()
            )));
        }

        let now = Utc::now();
        // Per-row atomic upsert — concurrent sessions for the same student
        // cannot interleave a read-modify-write on individual concepts.
        for (concept_name, value) in concept_names.iter().zip(values.iter()) {
            sqlx::query(
                "INSERT INTO student_proficiencies \
                 (student_id, concept_name, proficiency_value, confidence, created_at, updated_at) \
                 VALUES ($1, $2, $3, 0.0, $4, $4) \
                 ON CONFLICT (student_id, concept_name) DO UPDATE SET \
                   proficiency_value = EXCLUDED.proficiency_value, \
                   updated_at = EXCLUDED.updated_at",
            )
            .bind(student_id)
            .bind(concept_name)
            .bind(value)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AdaptestError::Storage(format!("Failed to upsert proficiency: {}", e))
            })?;
        }

        Ok(())
    }

    async fn create_session(&self, row: &SessionRow) -> Result<(), AdaptestError> {
        sqlx::query(
            "INSERT INTO test_sessions \
             (id, student_id, question_pool_id, status, initial_proficiency, \
              total_questions, correct_responses, started_at, last_activity) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&row.id)
        .bind(&row.student_id)
        .bind(&row.question_pool_id)
        .bind(row.status.to_string())
        .bind(f64s_to_json(&row.initial_proficiency))
        .bind(row.total_questions)
        .bind(row.correct_responses)
        .bind(row.started_at)
        .bind(row.last_activity)
        .execute(&self.pool)
        .await
        .map_err(|e| AdaptestError::Storage(format!("Failed to create session: {}", e)))?;

        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>, AdaptestError> {
        let sql = format!("SELECT {} FROM test_sessions WHERE id = $1", SESSION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn update_session_activity(&self, session_id: &str) -> Result<(), AdaptestError> {
        sqlx::query("UPDATE test_sessions SET last_activity = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AdaptestError::Storage(format!("Failed to update session activity: {}", e))
            })?;

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
        let accuracy = if total_questions > 0 {
            correct_responses as f64 / total_questions as f64
        } else {
            0.0
        };

        sqlx::query(
            "UPDATE test_sessions SET \
               status = 'completed', \
               final_proficiency = $1, \
               total_questions = $2, \
               correct_responses = $3, \
               accuracy = $4, \
               learning_gain = $5, \
               test_efficiency = $6, \
               completed_at = $7 \
             WHERE id = $8",
        )
        .bind(f64s_to_json(final_proficiency))
        .bind(total_questions as i32)
        .bind(correct_responses as i32)
        .bind(accuracy)
        .bind(learning_gain)
        .bind(test_efficiency)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AdaptestError::Storage(format!("Failed to complete session: {}", e)))?;

        tracing::info!(session_id = %session_id, total_questions, "Completed session");
        Ok(())
    }

    async fn get_test_history(&self, student_id: &str) -> Result<Vec<SessionRow>, AdaptestError> {
        let sql = format!(
            "SELECT {} FROM test_sessions WHERE student_id = $1 \
             ORDER BY completed_at DESC NULLS LAST",
            SESSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(student_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        rows.iter().map(row_to_session).collect()
    }

    async fn store_response(&self, row: &ResponseRow) -> Result<(), AdaptestError> {
        // ON CONFLICT DO NOTHING enforces at most one row per
        // (session_id, question_id) even when the submission lock has lapsed.
        sqlx::query(
            "INSERT INTO test_responses \
             (id, student_id, session_id, question_id, response, is_correct, \
              proficiency_before, proficiency_after, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (session_id, question_id) DO NOTHING",
        )
        .bind(&row.id)
        .bind(&row.student_id)
        .bind(&row.session_id)
        .bind(&row.question_id)
        .bind(row.response)
        .bind(row.is_correct)
        .bind(f64s_to_json(&row.proficiency_before))
        .bind(f64s_to_json(&row.proficiency_after))
        .bind(row.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| AdaptestError::Storage(format!("Failed to store response: {}", e)))?;

        Ok(())
    }

    async fn get_session_responses(
        &self,
        student_id: &str,
        session_id: &str,
    ) -> Result<Vec<ResponseRow>, AdaptestError> {
        let rows = sqlx::query(
            "SELECT id, student_id, session_id, question_id, response, is_correct, \
             proficiency_before, proficiency_after, timestamp \
             FROM test_responses WHERE student_id = $1 AND session_id = $2 \
             ORDER BY timestamp",
        )
        .bind(student_id)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        rows.iter().map(row_to_response).collect()
    }

    async fn cache_question_pool(
        &self,
        pool: &QuestionPool,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AdaptestError> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO question_pools \
             (id, level, level_id, attribute_count, attributes, total_questions, cached_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
               attribute_count = EXCLUDED.attribute_count, \
               attributes = EXCLUDED.attributes, \
               total_questions = EXCLUDED.total_questions, \
               cached_at = EXCLUDED.cached_at, \
               expires_at = EXCLUDED.expires_at",
        )
        .bind(&pool.pool_id)
        .bind(pool.level.to_string())
        .bind(&pool.level_id)
        .bind(pool.attribute_count as i32)
        .bind(serde_json::json!(pool.attributes))
        .bind(pool.total_questions as i32)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AdaptestError::Storage(format!("Failed to cache pool metadata: {}", e)))?;

        self.store_questions(&pool.pool_id, &pool.questions).await?;

        tracing::info!(
            pool_id = %pool.pool_id,
            questions = pool.questions.len(),
            "Cached question pool in warm store"
        );
        Ok(())
    }

    async fn get_cached_question_pool(
        &self,
        pool_id: &str,
    ) -> Result<Option<QuestionPool>, AdaptestError> {
        let meta = sqlx::query(
            "SELECT id, level, level_id, attribute_count, attributes, cached_at, expires_at \
             FROM question_pools WHERE id = $1",
        )
        .bind(pool_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        let Some(meta) = meta else {
            return Ok(None);
        };

        let expires_at: DateTime<Utc> = meta
            .try_get("expires_at")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?;
        if expires_at < Utc::now() {
            tracing::info!(pool_id = %pool_id, "Warm pool cache expired");
            self.invalidate_question_pool(pool_id).await?;
            return Ok(None);
        }

        let level: String = meta
            .try_get("level")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?;
        let level = PoolLevel::from_str(&level)?;
        let level_id: String = meta
            .try_get("level_id")
            .map_err(|e| AdaptestError::Storage(e.to_string()))?;
        let attribute_count: i32 = meta.try_get("attribute_count").unwrap_or(0);
        let attributes: serde_json::Value =
            meta.try_get("attributes").unwrap_or(serde_json::Value::Null);
        let attributes: Vec<serde_json::Value> =
            serde_json::from_value(attributes).unwrap_or_default();
        let cached_at: Option<DateTime<Utc>> = meta.try_get("cached_at").unwrap_or(None);

        let questions = self.get_questions_by_pool(pool_id).await?;
        let total_questions = questions.len();

        Ok(Some(QuestionPool {
            pool_id: pool_id.to_string(),
            level,
            level_id,
            attribute_count: attribute_count as u32,
            attributes,
            questions,
            total_questions,
            fetched_at: cached_at,
            cache_tier: Some(CacheTier::Supabase),
        }))
    }

    async fn invalidate_question_pool(&self, pool_id: &str) -> Result<(), AdaptestError> {
        sqlx::query("DELETE FROM questions WHERE pool_id = $1")
            .bind(pool_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(format!("Failed to delete pool questions: {}", e)))?;

        sqlx::query("DELETE FROM question_pools WHERE id = $1")
            .bind(pool_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(format!("Failed to delete pool metadata: {}", e)))?;

        tracing::info!(pool_id = %pool_id, "Invalidated question pool from warm store");
        Ok(())
    }

    async fn store_questions(
        &self,
        pool_id: &str,
        questions: &[Question],
    ) -> Result<(), AdaptestError> {
        let now = Utc::now();
        for question in questions {
            sqlx::query(
                "INSERT INTO questions \
                 (id, pool_id, content, options, correct_answer, concepts, difficulty, \
                  discrimination, guessing, topic_id, chapter_id, subject_id, class_id, exam_id, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
                 ON CONFLICT (id) DO UPDATE SET \
                   pool_id = EXCLUDED.pool_id, \
                   content = EXCLUDED.content, \
                   options = EXCLUDED.options, \
                   correct_answer = EXCLUDED.correct_answer, \
                   concepts = EXCLUDED.concepts, \
                   difficulty = EXCLUDED.difficulty, \
                   discrimination = EXCLUDED.discrimination, \
                   guessing = EXCLUDED.guessing",
            )
            .bind(&question.id)
            .bind(pool_id)
            .bind(&question.content)
            .bind(strings_to_json(&question.options))
            .bind(&question.correct_answer)
            .bind(concepts_to_json(&question.concepts))
            .bind(question.difficulty)
            .bind(question.discrimination)
            .bind(question.guessing)
            .bind(&question.topic_id)
            .bind(&question.chapter_id)
            .bind(&question.subject_id)
            .bind(&question.class_id)
            .bind(&question.exam_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(format!("Failed to store question: {}", e)))?;
        }

        Ok(())
    }

    async fn get_questions_by_pool(
        &self,
        pool_id: &str,
    ) -> Result<Vec<Question>, AdaptestError> {
        let sql = format!(
            "SELECT {} FROM questions WHERE pool_id = $1 ORDER BY created_at, id",
            QUESTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(pool_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        rows.iter().map(row_to_question).collect()
    }

    async fn get_question_by_id(
        &self,
        question_id: &str,
    ) -> Result<Option<Question>, AdaptestError> {
        let sql = format!("SELECT {} FROM questions WHERE id = $1", QUESTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AdaptestError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_question).transpose()
    }
}
