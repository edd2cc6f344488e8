/// Session lifecycle coordination
///
/// Owns the session state machine: start → active → (completed | expired).
/// Hot-store session state is the fast projection for in-flight tests; the
/// warm store keeps the canonical record. The submission lock on
/// (session_id, question_id) is the only cross-task mutual exclusion and is
/// released on every exit path.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{AdaptiveConfig, SessionConfig};
use crate::engine::{AdaptiveEngine, EndCriteria};
use crate::errors::AdaptestError;
use crate::questions::QuestionService;
use crate::store::{
    HotStore, Question, ResponseRow, SessionRow, SessionState, SessionStatus, WarmStore,
};

// ---------------------------------------------------------------------------
// Coordinator outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedTest {
    pub session_id: String,
    pub student_id: String,
    pub initial_proficiency: Vec<f64>,
    pub concept_names: Vec<String>,
    /// First scheduled question, correct answer stripped
    pub next_question: Question,
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Continue {
        current_proficiency: Vec<f64>,
        /// Correct answer stripped
        next_question: Question,
        questions_answered: u32,
    },
    Completed {
        final_proficiency: Vec<f64>,
        total_questions: u32,
        accuracy: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusView {
    pub session_id: String,
    pub status: SessionStatus,
    pub current_proficiency: Vec<f64>,
    pub questions_answered: u32,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndedTest {
    pub status: String,
    pub final_proficiency: Vec<f64>,
    pub total_questions: u32,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProficiencyView {
    pub student_id: String,
    pub proficiency: Vec<f64>,
    pub concept_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_questions: i32,
    pub accuracy: f64,
    pub status: SessionStatus,
    pub learning_gain: f64,
    pub final_proficiency: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressPoint {
    pub date: Option<DateTime<Utc>>,
    pub proficiency: Vec<f64>,
    pub accuracy: f64,
    pub questions_answered: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptPoint {
    pub date: Option<DateTime<Utc>>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptProgress {
    pub timeline: Vec<ConceptPoint>,
    pub improvement: f64,
    pub current_level: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    pub progress_timeline: Vec<ProgressPoint>,
    pub concept_progress: HashMap<String, ConceptProgress>,
    pub total_sessions: usize,
    pub avg_accuracy: f64,
}

// ---------------------------------------------------------------------------
// SessionCoordinator
// ---------------------------------------------------------------------------

pub struct SessionCoordinator {
    hot: Arc<dyn HotStore>,
    warm: Arc<dyn WarmStore>,
    questions: Arc<QuestionService>,
    engine: AdaptiveEngine,
    adaptive: AdaptiveConfig,
    session: SessionConfig,
}

impl SessionCoordinator {
    pub fn new(
        hot: Arc<dyn HotStore>,
        warm: Arc<dyn WarmStore>,
        questions: Arc<QuestionService>,
        engine: AdaptiveEngine,
        adaptive: AdaptiveConfig,
        session: SessionConfig,
    ) -> Self {
        SessionCoordinator {
            hot,
            warm,
            questions,
            engine,
            adaptive,
            session,
        }
    }

    /// Start a new test session: load the pool, ensure the student and their
    /// proficiency records exist, persist the canonical session row, pick the
    /// first question, and write the hot projection.
    pub async fn start(
        &self,
        student_id: &str,
        question_pool_id: &str,
        concept_names: Option<Vec<String>>,
        end_criteria: Option<EndCriteria>,
    ) -> Result<StartedTest, AdaptestError> {
        let session_id = Uuid::new_v4().to_string();
        let concept_names = concept_names.unwrap_or_else(|| self.adaptive.default_concepts.clone());
        let end_criteria = end_criteria.unwrap_or_else(|| EndCriteria {
            min_questions: self.adaptive.min_questions,
            max_questions: self.adaptive.max_questions,
            ..EndCriteria::default()
        });

        let questions = self.questions.get_questions(question_pool_id).await?;
        if questions.is_empty() {
            return Err(AdaptestError::PoolUnavailable {
                pool_id: question_pool_id.to_string(),
            });
        }
        let q_matrix = QuestionService::build_q_matrix(&questions);

        self.warm
            .get_or_create_student(student_id, &concept_names)
            .await?;

        let mut initial_proficiency = self.warm.get_proficiency(student_id).await?;
        if initial_proficiency.is_empty() {
            initial_proficiency = vec![0.5; concept_names.len()];
            self.warm
                .create_proficiencies(student_id, &initial_proficiency, &concept_names)
                .await?;
        }

        let now = Utc::now();
        self.warm
            .create_session(&SessionRow {
                id: session_id.clone(),
                student_id: student_id.to_string(),
                question_pool_id: question_pool_id.to_string(),
                status: SessionStatus::Active,
                initial_proficiency: initial_proficiency.clone(),
                final_proficiency: None,
                total_questions: 0,
                correct_responses: 0,
                accuracy: None,
                learning_gain: None,
                test_efficiency: None,
                started_at: now,
                completed_at: None,
                last_activity: now,
            })
            .await?;

        let next_question = self
            .engine
            .select_next_question(&questions, &q_matrix, &initial_proficiency, &[])
            .ok_or_else(|| AdaptestError::PoolUnavailable {
                pool_id: question_pool_id.to_string(),
            })?;

        let state = SessionState {
            student_id: student_id.to_string(),
            question_pool_id: question_pool_id.to_string(),
            current_proficiency: initial_proficiency.clone(),
            next_question_id: Some(next_question.id.clone()),
            status: SessionStatus::Active,
            questions_answered: 0,
            correct_count: 0,
            end_criteria,
            last_activity: Utc::now(),
        };
        self.hot
            .store_session_state(&session_id, &state, self.session.state_ttl_seconds)
            .await?;

        tracing::info!(session_id = %session_id, student_id = %student_id, "Started test session");

        Ok(StartedTest {
            session_id,
            student_id: student_id.to_string(),
            initial_proficiency,
            concept_names,
            next_question: next_question.stripped(),
        })
    }

    /// Submit a response. The submission lock on (session_id, question_id)
    /// makes this at-most-once; it is released on every exit path.
    pub async fn submit(
        &self,
        session_id: &str,
        question_id: &str,
        response: u8,
    ) -> Result<SubmitOutcome, AdaptestError> {
        let acquired = self
            .hot
            .acquire_submission_lock(session_id, question_id, self.session.lock_ttl_seconds)
            .await
            .unwrap_or(false);
        if !acquired {
            return Err(AdaptestError::DuplicateSubmission {
                session_id: session_id.to_string(),
                question_id: question_id.to_string(),
            });
        }

        let result = self.submit_locked(session_id, question_id, response).await;

        if let Err(e) = self
            .hot
            .release_submission_lock(session_id, question_id)
            .await
        {
            tracing::warn!(session_id = %session_id, question_id = %question_id, error = %e, "Failed to release submission lock");
        }

        result
    }

    async fn submit_locked(
        &self,
        session_id: &str,
        question_id: &str,
        response: u8,
    ) -> Result<SubmitOutcome, AdaptestError> {
        let state = self
            .hot
            .get_session_state(session_id)
            .await?
            .ok_or_else(|| AdaptestError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        if state.status != SessionStatus::Active {
            return Err(AdaptestError::SessionInactive {
                id: session_id.to_string(),
            });
        }

        let question = self
            .questions
            .get_question_by_id(question_id)
            .await?
            .ok_or_else(|| AdaptestError::QuestionNotFound {
                id: question_id.to_string(),
            })?;

        let questions = self.questions.get_questions(&state.question_pool_id).await?;
        let q_matrix = QuestionService::build_q_matrix(&questions);

        let new_proficiency =
            self.engine
                .update_ability(&state.current_proficiency, &question, response, &q_matrix);

        // Durable writes: proficiency, response record, activity touch
        let concept_names = self.warm.get_concept_names(&state.student_id).await?;
        self.warm
            .upsert_proficiencies(&state.student_id, &concept_names, &new_proficiency)
            .await?;
        self.warm
            .store_response(&ResponseRow {
                id: Uuid::new_v4().to_string(),
                student_id: state.student_id.clone(),
                session_id: session_id.to_string(),
                question_id: question_id.to_string(),
                response: response as i16,
                is_correct: response == 1,
                proficiency_before: state.current_proficiency.clone(),
                proficiency_after: new_proficiency.clone(),
                timestamp: Utc::now(),
            })
            .await?;
        self.warm.update_session_activity(session_id).await?;

        // Canonical history drives the stopping rule
        let responses = self
            .warm
            .get_session_responses(&state.student_id, session_id)
            .await?;

        let questions_answered = state.questions_answered + 1;
        let correct_count = state.correct_count + u32::from(response == 1);

        let keep_going =
            self.engine
                .should_continue(&responses, &new_proficiency, &state.end_criteria);

        if keep_going {
            if let Some(next_question) =
                self.engine
                    .select_next_question(&questions, &q_matrix, &new_proficiency, &responses)
            {
                let updated = SessionState {
                    current_proficiency: new_proficiency.clone(),
                    next_question_id: Some(next_question.id.clone()),
                    questions_answered,
                    correct_count,
                    last_activity: Utc::now(),
                    ..state
                };
                self.hot
                    .store_session_state(session_id, &updated, self.session.state_ttl_seconds)
                    .await?;

                return Ok(SubmitOutcome::Continue {
                    current_proficiency: new_proficiency,
                    next_question: next_question.stripped(),
                    questions_answered,
                });
            }
            // Pool exhausted: nothing left to ask, finalize gracefully
            tracing::info!(session_id = %session_id, "Question pool exhausted, completing session");
        }

        self.finalize(
            session_id,
            &new_proficiency,
            questions_answered,
            correct_count,
            &responses,
        )
        .await?;

        let accuracy = if questions_answered > 0 {
            correct_count as f64 / questions_answered as f64
        } else {
            0.0
        };
        Ok(SubmitOutcome::Completed {
            final_proficiency: new_proficiency,
            total_questions: questions_answered,
            accuracy,
        })
    }

    /// Persist completion in the warm store and drop the hot projection.
    async fn finalize(
        &self,
        session_id: &str,
        final_proficiency: &[f64],
        total_questions: u32,
        correct_count: u32,
        responses: &[ResponseRow],
    ) -> Result<(), AdaptestError> {
        let initial = self
            .warm
            .get_session(session_id)
            .await?
            .map(|row| row.initial_proficiency)
            .unwrap_or_else(|| vec![0.5; final_proficiency.len()]);

        let summary = self
            .engine
            .generate_summary(responses, &initial, final_proficiency);

        self.warm
            .complete_session(
                session_id,
                final_proficiency,
                total_questions,
                correct_count,
                summary.learning_gain,
                summary.test_efficiency,
            )
            .await?;
        self.hot.delete_session_state(session_id).await?;

        Ok(())
    }

    /// Current status: the hot projection when the session is live, otherwise
    /// the warm-store record.
    pub async fn status(&self, session_id: &str) -> Result<SessionStatusView, AdaptestError> {
        if let Some(state) = self.hot.get_session_state(session_id).await? {
            return Ok(SessionStatusView {
                session_id: session_id.to_string(),
                status: state.status,
                current_proficiency: state.current_proficiency,
                questions_answered: state.questions_answered,
                is_active: true,
                started_at: None,
                completed_at: None,
            });
        }

        let row = self
            .warm
            .get_session(session_id)
            .await?
            .ok_or_else(|| AdaptestError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        let current = row
            .final_proficiency
            .clone()
            .unwrap_or_else(|| row.initial_proficiency.clone());

        Ok(SessionStatusView {
            session_id: session_id.to_string(),
            status: row.status,
            current_proficiency: current,
            questions_answered: row.total_questions.max(0) as u32,
            is_active: false,
            started_at: Some(row.started_at),
            completed_at: row.completed_at,
        })
    }

    /// Manual finalize. Idempotent: once the hot projection is gone, the
    /// warm-store completion record is returned as-is.
    pub async fn end(&self, session_id: &str) -> Result<EndedTest, AdaptestError> {
        if let Some(state) = self.hot.get_session_state(session_id).await? {
            let responses = self
                .warm
                .get_session_responses(&state.student_id, session_id)
                .await?;
            self.finalize(
                session_id,
                &state.current_proficiency,
                state.questions_answered,
                state.correct_count,
                &responses,
            )
            .await?;

            let accuracy = if state.questions_answered > 0 {
                state.correct_count as f64 / state.questions_answered as f64
            } else {
                0.0
            };
            return Ok(EndedTest {
                status: "ended".to_string(),
                final_proficiency: state.current_proficiency,
                total_questions: state.questions_answered,
                accuracy,
            });
        }

        let row = self
            .warm
            .get_session(session_id)
            .await?
            .ok_or_else(|| AdaptestError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        Ok(EndedTest {
            status: row.status.to_string(),
            final_proficiency: row.final_proficiency.unwrap_or_default(),
            total_questions: row.total_questions.max(0) as u32,
            accuracy: row.accuracy.unwrap_or(0.0),
        })
    }

    // -----------------------------------------------------------------------
    // Student views
    // -----------------------------------------------------------------------

    pub async fn student_proficiency(
        &self,
        student_id: &str,
    ) -> Result<StudentProficiencyView, AdaptestError> {
        let student = self
            .warm
            .get_student(student_id)
            .await?
            .ok_or_else(|| AdaptestError::StudentNotFound {
                id: student_id.to_string(),
            })?;

        Ok(StudentProficiencyView {
            student_id: student_id.to_string(),
            proficiency: self.warm.get_proficiency(student_id).await?,
            concept_names: self.warm.get_concept_names(student_id).await?,
            last_updated: Some(student.updated_at),
        })
    }

    pub async fn student_history(
        &self,
        student_id: &str,
    ) -> Result<Vec<HistoryEntry>, AdaptestError> {
        let rows = self.warm.get_test_history(student_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| HistoryEntry {
                session_id: row.id,
                started_at: row.started_at,
                completed_at: row.completed_at,
                total_questions: row.total_questions,
                accuracy: row.accuracy.unwrap_or(0.0),
                status: row.status,
                learning_gain: row.learning_gain.unwrap_or(0.0),
                final_proficiency: row.final_proficiency.unwrap_or_default(),
            })
            .collect())
    }

    /// Learning progress over time: a per-session timeline plus per-concept
    /// improvement, derived from completed sessions oldest-first.
    pub async fn student_progress(
        &self,
        student_id: &str,
    ) -> Result<ProgressReport, AdaptestError> {
        let mut sessions: Vec<SessionRow> = self
            .warm
            .get_test_history(student_id)
            .await?
            .into_iter()
            .filter(|row| row.status == SessionStatus::Completed)
            .collect();
        sessions.sort_by_key(|row| row.completed_at);

        if sessions.is_empty() {
            return Ok(ProgressReport::default());
        }

        let timeline: Vec<ProgressPoint> = sessions
            .iter()
            .map(|row| ProgressPoint {
                date: row.completed_at,
                proficiency: row.final_proficiency.clone().unwrap_or_default(),
                accuracy: row.accuracy.unwrap_or(0.0),
                questions_answered: row.total_questions,
            })
            .collect();

        let concept_names = self.warm.get_concept_names(student_id).await?;
        let mut concept_progress = HashMap::new();

        for (i, concept) in concept_names.iter().enumerate() {
            let values: Vec<ConceptPoint> = sessions
                .iter()
                .filter_map(|row| {
                    row.final_proficiency
                        .as_ref()
                        .and_then(|p| p.get(i).copied())
                        .map(|value| ConceptPoint {
                            date: row.completed_at,
                            value,
                        })
                })
                .collect();

            let improvement = match (values.first(), values.last()) {
                (Some(first), Some(last)) if values.len() > 1 => last.value - first.value,
                _ => 0.0,
            };
            let current_level = values.last().map(|p| p.value).unwrap_or(0.5);

            concept_progress.insert(
                concept.clone(),
                ConceptProgress {
                    timeline: values,
                    improvement,
                    current_level,
                },
            );
        }

        let total_sessions = sessions.len();
        let avg_accuracy = sessions
            .iter()
            .map(|row| row.accuracy.unwrap_or(0.0))
            .sum::<f64>()
            / total_sessions as f64;

        Ok(ProgressReport {
            progress_timeline: timeline,
            concept_progress,
            total_sessions,
            avg_accuracy,
        })
    }
}
