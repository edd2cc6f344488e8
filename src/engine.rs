/// Adaptive item selection and proficiency estimation
///
/// Multi-dimensional 2PL IRT over a Q-matrix:
///   1. Probability — logistic response model against the proficiency vector
///   2. Information — Fisher information, the item-selection score
///   3. Update     — bounded online gradient-ascent step on the log-likelihood
///   4. Stopping   — fixed-length / precision / classification end criteria
///
/// All functions are pure — no I/O, no clocks, no stored state beyond the
/// configured learning rate. Callers pass the pool, Q-matrix, proficiency
/// vector, and response history in on every call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::{Question, ResponseRow};

/// Per-question concept loadings: question id → 0/1 indicator vector.
pub type QMatrix = HashMap<String, Vec<u8>>;

// ---------------------------------------------------------------------------
// End criteria
// ---------------------------------------------------------------------------

/// Which stopping rule applies between the min/max question bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaKind {
    FixedLength,
    Precision,
    Classification,
    /// Anything the client sent that we do not recognize — treated as "stop".
    #[serde(other)]
    Unknown,
}

/// Stopping-rule configuration snapshotted into the session at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndCriteria {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: CriteriaKind,
    #[serde(default = "default_max_questions")]
    pub max_questions: u32,
    #[serde(default = "default_min_questions")]
    pub min_questions: u32,
    #[serde(default = "default_precision_threshold")]
    pub precision_threshold: f64,
    #[serde(default = "default_classification_threshold")]
    pub classification_threshold: f64,
}

fn default_kind() -> CriteriaKind {
    CriteriaKind::FixedLength
}

fn default_max_questions() -> u32 {
    20
}

fn default_min_questions() -> u32 {
    5
}

fn default_precision_threshold() -> f64 {
    0.3
}

fn default_classification_threshold() -> f64 {
    0.8
}

impl Default for EndCriteria {
    fn default() -> Self {
        EndCriteria {
            kind: CriteriaKind::FixedLength,
            max_questions: default_max_questions(),
            min_questions: default_min_questions(),
            precision_threshold: default_precision_threshold(),
            classification_threshold: default_classification_threshold(),
        }
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// End-of-test summary derived from the response history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSummary {
    pub total_questions: usize,
    pub correct_responses: usize,
    pub accuracy: f64,
    pub initial_proficiency: Vec<f64>,
    pub final_proficiency: Vec<f64>,
    pub proficiency_change: Vec<f64>,
    /// Mean absolute per-concept change
    pub learning_gain: f64,
    /// Mean per-step Euclidean proficiency movement divided by question count
    pub test_efficiency: f64,
}

// ---------------------------------------------------------------------------
// Pure numeric helpers
// ---------------------------------------------------------------------------

/// Logistic function.
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Dot product of a 0/1 indicator vector with the proficiency vector.
///
/// Indicator entries beyond the proficiency length are ignored; a shorter
/// indicator contributes nothing for the missing tail.
fn masked_dot(q_vec: &[u8], proficiency: &[f64]) -> f64 {
    q_vec
        .iter()
        .zip(proficiency.iter())
        .map(|(&q, &theta)| q as f64 * theta)
        .sum()
}

/// Population variance of a sample. Empty and single-element slices give 0.
fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Euclidean distance between two equal-length vectors.
fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Default Q-vector when a question carries no concept loadings:
/// the item loads on concept 0 only.
fn default_q_vector(len: usize) -> Vec<u8> {
    let mut v = vec![0u8; len];
    if let Some(first) = v.first_mut() {
        *first = 1;
    }
    v
}

// ---------------------------------------------------------------------------
// AdaptiveEngine
// ---------------------------------------------------------------------------

/// Stateless scorer/selector. Construct once at startup with the configured
/// learning rate and share freely — every method is a pure function of its
/// arguments.
#[derive(Debug, Clone)]
pub struct AdaptiveEngine {
    learning_rate: f64,
}

impl Default for AdaptiveEngine {
    fn default() -> Self {
        AdaptiveEngine { learning_rate: 0.1 }
    }
}

impl AdaptiveEngine {
    pub fn new(learning_rate: f64) -> Self {
        AdaptiveEngine { learning_rate }
    }

    /// Probability of a correct response under the 2PL model:
    /// p = sigma(a * (q_vec . theta) - b), clamped to [0.01, 0.99] so the
    /// gradient stays well-conditioned at extreme proficiency values.
    pub fn probability(
        &self,
        proficiency: &[f64],
        question: &Question,
        q_matrix: &QMatrix,
    ) -> f64 {
        let q_vec = self.q_vector_for(question, q_matrix, proficiency.len());
        let linear_term =
            question.discrimination * masked_dot(&q_vec, proficiency) - question.difficulty;
        sigmoid(linear_term).clamp(0.01, 0.99)
    }

    /// Fisher information: I = a^2 * p * (1 - p). The item-selection score.
    pub fn information(
        &self,
        proficiency: &[f64],
        question: &Question,
        q_matrix: &QMatrix,
    ) -> f64 {
        let p = self.probability(proficiency, question, q_matrix);
        question.discrimination.powi(2) * p * (1.0 - p)
    }

    /// Single-example gradient-ascent step on the log-likelihood:
    /// theta' = clip(theta + eta * (r - p) * p * (1 - p) * a * q_vec, -3, 3)
    ///
    /// Concepts the item does not load on (q_vec[i] = 0) are left unchanged.
    pub fn update_ability(
        &self,
        proficiency: &[f64],
        question: &Question,
        response: u8,
        q_matrix: &QMatrix,
    ) -> Vec<f64> {
        let q_vec = self.q_vector_for(question, q_matrix, proficiency.len());
        let p = self.probability(proficiency, question, q_matrix);
        let error = response as f64 - p;
        let step = self.learning_rate * error * p * (1.0 - p) * question.discrimination;

        proficiency
            .iter()
            .enumerate()
            .map(|(i, &theta)| {
                let loads = q_vec.get(i).copied().unwrap_or(0) as f64;
                (theta + step * loads).clamp(-3.0, 3.0)
            })
            .collect()
    }

    /// Select the unanswered question with maximum Fisher information.
    ///
    /// Ties break toward the first-encountered item so selection is stable
    /// across identical inputs. Returns None once the pool is exhausted.
    pub fn select_next_question<'a>(
        &self,
        questions: &'a [Question],
        q_matrix: &QMatrix,
        proficiency: &[f64],
        responses: &[ResponseRow],
    ) -> Option<&'a Question> {
        let used: std::collections::HashSet<&str> =
            responses.iter().map(|r| r.question_id.as_str()).collect();

        let mut best: Option<(&Question, f64)> = None;
        for question in questions.iter().filter(|q| !used.contains(q.id.as_str())) {
            let info = self.information(proficiency, question, q_matrix);
            match best {
                Some((_, max_info)) if info <= max_info => {}
                _ => best = Some((question, info)),
            }
        }

        best.map(|(q, _)| q)
    }

    /// Decide whether the test continues after the latest response.
    ///
    /// min_questions forces continuation, max_questions forces a stop;
    /// between the bounds the configured criteria kind decides.
    pub fn should_continue(
        &self,
        responses: &[ResponseRow],
        proficiency: &[f64],
        criteria: &EndCriteria,
    ) -> bool {
        let answered = responses.len();

        if answered < criteria.min_questions as usize {
            return true;
        }
        if answered >= criteria.max_questions as usize {
            return false;
        }

        match criteria.kind {
            CriteriaKind::FixedLength => true,
            CriteriaKind::Precision => {
                estimate_precision(responses, proficiency.len()) > criteria.precision_threshold
            }
            CriteriaKind::Classification => {
                classification_confidence(proficiency) < criteria.classification_threshold
            }
            CriteriaKind::Unknown => false,
        }
    }

    /// Build the end-of-test summary from the canonical response history.
    pub fn generate_summary(
        &self,
        responses: &[ResponseRow],
        initial_proficiency: &[f64],
        final_proficiency: &[f64],
    ) -> TestSummary {
        let total_questions = responses.len();
        let correct_responses = responses.iter().filter(|r| r.response == 1).count();
        let accuracy = if total_questions > 0 {
            correct_responses as f64 / total_questions as f64
        } else {
            0.0
        };

        let proficiency_change: Vec<f64> = final_proficiency
            .iter()
            .zip(initial_proficiency.iter())
            .map(|(f, i)| f - i)
            .collect();
        let learning_gain = if proficiency_change.is_empty() {
            0.0
        } else {
            proficiency_change.iter().map(|c| c.abs()).sum::<f64>()
                / proficiency_change.len() as f64
        };

        TestSummary {
            total_questions,
            correct_responses,
            accuracy,
            initial_proficiency: initial_proficiency.to_vec(),
            final_proficiency: final_proficiency.to_vec(),
            proficiency_change,
            learning_gain,
            test_efficiency: test_efficiency(responses),
        }
    }

    /// Resolve the Q-vector for a question, falling back to the question's
    /// own concept loadings and then to the concept-0-only default.
    fn q_vector_for(&self, question: &Question, q_matrix: &QMatrix, len: usize) -> Vec<u8> {
        if let Some(v) = q_matrix.get(&question.id) {
            return v.clone();
        }
        if !question.concepts.is_empty() {
            return question.concepts.clone();
        }
        default_q_vector(len)
    }
}

// ---------------------------------------------------------------------------
// Stopping-rule internals
// ---------------------------------------------------------------------------

/// Precision of the current estimate: 1 / (1 + mean per-concept variance of
/// the proficiency snapshots over the last 5 responses). Fewer than 2
/// snapshots report 1.0 (the estimate has not settled, keep going).
fn estimate_precision(responses: &[ResponseRow], concept_count: usize) -> f64 {
    if responses.len() < 2 {
        return 1.0;
    }

    let recent: Vec<&Vec<f64>> = responses
        .iter()
        .rev()
        .take(5)
        .map(|r| &r.proficiency_after)
        .collect();
    if recent.len() < 2 {
        return 1.0;
    }

    let mut variances = Vec::with_capacity(concept_count);
    for i in 0..concept_count {
        let concept_values: Vec<f64> =
            recent.iter().filter_map(|p| p.get(i).copied()).collect();
        if concept_values.len() > 1 {
            variances.push(variance(&concept_values));
        }
    }

    let avg_variance = if variances.is_empty() {
        1.0
    } else {
        variances.iter().sum::<f64>() / variances.len() as f64
    };

    1.0 / (1.0 + avg_variance)
}

/// Classification confidence: mean distance from neutral, normalized to [0, 1].
fn classification_confidence(proficiency: &[f64]) -> f64 {
    if proficiency.is_empty() {
        return 0.0;
    }
    let avg_distance =
        proficiency.iter().map(|p| p.abs()).sum::<f64>() / proficiency.len() as f64;
    (avg_distance / 2.0).min(1.0)
}

/// Efficiency metric: mean per-step Euclidean proficiency movement divided by
/// the number of questions asked.
fn test_efficiency(responses: &[ResponseRow]) -> f64 {
    if responses.is_empty() {
        return 0.0;
    }

    let changes: Vec<f64> = responses
        .iter()
        .filter(|r| !r.proficiency_before.is_empty() && !r.proficiency_after.is_empty())
        .map(|r| euclidean_distance(&r.proficiency_after, &r.proficiency_before))
        .collect();

    let avg_change = if changes.is_empty() {
        0.0
    } else {
        changes.iter().sum::<f64>() / changes.len() as f64
    };

    avg_change / responses.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str, concepts: Vec<u8>, difficulty: f64, discrimination: f64) -> Question {
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

    fn response(question_id: &str, r: i16, before: Vec<f64>, after: Vec<f64>) -> ResponseRow {
        ResponseRow {
            id: format!("resp-{}", question_id),
            student_id: "s1".to_string(),
            session_id: "sess".to_string(),
            question_id: question_id.to_string(),
            response: r,
            is_correct: r == 1,
            proficiency_before: before,
            proficiency_after: after,
            timestamp: Utc::now(),
        }
    }

    fn q_matrix(questions: &[Question]) -> QMatrix {
        questions
            .iter()
            .map(|q| (q.id.clone(), q.concepts.clone()))
            .collect()
    }

    #[test]
    fn test_probability_neutral_item() {
        let engine = AdaptiveEngine::default();
        let q = item("q1", vec![1, 0, 0, 0, 0], 0.0, 1.0);
        let qm = q_matrix(std::slice::from_ref(&q));
        let p = engine.probability(&[0.0; 5], &q, &qm);
        assert!((p - 0.5).abs() < 1e-10, "p was {}", p);
    }

    #[test]
    fn test_probability_clamped_at_extremes() {
        let engine = AdaptiveEngine::default();
        let easy = item("q1", vec![1, 0, 0, 0, 0], -10.0, 3.0);
        let hard = item("q2", vec![1, 0, 0, 0, 0], 10.0, 3.0);
        let qm = q_matrix(&[easy.clone(), hard.clone()]);
        assert_eq!(engine.probability(&[3.0, 0.0, 0.0, 0.0, 0.0], &easy, &qm), 0.99);
        assert_eq!(engine.probability(&[-3.0, 0.0, 0.0, 0.0, 0.0], &hard, &qm), 0.01);
    }

    #[test]
    fn test_update_moves_toward_correct_response() {
        let engine = AdaptiveEngine::default();
        let q = item("q1", vec![1, 1, 0, 0, 0], 0.2, 1.0);
        let qm = q_matrix(std::slice::from_ref(&q));
        let theta = vec![0.5; 5];

        let up = engine.update_ability(&theta, &q, 1, &qm);
        assert!(up[0] > theta[0]);
        assert!(up[1] > theta[1]);

        let down = engine.update_ability(&theta, &q, 0, &qm);
        assert!(down[0] < theta[0]);
        assert!(down[1] < theta[1]);
    }

    #[test]
    fn test_update_leaves_unloaded_concepts_unchanged() {
        let engine = AdaptiveEngine::default();
        let q = item("q1", vec![1, 0, 1, 0, 0], 0.0, 1.5);
        let qm = q_matrix(std::slice::from_ref(&q));
        let theta = vec![0.1, 0.2, 0.3, 0.4, 0.5];

        let updated = engine.update_ability(&theta, &q, 1, &qm);
        assert_eq!(updated[1], theta[1]);
        assert_eq!(updated[3], theta[3]);
        assert_eq!(updated[4], theta[4]);
    }

    #[test]
    fn test_update_stays_bounded() {
        let engine = AdaptiveEngine::new(100.0); // absurd step size
        let q = item("q1", vec![1, 1, 1, 1, 1], -5.0, 2.0);
        let qm = q_matrix(std::slice::from_ref(&q));

        let mut theta = vec![2.9; 5];
        for _ in 0..50 {
            theta = engine.update_ability(&theta, &q, 1, &qm);
            assert!(theta.iter().all(|&t| (-3.0..=3.0).contains(&t)));
        }
    }

    #[test]
    fn test_selection_prefers_higher_discrimination() {
        // Identical Q-vectors and difficulty, discriminations 1.0 vs 2.0
        // against neutral proficiency: information ratio is 4:1.
        let engine = AdaptiveEngine::default();
        let questions = vec![
            item("low", vec![1, 0, 0, 0, 0], 0.0, 1.0),
            item("high", vec![1, 0, 0, 0, 0], 0.0, 2.0),
        ];
        let qm = q_matrix(&questions);

        let picked = engine
            .select_next_question(&questions, &qm, &[0.0; 5], &[])
            .expect("pool not exhausted");
        assert_eq!(picked.id, "high");
    }

    #[test]
    fn test_selection_excludes_answered_and_is_stable() {
        let engine = AdaptiveEngine::default();
        let questions = vec![
            item("q1", vec![1, 0, 0, 0, 0], 0.0, 1.0),
            item("q2", vec![1, 0, 0, 0, 0], 0.0, 1.0),
            item("q3", vec![1, 0, 0, 0, 0], 0.0, 1.0),
        ];
        let qm = q_matrix(&questions);
        let answered = vec![response("q1", 1, vec![0.5; 5], vec![0.52; 5])];

        // q1 is excluded; q2 and q3 tie, first-encountered wins.
        let picked = engine
            .select_next_question(&questions, &qm, &[0.5; 5], &answered)
            .expect("pool not exhausted");
        assert_eq!(picked.id, "q2");
    }

    #[test]
    fn test_selection_exhausted_pool() {
        let engine = AdaptiveEngine::default();
        let questions = vec![item("q1", vec![1, 0, 0, 0, 0], 0.0, 1.0)];
        let qm = q_matrix(&questions);
        let answered = vec![response("q1", 0, vec![0.5; 5], vec![0.48; 5])];

        assert!(engine
            .select_next_question(&questions, &qm, &[0.5; 5], &answered)
            .is_none());
    }

    #[test]
    fn test_should_continue_respects_bounds() {
        let engine = AdaptiveEngine::default();
        let criteria = EndCriteria {
            kind: CriteriaKind::Classification,
            min_questions: 3,
            max_questions: 5,
            ..EndCriteria::default()
        };
        // Confidence is already saturated, but min_questions wins.
        let confident = vec![3.0; 5];
        let one = vec![response("q1", 1, vec![0.0; 5], confident.clone())];
        assert!(engine.should_continue(&one, &confident, &criteria));

        // max_questions wins regardless of the rule.
        let five: Vec<ResponseRow> = (0..5)
            .map(|i| response(&format!("q{}", i), 1, vec![0.0; 5], vec![0.0; 5]))
            .collect();
        assert!(!engine.should_continue(&five, &[0.0; 5], &criteria));
    }

    #[test]
    fn test_fixed_length_continues_between_bounds() {
        let engine = AdaptiveEngine::default();
        let criteria = EndCriteria {
            kind: CriteriaKind::FixedLength,
            min_questions: 1,
            max_questions: 10,
            ..EndCriteria::default()
        };
        let responses: Vec<ResponseRow> = (0..4)
            .map(|i| response(&format!("q{}", i), 1, vec![0.5; 5], vec![0.6; 5]))
            .collect();
        assert!(engine.should_continue(&responses, &[0.6; 5], &criteria));
    }

    #[test]
    fn test_precision_rule_stable_snapshots_keep_going() {
        // Identical snapshots mean zero variance, so precision is 1.0,
        // which stays above any sane threshold: the test runs to max.
        let engine = AdaptiveEngine::default();
        let criteria = EndCriteria {
            kind: CriteriaKind::Precision,
            min_questions: 5,
            max_questions: 50,
            precision_threshold: 0.3,
            ..EndCriteria::default()
        };
        let responses: Vec<ResponseRow> = (0..10)
            .map(|i| response(&format!("q{}", i), 1, vec![1.0; 5], vec![1.0; 5]))
            .collect();
        assert!(engine.should_continue(&responses, &[1.0; 5], &criteria));
    }

    #[test]
    fn test_precision_under_two_snapshots_is_full() {
        assert_eq!(estimate_precision(&[], 5), 1.0);
        let one = vec![response("q1", 1, vec![0.5; 5], vec![0.6; 5])];
        assert_eq!(estimate_precision(&one, 5), 1.0);
    }

    #[test]
    fn test_unknown_criteria_kind_stops() {
        let engine = AdaptiveEngine::default();
        let criteria = EndCriteria {
            kind: CriteriaKind::Unknown,
            min_questions: 1,
            max_questions: 10,
            ..EndCriteria::default()
        };
        let responses = vec![
            response("q1", 1, vec![0.5; 5], vec![0.6; 5]),
            response("q2", 0, vec![0.6; 5], vec![0.55; 5]),
        ];
        assert!(!engine.should_continue(&responses, &[0.55; 5], &criteria));
    }

    #[test]
    fn test_criteria_kind_deserializes_unrecognized_types() {
        let parsed: EndCriteria =
            serde_json::from_str(r#"{"type": "whatever", "max_questions": 7}"#).unwrap();
        assert_eq!(parsed.kind, CriteriaKind::Unknown);
        assert_eq!(parsed.max_questions, 7);
        assert_eq!(parsed.min_questions, 5);
    }

    #[test]
    fn test_summary_numbers() {
        let engine = AdaptiveEngine::default();
        let initial = vec![0.5, 0.5];
        let fin = vec![0.9, 0.3];
        let responses = vec![
            response("q1", 1, vec![0.5, 0.5], vec![0.7, 0.4]),
            response("q2", 0, vec![0.7, 0.4], vec![0.9, 0.3]),
        ];

        let summary = engine.generate_summary(&responses, &initial, &fin);
        assert_eq!(summary.total_questions, 2);
        assert_eq!(summary.correct_responses, 1);
        assert!((summary.accuracy - 0.5).abs() < 1e-10);
        assert!((summary.proficiency_change[0] - 0.4).abs() < 1e-10);
        assert!((summary.proficiency_change[1] + 0.2).abs() < 1e-10);
        assert!((summary.learning_gain - 0.3).abs() < 1e-10);
        assert!(summary.test_efficiency > 0.0);
    }

    #[test]
    fn test_variance_helpers() {
        assert_eq!(variance(&[]), 0.0);
        assert_eq!(variance(&[1.0]), 0.0);
        assert!((variance(&[1.0, 3.0]) - 1.0).abs() < 1e-10);
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-10);
    }
}
