/// HTTP surface
///
/// Thin request/response plumbing over the session coordinator, cache
/// manager, and question service. Handlers validate presence of required
/// fields, delegate to the core, and map domain errors onto HTTP statuses.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tower_http::cors::CorsLayer;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::errors::AdaptestError;
use crate::questions::QuestionService;
use crate::scheduler::CleanupScheduler;
use crate::session::{SessionCoordinator, SubmitOutcome};
use crate::source::QuestionSource;
use crate::store::{HotStore, PoolLevel, WarmStore};

/// Process-wide service registry, constructed once at startup and injected
/// into every handler.
pub struct AppContext {
    pub config: Config,
    pub hot: Arc<dyn HotStore>,
    pub warm: Arc<dyn WarmStore>,
    pub source: Arc<dyn QuestionSource>,
    pub cache: Arc<CacheManager>,
    pub questions: Arc<QuestionService>,
    pub coordinator: Arc<SessionCoordinator>,
    pub scheduler: Arc<CleanupScheduler>,
}

pub type SharedContext = Arc<AppContext>;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Newtype so AdaptestError can implement IntoResponse.
pub struct ApiError(AdaptestError);

impl From<AdaptestError> for ApiError {
    fn from(err: AdaptestError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            AdaptestError::Validation { .. } | AdaptestError::SessionInactive { .. } => {
                StatusCode::BAD_REQUEST
            }
            AdaptestError::PoolUnavailable { .. }
            | AdaptestError::SessionNotFound { .. }
            | AdaptestError::QuestionNotFound { .. }
            | AdaptestError::StudentNotFound { .. } => StatusCode::NOT_FOUND,
            AdaptestError::DuplicateSubmission { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log the details, never leak them to clients
            tracing::error!(error = %err, "Internal error");
            return (status, Json(json!({ "error": "Internal server error" }))).into_response();
        }

        let mut body = json!({ "error": err.to_string() });
        if let AdaptestError::Validation {
            field: Some(field), ..
        } = &err
        {
            body["field"] = json!(field);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/", get(root_probe))
        .route("/health", get(health))
        .route("/api/questions/upload", post(upload_questions))
        .route("/api/test/start", post(start_test))
        .route("/api/test/submit", post(submit_response))
        .route("/api/test/status/:session_id", get(test_status))
        .route("/api/test/end/:session_id", post(end_test))
        .route("/api/student/:student_id/proficiency", get(student_proficiency))
        .route("/api/student/:student_id/history", get(student_history))
        .route("/api/student/:student_id/progress", get(student_progress))
        .route("/api/cache/question-pool/:level/:level_id", get(get_question_pool))
        .route(
            "/api/cache/question-pool/:level/:level_id/invalidate",
            post(invalidate_question_pool),
        )
        .route(
            "/api/cache/question-pool/:level/:level_id/refresh",
            post(refresh_question_pool),
        )
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/stats/reset", post(reset_cache_stats))
        .route("/api/cache/warmup", post(warmup_cache))
        .route("/api/sessions/cleanup", post(cleanup_sessions))
        .route("/api/debug/hot-store/stats", get(hot_store_stats))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn root_probe() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn health(State(ctx): State<SharedContext>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "architecture": "3-tier-cache",
        "services": {
            "tier1_redis": ctx.hot.ping().await,
            "tier2_supabase": ctx.warm.ping().await,
            "tier3_external_api": ctx.source.ping().await,
        },
        "cache_stats": ctx.cache.stats(),
    }))
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UploadRequest {
    #[serde(default)]
    questions: Vec<serde_json::Value>,
}

async fn upload_questions(
    State(ctx): State<SharedContext>,
    Json(request): Json<UploadRequest>,
) -> ApiResult {
    let count = request.questions.len();
    let pool_id = ctx.questions.store_questions(&request.questions).await?;

    Ok(Json(json!({
        "message": "Questions uploaded successfully",
        "count": count,
        "question_pool_id": pool_id,
    })))
}

// ---------------------------------------------------------------------------
// Test lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StartRequest {
    student_id: Option<String>,
    question_pool_id: Option<String>,
    concept_names: Option<Vec<String>>,
    end_criteria: Option<crate::engine::EndCriteria>,
}

async fn start_test(
    State(ctx): State<SharedContext>,
    Json(request): Json<StartRequest>,
) -> ApiResult {
    let student_id = request
        .student_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdaptestError::validation("student_id", "student_id is required"))?;
    let question_pool_id = request
        .question_pool_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AdaptestError::validation("question_pool_id", "question_pool_id is required")
        })?;

    let started = ctx
        .coordinator
        .start(
            &student_id,
            &question_pool_id,
            request.concept_names,
            request.end_criteria,
        )
        .await?;

    Ok(Json(json!({
        "session_id": started.session_id,
        "student_id": started.student_id,
        "initial_proficiency": started.initial_proficiency,
        "concept_names": started.concept_names,
        "next_question": started.next_question,
        "status": "started",
    })))
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    session_id: Option<String>,
    question_id: Option<String>,
    response: Option<u8>,
}

async fn submit_response(
    State(ctx): State<SharedContext>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult {
    let session_id = request
        .session_id
        .ok_or_else(|| AdaptestError::validation("session_id", "session_id is required"))?;
    let question_id = request
        .question_id
        .ok_or_else(|| AdaptestError::validation("question_id", "question_id is required"))?;
    let response = request
        .response
        .ok_or_else(|| AdaptestError::validation("response", "response is required"))?;
    if response > 1 {
        return Err(AdaptestError::validation("response", "response must be 0 or 1").into());
    }

    let outcome = ctx
        .coordinator
        .submit(&session_id, &question_id, response)
        .await?;

    let body = match outcome {
        SubmitOutcome::Continue {
            current_proficiency,
            next_question,
            questions_answered,
        } => json!({
            "status": "continue",
            "current_proficiency": current_proficiency,
            "next_question": next_question,
            "questions_answered": questions_answered,
        }),
        SubmitOutcome::Completed {
            final_proficiency,
            total_questions,
            accuracy,
        } => json!({
            "status": "completed",
            "final_proficiency": final_proficiency,
            "total_questions": total_questions,
            "accuracy": accuracy,
        }),
    };

    Ok(Json(body))
}

async fn test_status(
    State(ctx): State<SharedContext>,
    Path(session_id): Path<String>,
) -> ApiResult {
    let view = ctx.coordinator.status(&session_id).await?;
    Ok(Json(serde_json::to_value(view).map_err(|e| {
        AdaptestError::Internal(format!("Failed to serialize status: {}", e))
    })?))
}

async fn end_test(State(ctx): State<SharedContext>, Path(session_id): Path<String>) -> ApiResult {
    let ended = ctx.coordinator.end(&session_id).await?;
    Ok(Json(serde_json::to_value(ended).map_err(|e| {
        AdaptestError::Internal(format!("Failed to serialize end result: {}", e))
    })?))
}

// ---------------------------------------------------------------------------
// Student views
// ---------------------------------------------------------------------------

async fn student_proficiency(
    State(ctx): State<SharedContext>,
    Path(student_id): Path<String>,
) -> ApiResult {
    let view = ctx.coordinator.student_proficiency(&student_id).await?;
    Ok(Json(serde_json::to_value(view).map_err(|e| {
        AdaptestError::Internal(format!("Failed to serialize proficiency: {}", e))
    })?))
}

async fn student_history(
    State(ctx): State<SharedContext>,
    Path(student_id): Path<String>,
) -> ApiResult {
    let history = ctx.coordinator.student_history(&student_id).await?;
    Ok(Json(json!({
        "student_id": student_id,
        "test_sessions": history,
    })))
}

async fn student_progress(
    State(ctx): State<SharedContext>,
    Path(student_id): Path<String>,
) -> ApiResult {
    let progress = ctx.coordinator.student_progress(&student_id).await?;
    Ok(Json(json!({
        "student_id": student_id,
        "progress_data": progress,
    })))
}

// ---------------------------------------------------------------------------
// Cache management
// ---------------------------------------------------------------------------

fn parse_level(level: &str) -> Result<PoolLevel, ApiError> {
    PoolLevel::from_str(level).map_err(ApiError::from)
}

async fn get_question_pool(
    State(ctx): State<SharedContext>,
    Path((level, level_id)): Path<(String, String)>,
) -> ApiResult {
    let level = parse_level(&level)?;
    let pool = ctx
        .cache
        .get_question_pool(level, &level_id, true)
        .await
        .ok_or(AdaptestError::PoolUnavailable {
            pool_id: level.pool_id(&level_id),
        })?;

    // Strip correct answers before the pool leaves the service
    let mut safe = pool;
    let stripped: Vec<_> = safe.questions.iter().map(|q| q.stripped()).collect();
    safe.questions = stripped;

    Ok(Json(serde_json::to_value(safe).map_err(|e| {
        AdaptestError::Internal(format!("Failed to serialize pool: {}", e))
    })?))
}

async fn invalidate_question_pool(
    State(ctx): State<SharedContext>,
    Path((level, level_id)): Path<(String, String)>,
) -> ApiResult {
    let level = parse_level(&level)?;
    let success = ctx.cache.invalidate_question_pool(level, &level_id).await;

    Ok(Json(json!({
        "pool_id": level.pool_id(&level_id),
        "invalidated": success,
    })))
}

async fn refresh_question_pool(
    State(ctx): State<SharedContext>,
    Path((level, level_id)): Path<(String, String)>,
) -> ApiResult {
    let level = parse_level(&level)?;
    let pool = ctx
        .cache
        .refresh_question_pool(level, &level_id)
        .await
        .ok_or(AdaptestError::PoolUnavailable {
            pool_id: level.pool_id(&level_id),
        })?;

    Ok(Json(json!({
        "pool_id": pool.pool_id,
        "total_questions": pool.total_questions,
        "refreshed": true,
    })))
}

async fn cache_stats(State(ctx): State<SharedContext>) -> Json<serde_json::Value> {
    Json(json!({ "cache_stats": ctx.cache.stats() }))
}

async fn reset_cache_stats(State(ctx): State<SharedContext>) -> Json<serde_json::Value> {
    ctx.cache.reset_stats();
    Json(json!({ "message": "Cache statistics reset" }))
}

#[derive(Debug, Deserialize)]
struct WarmupPoolRef {
    level: String,
    level_id: String,
}

#[derive(Debug, Deserialize)]
struct WarmupRequest {
    #[serde(default)]
    pools: Vec<WarmupPoolRef>,
}

async fn warmup_cache(
    State(ctx): State<SharedContext>,
    Json(request): Json<WarmupRequest>,
) -> ApiResult {
    if request.pools.is_empty() {
        return Err(AdaptestError::validation("pools", "No pools provided").into());
    }

    let mut pools = Vec::with_capacity(request.pools.len());
    for pool_ref in &request.pools {
        let level = parse_level(&pool_ref.level)?;
        pools.push((level, pool_ref.level_id.clone()));
    }

    let report = ctx.cache.warmup(&pools).await;
    Ok(Json(serde_json::to_value(report).map_err(|e| {
        AdaptestError::Internal(format!("Failed to serialize warmup report: {}", e))
    })?))
}

// ---------------------------------------------------------------------------
// Session cleanup and monitoring
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct CleanupRequest {
    inactivity_minutes: Option<i64>,
}

async fn cleanup_sessions(
    State(ctx): State<SharedContext>,
    request: Option<Json<CleanupRequest>>,
) -> ApiResult {
    let inactivity_minutes = request
        .and_then(|Json(r)| r.inactivity_minutes)
        .unwrap_or(ctx.config.session.inactivity_threshold_minutes);

    let removed = ctx
        .hot
        .cleanup_inactive_sessions(inactivity_minutes)
        .await?;

    Ok(Json(json!({
        "message": "Cleanup completed",
        "sessions_removed": removed,
        "inactivity_threshold_minutes": inactivity_minutes,
    })))
}

async fn hot_store_stats(State(ctx): State<SharedContext>) -> ApiResult {
    let stats = ctx.hot.stats().await?;
    Ok(Json(json!({
        "hot_store_stats": stats,
        "architecture": "3-tier-cache",
    })))
}
