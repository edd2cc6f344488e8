/// Authoritative remote question source (Tier 3)
///
/// Fetches paginated question pools over HTTP with a bearer token and
/// transforms the wire format into the canonical QuestionPool snapshot.
/// The QuestionSource trait keeps the cache manager testable without a
/// live upstream.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::config::ExternalApiConfig;
use crate::errors::AdaptestError;
use crate::store::{CacheTier, PoolLevel, Question, QuestionPool};

/// Upstream provider of question pools.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> bool;

    /// Fetch a pool, optionally materializing every page into one snapshot.
    /// Returns Ok(None) when the upstream has no such pool.
    async fn fetch_pool(
        &self,
        level: PoolLevel,
        level_id: &str,
        fetch_all_pages: bool,
    ) -> Result<Option<QuestionPool>, AdaptestError>;
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WirePage {
    level: String,
    level_id: String,
    #[serde(default)]
    attribute_count: Option<u32>,
    #[serde(default)]
    attributes: Vec<serde_json::Value>,
    #[serde(default)]
    questions: Vec<WireQuestion>,
    #[serde(default)]
    pagination: Option<WirePagination>,
}

#[derive(Debug, Deserialize)]
struct WireQuestion {
    id: String,
    content: String,
    #[serde(default)]
    options: Vec<String>,
    correct_answer: String,
    /// Renamed to `concepts` in the canonical form
    #[serde(default)]
    q_vector: Option<Vec<u8>>,
    #[serde(default)]
    difficulty: Option<f64>,
    #[serde(default)]
    discrimination: Option<f64>,
    #[serde(default)]
    guessing: Option<f64>,
    #[serde(default)]
    topic_id: Option<String>,
    #[serde(default)]
    chapter_id: Option<String>,
    #[serde(default)]
    subject_id: Option<String>,
    #[serde(default)]
    class_id: Option<String>,
    #[serde(default)]
    exam_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePagination {
    #[allow(dead_code)]
    page: u32,
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    has_more: bool,
}

impl WireQuestion {
    fn into_canonical(self) -> Question {
        Question {
            id: self.id,
            content: self.content,
            options: self.options,
            correct_answer: Some(self.correct_answer),
            concepts: self.q_vector.unwrap_or_else(|| vec![1, 0, 0, 0, 0]),
            difficulty: self.difficulty.unwrap_or(0.5),
            discrimination: self.discrimination.unwrap_or(1.0),
            guessing: self.guessing.unwrap_or(0.25),
            topic_id: self.topic_id,
            chapter_id: self.chapter_id,
            subject_id: self.subject_id,
            class_id: self.class_id,
            exam_id: self.exam_id,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// HTTP client against the external hierarchy API.
pub struct ExternalQuestionApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_seconds: u64,
    page_size: u32,
}

impl ExternalQuestionApi {
    pub fn new(config: &ExternalApiConfig) -> Result<Self, AdaptestError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AdaptestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ExternalQuestionApi {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_seconds: config.timeout_seconds,
            page_size: config.page_size,
        })
    }

    /// Fetch one page. Ok(None) means the upstream answered 404.
    async fn fetch_page(
        &self,
        level: PoolLevel,
        level_id: &str,
        page: u32,
    ) -> Result<Option<WirePage>, AdaptestError> {
        let url = format!(
            "{}/api/hierarchy/{}/{}/questions/enhanced",
            self.base_url, level, level_id
        );

        tracing::info!(level = %level, level_id = %level_id, page, "Fetching from external API");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(&[("page", page), ("page_size", self.page_size)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdaptestError::RemoteTimeout {
                        seconds: self.timeout_seconds,
                    }
                } else {
                    AdaptestError::Remote {
                        status: 0,
                        message: format!("HTTP request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 404 {
            tracing::warn!(level = %level, level_id = %level_id, "Pool not found upstream");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AdaptestError::Remote {
                status: status.as_u16(),
                message: body,
            });
        }

        let page: WirePage = response.json().await.map_err(|e| AdaptestError::Remote {
            status: status.as_u16(),
            message: format!("Failed to parse API response: {}", e),
        })?;

        Ok(Some(page))
    }

    /// Transform a (possibly merged) wire page into the canonical pool form.
    fn transform(page: WirePage, level: PoolLevel) -> QuestionPool {
        let questions: Vec<Question> = page
            .questions
            .into_iter()
            .map(WireQuestion::into_canonical)
            .collect();
        let total_questions = questions.len();
        let attribute_count = page
            .attribute_count
            .unwrap_or(page.attributes.len() as u32);

        QuestionPool {
            pool_id: level.pool_id(&page.level_id),
            level,
            level_id: page.level_id,
            attribute_count,
            attributes: page.attributes,
            questions,
            total_questions,
            fetched_at: Some(Utc::now()),
            cache_tier: Some(CacheTier::ExternalApi),
        }
    }
}

#[async_trait]
impl QuestionSource for ExternalQuestionApi {
    async fn ping(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn fetch_pool(
        &self,
        level: PoolLevel,
        level_id: &str,
        fetch_all_pages: bool,
    ) -> Result<Option<QuestionPool>, AdaptestError> {
        let Some(mut first) = self.fetch_page(level, level_id, 1).await? else {
            return Ok(None);
        };

        let (total_pages, has_more) = first
            .pagination
            .as_ref()
            .map(|p| (p.total_pages, p.has_more))
            .unwrap_or((1, false));

        if fetch_all_pages && has_more {
            for page_num in 2..=total_pages {
                match self.fetch_page(level, level_id, page_num).await {
                    Ok(Some(page)) => first.questions.extend(page.questions),
                    Ok(None) => {
                        tracing::warn!(
                            level = %level,
                            level_id = %level_id,
                            page = page_num,
                            "Page missing upstream, returning partial pool"
                        );
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            level = %level,
                            level_id = %level_id,
                            page = page_num,
                            error = %e,
                            "Page fetch failed, returning partial pool"
                        );
                        break;
                    }
                }
            }
        }

        let pool = Self::transform(first, level);
        tracing::info!(
            pool_id = %pool.pool_id,
            questions = pool.total_questions,
            "Fetched question pool from external API"
        );
        Ok(Some(pool))
    }
}
