use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::retry::{is_retryable_status, with_retry_if, RetryConfig};

const DIRECTORY_API_BASE: &str = "http://localhost:8001/api";

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("API request failed: status {status}: {detail}")]
    RequestFailed { status: u16, detail: String },

    #[error("Post not found or already collected: {0}")]
    NotFound(String),

    #[error("Post rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl DirectoryError {
    /// Timeouts are reported separately so callers can tell a slow directory
    /// from a broken one
    pub fn is_timeout(&self) -> bool {
        matches!(self, DirectoryError::NetworkError(e) if e.is_timeout())
    }

    /// Worth another attempt: network trouble or a retryable status
    pub fn is_transient(&self) -> bool {
        match self {
            DirectoryError::NetworkError(_) => true,
            DirectoryError::RequestFailed { status, .. } => {
                reqwest::StatusCode::from_u16(*status)
                    .map(is_retryable_status)
                    .unwrap_or(false)
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Client for the listings directory (`/posts` endpoints)
pub struct ItemDirectoryClient {
    client: reqwest::Client,
    base_url: String,
    retry_config: RetryConfig,
    /// Listing refreshes run on a timer; the next tick is the retry
    list_retry_config: RetryConfig,
}

impl ItemDirectoryClient {
    pub fn new() -> Self {
        Self::with_base_url(DIRECTORY_API_BASE.to_string(), Duration::from_secs(10))
    }

    pub fn with_base_url(base_url: String, timeout: Duration) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("Ucycle/0.1.0"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_config: RetryConfig::default(),
            list_retry_config: RetryConfig::none(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch every post the directory still holds, collected and expired ones
    /// included. No pagination, no deltas.
    pub async fn list_posts(&self) -> Result<Vec<ApiPost>> {
        let url = self.list_url();

        with_retry_if(&self.list_retry_config, DirectoryError::is_transient, || async {
            let response = self.client.get(&url).send().await?;
            let response = check_status(response, "posts").await?;
            let posts: Vec<ApiPost> = response.json().await?;
            debug!("Directory returned {} posts", posts.len());
            Ok(posts)
        })
        .await
    }

    /// Transition a post to `collected`
    pub async fn mark_collected(&self, post_id: &str) -> Result<()> {
        let url = self.collected_url(post_id);

        with_retry_if(&self.retry_config, DirectoryError::is_transient, || async {
            let response = self.client.patch(&url).send().await?;
            check_status(response, post_id).await?;
            Ok(())
        })
        .await
    }

    /// Publish a new post and return it as the directory stored it
    pub async fn create_post(&self, post: &CreatePost) -> Result<ApiPost> {
        let url = self.posts_url();

        with_retry_if(&self.retry_config, DirectoryError::is_transient, || async {
            let response = self.client.post(&url).json(post).send().await?;
            let response = check_status(response, &post.title).await?;
            let created: ApiPost = response.json().await?;
            Ok(created)
        })
        .await
    }

    fn posts_url(&self) -> String {
        format!("{}/posts", self.base_url)
    }

    /// Without `include_expired` the directory returns active posts only
    fn list_url(&self) -> String {
        format!("{}/posts?include_expired=true", self.base_url)
    }

    fn collected_url(&self, post_id: &str) -> String {
        format!(
            "{}/posts/{}/collected",
            self.base_url,
            urlencoding::encode(post_id)
        )
    }
}

impl Default for ItemDirectoryClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Map non-success responses onto our error type
async fn check_status(response: reqwest::Response, subject: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body);

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(DirectoryError::NotFound(subject.to_string()));
    }

    if status == reqwest::StatusCode::BAD_REQUEST {
        return Err(DirectoryError::Rejected(detail));
    }

    Err(DirectoryError::RequestFailed {
        status: status.as_u16(),
        detail,
    })
}

/// The directory wraps error messages as `{"detail": "..."}`
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.detail)
        .unwrap_or_else(|_| body.to_string())
}

/// A post as the directory serves it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPost {
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// "active", "expired", "collected" or "removed"
    pub status: String,
    #[serde(default)]
    pub report_count: u32,
}

/// Request body for publishing a post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePost {
    pub image_base64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    pub title: String,
    pub category: String,
    pub description: String,
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: u32,
    pub latitude: f64,
    pub longitude: f64,
}

pub fn default_expiry_hours() -> u32 {
    48
}
