//! Board API client for the Danbooru Downloader
//!
//! This module provides functionality for:
//! 1. Fetching one page of posts for a tag expression
//! 2. Fetching the total post count for a tag expression
//! 3. Retrying rate-limited and 5xx responses with exponential backoff

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::danbooru::Post;
use crate::engine::retry::{calculate_backoff, is_transient_status, retry_after};

/// Error types for the board API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} from {endpoint}")]
    Status { status: StatusCode, endpoint: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

/// Result type for board API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// A tag-queryable, paginated source of posts.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Fetch one page. Pages past the end return an empty list.
    async fn fetch_page(&self, tags: &str, page: u32, limit: u32) -> ApiResult<Vec<Post>>;

    /// Total number of posts matching `tags`.
    async fn count(&self, tags: &str) -> ApiResult<u64>;
}

/// Board account credentials
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub nickname: Option<String>,
    pub email: String,
    pub timeout: Duration,
    pub max_attempts: usize,
    pub retry_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://danbooru.donmai.us".to_string(),
            credentials: Credentials::default(),
            nickname: None,
            email: "unknown@example.com".to_string(),
            timeout: Duration::from_secs(10),
            max_attempts: 5,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// User agent the board asks API clients to send.
    pub fn user_agent(&self) -> String {
        let nickname = self
            .nickname
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| Some(self.credentials.username.as_str()).filter(|u| !u.trim().is_empty()))
            .unwrap_or("DanbooruDownloader");

        format!("{}/1.0 ({})", nickname, self.email)
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    #[serde(default)]
    counts: Counts,
}

#[derive(Debug, Deserialize, Default)]
struct Counts {
    #[serde(default)]
    posts: Option<u64>,
}

/// HTTP client for a Danbooru-compatible board
pub struct DanbooruClient {
    client: Client,
    config: ClientConfig,
}

impl DanbooruClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent())
            .timeout(config.timeout)
            .gzip(true)
            .build()?;

        debug!("Initialized board client for {}", config.base_url);

        Ok(Self { client, config })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ApiResult<T> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let mut request = self.client.get(&url).query(params);
            if self.config.credentials.is_complete() {
                request = request.basic_auth(
                    &self.config.credentials.username,
                    Some(&self.config.credentials.api_key),
                );
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("Request error on {}: {}", endpoint, e);
                    if attempts >= max_attempts {
                        return Err(ApiError::Request(e));
                    }
                    sleep(calculate_backoff(attempts, self.config.retry_backoff)).await;
                    continue;
                }
            };

            let status = response.status();
            if is_transient_status(status) {
                if attempts >= max_attempts {
                    return Err(ApiError::Status { status, endpoint: endpoint.to_string() });
                }
                let delay = retry_after(response.headers())
                    .unwrap_or_else(|| calculate_backoff(attempts, self.config.retry_backoff));
                warn!(
                    "{} returned {}, retry {}/{} in {}ms",
                    endpoint,
                    status,
                    attempts,
                    max_attempts - 1,
                    delay.as_millis()
                );
                sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                return Err(ApiError::Status { status, endpoint: endpoint.to_string() });
            }

            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()));
        }
    }
}

#[async_trait]
impl PostSource for DanbooruClient {
    #[instrument(skip(self), fields(base_url = %self.config.base_url))]
    async fn fetch_page(&self, tags: &str, page: u32, limit: u32) -> ApiResult<Vec<Post>> {
        let params = [
            ("tags", tags.to_string()),
            ("limit", limit.to_string()),
            ("page", page.to_string()),
        ];
        let posts: Vec<Post> = self.get_json("/posts.json", &params).await?;
        debug!("Fetched {} posts", posts.len());
        Ok(posts)
    }

    #[instrument(skip(self))]
    async fn count(&self, tags: &str) -> ApiResult<u64> {
        let params = [("tags", tags.to_string())];
        let response: CountResponse = self.get_json("/counts/posts.json", &params).await?;
        Ok(response.counts.posts.unwrap_or(0))
    }
}

/// Normalise a user-entered tag expression.
///
/// Trims and lower-cases; with safe search the `is:sfw` tag is appended once.
pub fn normalize_query(raw: &str, safe_search: bool) -> String {
    let mut query = raw.trim().to_lowercase();
    if safe_search && !query.split_whitespace().any(|t| t == "is:sfw") {
        if !query.is_empty() {
            query.push(' ');
        }
        query.push_str("is:sfw");
    }
    query
}
