use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::parser::{error_reasons, parse_channel, parse_durations, parse_uploads_page, ResponseParseError};
use super::types::{PageCursor, PageRequest, SourceDetails, SourcePage, UploadsHandle, UpstreamAuth};
use super::SourceClient;

pub const MAX_PAGE_SIZE: u32 = 50;

const QUOTA_REASONS: [&str; 4] = [
    "quotaExceeded",
    "dailyLimitExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream quota exceeded")]
    QuotaExceeded,
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("upstream resource not found: {0}")]
    NotFound(String),
    #[error("upstream rejected request with status {0}")]
    Rejected(u16),
    #[error("malformed upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded)
    }
}

impl From<ResponseParseError> for UpstreamError {
    fn from(error: ResponseParseError) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transient(error.without_url().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_retries: usize,
}

#[derive(Debug, Clone)]
pub struct YoutubeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: usize,
}

impl YoutubeClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .pool_idle_timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            max_retries: settings.max_retries,
        })
    }

    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        auth: &UpstreamAuth,
    ) -> Result<Vec<u8>, UpstreamError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let mut request = self.http.get(&url).query(query);
        request = match auth {
            UpstreamAuth::Bearer(token) => request.bearer_auth(token),
            UpstreamAuth::ApiKey => request.query(&[("key", self.api_key.as_str())]),
        };

        let started = tokio::time::Instant::now();
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        debug!(
            endpoint,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upstream request complete"
        );

        if status.is_success() {
            return Ok(body);
        }
        Err(classify_status(status, &body, endpoint))
    }

    async fn get_with_retry(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        auth: &UpstreamAuth,
    ) -> Result<Vec<u8>, UpstreamError> {
        let mut attempt = 0_usize;
        loop {
            match self.get(endpoint, query, auth).await {
                Ok(body) => return Ok(body),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(endpoint, attempt, error = %err, "retrying upstream request");
                    tokio::time::sleep(Duration::from_millis(40 * attempt as u64)).await;
                }
            }
        }
    }

    async fn fetch_channel(
        &self,
        source_id: &str,
        part: &str,
        auth: &UpstreamAuth,
    ) -> Result<SourceDetails, UpstreamError> {
        let body = self
            .get_with_retry("channels", &[("part", part), ("id", source_id)], auth)
            .await?;
        parse_channel(&body)?.ok_or_else(|| UpstreamError::NotFound(source_id.to_string()))
    }
}

#[async_trait]
impl SourceClient for YoutubeClient {
    async fn resolve_uploads_handle(
        &self,
        source_id: &str,
        auth: &UpstreamAuth,
    ) -> Result<UploadsHandle, UpstreamError> {
        let details = self.fetch_channel(source_id, "contentDetails", auth).await?;
        Ok(details.uploads_handle)
    }

    async fn list_page(&self, request: PageRequest<'_>) -> Result<SourcePage, UpstreamError> {
        let handle = match request.handle {
            Some(handle) => handle.clone(),
            None => {
                self.resolve_uploads_handle(request.source_id, request.auth)
                    .await?
            }
        };

        let max_results = request.page_size.clamp(1, MAX_PAGE_SIZE).to_string();
        let mut query = vec![
            ("part", "snippet,contentDetails"),
            ("playlistId", handle.as_str()),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(cursor) = request.cursor {
            query.push(("pageToken", cursor.as_token()));
        }
        let body = self
            .get_with_retry("playlistItems", &query, request.auth)
            .await?;
        let page = parse_uploads_page(&body, request.source_id)?;

        let mut durations = if page.entries.is_empty() {
            Default::default()
        } else {
            let ids = page
                .entries
                .iter()
                .map(|entry| entry.id.as_str())
                .collect::<Vec<_>>()
                .join(",");
            let body = self
                .get_with_retry(
                    "videos",
                    &[("part", "contentDetails"), ("id", ids.as_str())],
                    request.auth,
                )
                .await?;
            parse_durations(&body)?
        };

        let items = page
            .entries
            .into_iter()
            .map(|entry| {
                let duration = durations.remove(&entry.id);
                entry.into_item(duration)
            })
            .collect();

        Ok(SourcePage {
            handle,
            items,
            next_cursor: page.next_page_token.map(PageCursor::new),
        })
    }

    async fn describe_source(
        &self,
        source_id: &str,
        auth: &UpstreamAuth,
    ) -> Result<SourceDetails, UpstreamError> {
        self.fetch_channel(source_id, "snippet,contentDetails", auth)
            .await
    }
}

fn classify_status(status: StatusCode, body: &[u8], endpoint: &str) -> UpstreamError {
    match status.as_u16() {
        429 => UpstreamError::QuotaExceeded,
        403 => {
            let reasons = error_reasons(body);
            if reasons
                .iter()
                .any(|reason| QUOTA_REASONS.contains(&reason.as_str()))
            {
                UpstreamError::QuotaExceeded
            } else {
                UpstreamError::Rejected(403)
            }
        }
        404 => UpstreamError::NotFound(endpoint.to_string()),
        code if code >= 500 => UpstreamError::Transient(format!("{endpoint} returned {code}")),
        code => UpstreamError::Rejected(code),
    }
}
