//! YouTube Data API v3 client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{ApiError, ChannelApi, ChannelLookup, ChannelQuery};
use crate::config::YoutubeConfig;

/// Error reasons YouTube uses for exhausted quota.
const QUOTA_REASONS: &[&str] = &[
    "quotaExceeded",
    "dailyLimitExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
];

/// reqwest-backed YouTube client.
pub struct YoutubeClient {
    client: Client,
    base_url: String,
}

impl YoutubeClient {
    pub fn new(config: &YoutubeConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| ApiError::Transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Classify a non-success response.
pub fn classify_error(status: u16, body: &str) -> ApiError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let reasons: Vec<&str> = parsed
        .as_ref()
        .map(|e| e.error.errors.iter().map(|d| d.reason.as_str()).collect())
        .unwrap_or_default();
    let message = parsed
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());

    if status == 403 {
        if let Some(reason) = reasons.iter().find(|r| QUOTA_REASONS.contains(r)) {
            return ApiError::Quota {
                reason: reason.to_string(),
            };
        }
    }

    if status == 429 || status >= 500 {
        return ApiError::Transient(format!("HTTP {}: {}", status, message));
    }

    ApiError::Rejected { status, message }
}

fn classify_send_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transient(e.to_string())
    }
}

#[async_trait]
impl ChannelApi for YoutubeClient {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn lookup(
        &self,
        api_key: &str,
        query: &ChannelQuery,
    ) -> Result<ChannelLookup, ApiError> {
        let url = format!("{}/channels", self.base_url);

        debug!("YouTube channel lookup: {}", query);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", "id"),
                ("maxResults", "2"),
                ("key", api_key),
                (query.param(), query.value()),
            ])
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            // Unknown handles come back as 400 rather than an empty list.
            if status == StatusCode::BAD_REQUEST && matches!(query, ChannelQuery::Handle(_)) {
                return Ok(ChannelLookup::NotFound);
            }
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body));
        }

        let list: ChannelListResponse = response.json().await.map_err(|e| {
            ApiError::Transient(format!("Failed to parse channels response: {}", e))
        })?;

        let mut ids: Vec<String> = list.items.into_iter().map(|i| i.id).collect();
        Ok(match ids.len() {
            0 => ChannelLookup::NotFound,
            1 => ChannelLookup::Found(ids.remove(0)),
            _ => ChannelLookup::Ambiguous(ids),
        })
    }
}
