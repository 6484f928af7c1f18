//! External channel-data API boundary.
//!
//! The resolver only talks to [`ChannelApi`]; the production implementation
//! is [`YoutubeClient`] (YouTube Data API v3), tests use
//! `testing::MockChannelApi`.

mod client;

pub use client::{classify_error, YoutubeClient};

use async_trait::async_trait;
use thiserror::Error;

/// What to look up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelQuery {
    /// `@handle` alias, stored without the leading `@`.
    Handle(String),
    /// Legacy `/user/<name>` username.
    Username(String),
}

impl ChannelQuery {
    /// Query parameter name used by the channels endpoint.
    pub fn param(&self) -> &'static str {
        match self {
            ChannelQuery::Handle(_) => "forHandle",
            ChannelQuery::Username(_) => "forUsername",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            ChannelQuery::Handle(v) | ChannelQuery::Username(v) => v,
        }
    }
}

impl std::fmt::Display for ChannelQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelQuery::Handle(h) => write!(f, "@{}", h),
            ChannelQuery::Username(u) => write!(f, "user/{}", u),
        }
    }
}

/// Successful answer from the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelLookup {
    /// Exactly one channel matched.
    Found(String),
    NotFound,
    /// More than one channel matched.
    Ambiguous(Vec<String>),
}

/// Failed API call, classified for the credential pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The credential used is out of quota.
    #[error("quota exceeded ({reason})")]
    Quota { reason: String },

    /// 429, 5xx, network failure or unreadable response.
    #[error("transient API error: {0}")]
    Transient(String),

    #[error("API request timed out")]
    Timeout,

    /// Any other 4xx (bad key, forbidden, ...).
    #[error("API rejected request: {status} - {message}")]
    Rejected { status: u16, message: String },
}

impl ApiError {
    pub fn is_quota(&self) -> bool {
        matches!(self, ApiError::Quota { .. })
    }
}

/// Channel-data API.
#[async_trait]
pub trait ChannelApi: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Translate a handle or username into a canonical channel ID.
    async fn lookup(&self, api_key: &str, query: &ChannelQuery)
        -> Result<ChannelLookup, ApiError>;
}
