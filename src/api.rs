use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

use crate::models::{FollowingPage, GraphUser, Mention};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {body}")]
    Api { status: StatusCode, body: String },
    #[error("Rate limited until {reset_at}")]
    Throttled { reset_at: DateTime<Utc> },
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Failed to deserialize response: {0}")]
    Deserialization(String),
}

/// Read side of the social graph used by the resolver.
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Looks up every handle in one call. Unknown handles are simply absent
    /// from the result.
    async fn lookup_users(&self, handles: &[String]) -> Result<Vec<GraphUser>, ApiError>;

    /// One page of the ids `subject` follows, starting at `cursor`.
    async fn following_page(&self, subject: &str, cursor: i64) -> Result<FollowingPage, ApiError>;
}

#[async_trait]
pub trait MentionSource: Send + Sync {
    /// Mentions newer than `since_id`, newest first.
    async fn fetch_mentions(&self, since_id: Option<&str>) -> Result<Vec<Mention>, ApiError>;
}

#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn post_reply(&self, in_reply_to: &str, text: &str) -> Result<(), ApiError>;
}
