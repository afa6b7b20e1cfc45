use crate::api::{ApiError, MentionSource, ReplySink, SocialGraph};
use crate::config::AppSettings;
use crate::models::{FollowingPage, GraphUser, Mention, MentionsResponse, PostedStatus};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};
use url::Url;

/// Largest page the following-ids endpoint serves.
const FOLLOWING_PAGE_SIZE: &str = "5000";

/// Largest page the mentions timeline serves.
const MENTIONS_PAGE_SIZE: &str = "100";

/// Used when a 429 response carries no reset header.
const DEFAULT_THROTTLE_WINDOW_MINUTES: i64 = 15;

const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

#[derive(Debug)]
pub struct TwitterApiClient {
    client: Client,
    api_url: Url,
    api_token: String,
    bot_user_id: String,
}

impl TwitterApiClient {
    pub fn new(settings: &AppSettings) -> Result<Self, ApiError> {
        let mut api_url = Url::parse(&settings.api_url)?;
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            client,
            api_url,
            api_token: settings.api_token.clone(),
            bot_user_id: settings.bot_user_id.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.api_url.join(path)?)
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_token)
    }
}

fn reset_at_from_headers(headers: &HeaderMap) -> DateTime<Utc> {
    headers
        .get(RATE_LIMIT_RESET_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(DEFAULT_THROTTLE_WINDOW_MINUTES))
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let reset_at = reset_at_from_headers(response.headers());
        warn!(%reset_at, "API returned 429");
        return Err(ApiError::Throttled { reset_at });
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
        error!("API Error: {} - {}", status, body);
        return Err(ApiError::Api { status, body });
    }
    Ok(response)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = check_status(response).await?.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Deserialization(e.to_string()))
}

#[async_trait]
impl SocialGraph for TwitterApiClient {
    #[instrument(skip(self), fields(count = handles.len()))]
    async fn lookup_users(&self, handles: &[String]) -> Result<Vec<GraphUser>, ApiError> {
        let url = self.endpoint("1.1/users/lookup.json")?;
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, self.auth_header())
            .query(&[("screen_name", handles.join(","))])
            .send()
            .await?;

        // the lookup endpoint answers 404 when none of the handles exist
        if response.status() == StatusCode::NOT_FOUND {
            debug!("No users found for lookup");
            return Ok(Vec::new());
        }

        decode(response).await
    }

    #[instrument(skip(self))]
    async fn following_page(&self, subject: &str, cursor: i64) -> Result<FollowingPage, ApiError> {
        let url = self.endpoint("1.1/friends/ids.json")?;
        let cursor = cursor.to_string();
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, self.auth_header())
            .query(&[
                ("screen_name", subject),
                ("cursor", cursor.as_str()),
                ("count", FOLLOWING_PAGE_SIZE),
                ("stringify_ids", "false"),
            ])
            .send()
            .await?;

        let page: FollowingPage = decode(response).await?;
        debug!(
            ids = page.ids.len(),
            next_cursor = page.next_cursor,
            last = page.is_last(),
            "Fetched following page"
        );
        Ok(page)
    }
}

#[async_trait]
impl MentionSource for TwitterApiClient {
    #[instrument(skip(self))]
    async fn fetch_mentions(&self, since_id: Option<&str>) -> Result<Vec<Mention>, ApiError> {
        let url = self.endpoint(&format!("2/users/{}/mentions", self.bot_user_id))?;
        let mut collected = Vec::new();
        let mut pagination_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(url.clone())
                .header(header::AUTHORIZATION, self.auth_header())
                .query(&[("max_results", MENTIONS_PAGE_SIZE)]);
            if let Some(since_id) = since_id {
                request = request.query(&[("since_id", since_id)]);
            }
            if let Some(token) = pagination_token.as_deref() {
                request = request.query(&[("pagination_token", token)]);
            }

            let page: MentionsResponse = decode(request.send().await?).await?;
            if page.meta.result_count as usize != page.data.len() {
                return Err(ApiError::Deserialization(format!(
                    "result_count {} does not match {} mentions",
                    page.meta.result_count,
                    page.data.len()
                )));
            }
            debug!(
                count = page.data.len(),
                newest_id = ?page.meta.newest_id,
                more = page.meta.next_token.is_some(),
                "Fetched mentions page"
            );
            collected.extend(page.data);

            match page.meta.next_token {
                Some(token) => pagination_token = Some(token),
                None => break,
            }
        }

        Ok(collected)
    }
}

#[async_trait]
impl ReplySink for TwitterApiClient {
    #[instrument(skip(self, text), fields(len = text.len()))]
    async fn post_reply(&self, in_reply_to: &str, text: &str) -> Result<(), ApiError> {
        let url = self.endpoint("1.1/statuses/update.json")?;
        let response = self
            .client
            .post(url)
            .header(header::AUTHORIZATION, self.auth_header())
            .form(&[
                ("status", text),
                ("in_reply_to_status_id", in_reply_to),
                ("auto_populate_reply_metadata", "true"),
            ])
            .send()
            .await?;

        let posted: PostedStatus = decode(response).await?;
        debug!(status_id = %posted.id_str, "Reply posted");
        Ok(())
    }
}
