use serde::{Deserialize, Serialize};

/// Account record returned by the batch user lookup.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GraphUser {
    pub id: u64,
    pub screen_name: String,
}

/// One page of the accounts a user follows.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FollowingPage {
    pub ids: Vec<u64>,
    pub next_cursor: i64,
}

impl FollowingPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor == TERMINAL_CURSOR
    }
}

/// Cursor sent for the first page of a following list.
pub const FIRST_CURSOR: i64 = -1;
/// Cursor value meaning there are no more pages.
pub const TERMINAL_CURSOR: i64 = 0;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Mention {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MentionsMeta {
    pub result_count: u32,
    pub newest_id: Option<String>,
    // present while older pages remain
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MentionsResponse {
    // absent when result_count is zero
    #[serde(default)]
    pub data: Vec<Mention>,
    pub meta: MentionsMeta,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostedStatus {
    pub id_str: String,
}

/// A single inbound mention handed to the batch processor.
#[derive(Debug, Clone, PartialEq)]
pub struct MentionTask {
    pub id: String,
    pub text: String,
}

impl From<Mention> for MentionTask {
    fn from(mention: Mention) -> Self {
        Self {
            id: mention.id,
            text: mention.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Succeeded(String),
    Failed(String),
}

/// The single result produced for one [`MentionTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionOutcome {
    pub id: String,
    pub status: OutcomeStatus,
}

impl MentionOutcome {
    pub fn message(&self) -> &str {
        match &self.status {
            OutcomeStatus::Succeeded(message) | OutcomeStatus::Failed(message) => message,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded(_))
    }
}
