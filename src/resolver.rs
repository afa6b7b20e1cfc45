//! Answers a parsed query by walking each subject's following list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, SocialGraph};
use crate::models::{FollowingPage, GraphUser, FIRST_CURSOR, TERMINAL_CURSOR};
use crate::query::{attach_at, ParsedQuery};
use crate::rate_limit::RateLimitCoordinator;
use crate::relationship_cache::{RelationshipCache, RelationshipKey};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("One or more of the usernames are invalid: {missing} of {total} could not be found")]
    UnresolvedHandles { missing: usize, total: usize },
    #[error("No account id was returned for {handle}")]
    MissingUserId { handle: String },
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub fn format_success_message(subject: &str, target: &str) -> String {
    format!("{} is following {}", attach_at(subject), attach_at(target))
}

pub fn format_failure_message(subject: &str, target: &str) -> String {
    format!("{} is NOT following {}", attach_at(subject), attach_at(target))
}

/// Everything fetched so far from one subject's following list.
#[derive(Debug)]
pub struct FollowingPages {
    subject: String,
    ids: HashSet<u64>,
    next_cursor: Option<i64>,
}

impl FollowingPages {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ids: HashSet::new(),
            next_cursor: None,
        }
    }

    /// True once the page with the terminal cursor has been absorbed.
    pub fn is_exhausted(&self) -> bool {
        self.next_cursor == Some(TERMINAL_CURSOR)
    }

    fn cursor(&self) -> i64 {
        self.next_cursor.unwrap_or(FIRST_CURSOR)
    }

    fn absorb(&mut self, page: FollowingPage) {
        self.ids.extend(page.ids);
        self.next_cursor = Some(page.next_cursor);
    }

    fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }
}

pub struct RelationshipResolver {
    graph: Arc<dyn SocialGraph>,
    cache: RelationshipCache,
    coordinator: Arc<RateLimitCoordinator>,
}

impl RelationshipResolver {
    pub fn new(
        graph: Arc<dyn SocialGraph>,
        cache: RelationshipCache,
        coordinator: Arc<RateLimitCoordinator>,
    ) -> Self {
        Self {
            graph,
            cache,
            coordinator,
        }
    }

    #[instrument(skip(self, query), fields(subjects = query.subjects.len(), targets = query.targets.len()))]
    pub async fn resolve(&self, query: &ParsedQuery) -> Result<String, ResolveError> {
        let handles = &query.all_handles;
        let users = self
            .coordinator
            .call_with_retry(|| self.graph.lookup_users(handles))
            .await?;

        if users.len() != handles.len() {
            let missing = handles.len().abs_diff(users.len());
            warn!(missing, total = handles.len(), "Query names unknown accounts");
            return Err(ResolveError::UnresolvedHandles {
                missing,
                total: handles.len(),
            });
        }
        let user_ids = index_user_ids(&users);

        let mut lines = Vec::with_capacity(query.subjects.len() * query.targets.len());
        for subject in &query.subjects {
            let mut pages = FollowingPages::new(subject.clone());
            for target in &query.targets {
                let target_id = lookup_id(&user_ids, target)?;
                let follows = self.resolve_pair(subject, target, target_id, &mut pages).await?;
                lines.push(if follows {
                    format_success_message(subject, target)
                } else {
                    format_failure_message(subject, target)
                });
            }
        }

        info!(verdicts = lines.len(), "Query resolved");
        Ok(lines.join("\n"))
    }

    /// Decides whether `subject` follows `target`, consulting the cache first.
    /// Pages fetched for the subject stay in `pages` for the next target.
    pub async fn resolve_pair(
        &self,
        subject: &str,
        target: &str,
        target_id: u64,
        pages: &mut FollowingPages,
    ) -> Result<bool, ResolveError> {
        let key = RelationshipKey::new(subject, target);
        if let Some(verdict) = self.cache.get(&key).await {
            debug!(subject, target, verdict, "Cache hit");
            return Ok(verdict);
        }

        let verdict = loop {
            if pages.contains(target_id) {
                break true;
            }
            if pages.is_exhausted() {
                break false;
            }
            let cursor = pages.cursor();
            let page = self
                .coordinator
                .call_with_retry(|| self.graph.following_page(&pages.subject, cursor))
                .await?;
            pages.absorb(page);
        };

        debug!(subject, target, verdict, "Resolved relationship");
        self.cache.put(key, verdict).await;
        Ok(verdict)
    }
}

fn index_user_ids(users: &[GraphUser]) -> HashMap<&str, u64> {
    users
        .iter()
        .map(|user| (user.screen_name.as_str(), user.id))
        .collect()
}

/// Exact match first; the API echoes screen names in their canonical case.
fn lookup_id(user_ids: &HashMap<&str, u64>, handle: &str) -> Result<u64, ResolveError> {
    user_ids
        .get(handle)
        .copied()
        .or_else(|| {
            user_ids
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(handle))
                .map(|(_, id)| *id)
        })
        .ok_or_else(|| ResolveError::MissingUserId {
            handle: handle.to_string(),
        })
}
