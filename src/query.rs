//! Turns the free text of a mention into a structured follow query.
//!
//! A query reads `<subjects> following <targets>`: the accounts on the left
//! are the ones whose following list gets searched, the accounts on the right
//! are looked for in it.

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Keyword separating subjects from targets. Matched literally and case-sensitively.
pub const DELIMITER: &str = "following";

const HANDLE_MARKER: char = '@';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Subject,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Subject => write!(f, "accounts to check"),
            Side::Target => write!(f, "accounts being followed"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("The sentence isn't properly constructed, as there are {count} followings instead of 1")]
    MalformedQuery { count: usize },
    #[error("The sentence isn't properly constructed, the {side} are missing")]
    MissingSide { side: Side },
    #[error("The sentence doesn't name any account to check")]
    EmptyQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Accounts whose following list is searched, in first-seen order
    pub subjects: Vec<String>,
    /// Accounts checked for membership, in first-seen order
    pub targets: Vec<String>,
    /// Union of both sides, each handle once
    pub all_handles: Vec<String>,
}

/// Prefixes a handle with `@` for display.
pub fn attach_at(handle: &str) -> String {
    format!("{}{}", HANDLE_MARKER, handle)
}

pub fn normalize_handle(token: &str) -> String {
    let token = token.trim();
    token
        .strip_prefix(HANDLE_MARKER)
        .unwrap_or(token)
        .trim()
        .to_string()
}

fn tokenize(side: &str) -> impl Iterator<Item = &str> {
    side.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
}

pub fn parse_query(text: &str, bot_handle: &str) -> Result<ParsedQuery, QueryError> {
    let count = text.matches(DELIMITER).count();
    if count != 1 {
        return Err(QueryError::MalformedQuery { count });
    }

    let (before, after) = text
        .split_once(DELIMITER)
        .ok_or(QueryError::MalformedQuery { count: 0 })?;

    if before.trim().is_empty() {
        return Err(QueryError::MissingSide {
            side: Side::Subject,
        });
    }
    if after.trim().is_empty() {
        return Err(QueryError::MissingSide { side: Side::Target });
    }

    let bot_handle = normalize_handle(bot_handle);
    let mut seen = HashSet::new();
    let mut all_handles = Vec::new();

    let mut collect_side = |side: &str| -> Vec<String> {
        let mut handles: Vec<String> = Vec::new();
        for handle in tokenize(side).map(normalize_handle) {
            if handle.is_empty() || handle == bot_handle {
                continue;
            }
            if seen.insert(handle.clone()) {
                all_handles.push(handle.clone());
            }
            if !handles.contains(&handle) {
                handles.push(handle);
            }
        }
        handles
    };

    let subjects = collect_side(before);
    let targets = collect_side(after);

    if all_handles.is_empty() || subjects.is_empty() || targets.is_empty() {
        return Err(QueryError::EmptyQuery);
    }

    Ok(ParsedQuery {
        subjects,
        targets,
        all_handles,
    })
}
