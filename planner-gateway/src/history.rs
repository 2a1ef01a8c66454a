//! Conversation history types.
//!
//! A history log is an ordered list of [`HistoryEntry`] values; insertion
//! order is conversation order. Only the most recent [`HISTORY_LIMIT`]
//! entries survive persistence.

use serde::{Deserialize, Serialize};

/// Number of entries (user and assistant combined) kept per session.
pub const HISTORY_LIMIT: usize = 30;

/// Author of a history entry.
///
/// Role strings this service does not write itself are kept verbatim in
/// [`Role::Other`] so a load/save cycle leaves them untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    Other(String),
}

impl From<String> for Role {
    fn from(role: String) -> Self {
        match role.as_str() {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            _ => Self::Other(role),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::User => "user".to_string(),
            Role::Assistant => "assistant".to_string(),
            Role::Other(raw) => raw,
        }
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    /// Missing or `null` content loads as an empty string.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Keep only the last `limit` entries, preserving order.
pub fn truncate_history(mut history: Vec<HistoryEntry>, limit: usize) -> Vec<HistoryEntry> {
    if history.len() > limit {
        history.drain(..history.len() - limit);
    }
    history
}
