// ABOUTME: Conversation data model: messages, sessions and the agent's display identity.
// ABOUTME: Messages are immutable once stored; sessions are superseded, never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender identity used for the end user's messages
pub const USER_SENDER: &str = parley_agent::config::USER_SENDER;

/// One stored utterance; order is the store's append order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub sender: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: USER_SENDER.to_string(),
        }
    }

    pub fn agent(identity: &AgentIdentity, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: identity.display_name.clone(),
        }
    }

    pub fn is_from_user(&self) -> bool {
        self.sender == USER_SENDER
    }
}

/// A conversation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Fresh session with a time-ordered, random-suffixed id (UUID v7)
    pub fn generate() -> Self {
        let id = Uuid::now_v7();
        Self {
            created_at: creation_time(&id).unwrap_or_else(Utc::now),
            id: id.hyphenated().to_string(),
        }
    }

    /// Rebuild a session from a stored id, recovering its creation time when possible
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let created_at = Uuid::parse_str(&id)
            .ok()
            .and_then(|uuid| creation_time(&uuid))
            .unwrap_or_else(Utc::now);
        Self { id, created_at }
    }
}

fn creation_time(id: &Uuid) -> Option<DateTime<Utc>> {
    if id.get_version_num() != 7 {
        return None;
    }
    let (secs, nanos) = id.get_timestamp()?.to_unix();
    DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
}

/// How the agent is shown in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub display_name: String,
}

impl AgentIdentity {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
        }
    }
}
