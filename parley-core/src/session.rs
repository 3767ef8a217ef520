// ABOUTME: Session lifecycle over the conversation store: create, resume and reset.
// ABOUTME: Store failures degrade to warnings so the in-memory conversation keeps going.

use crate::message::{Message, Session};
use crate::metrics;
use crate::store::ConversationStore;
use anyhow::Result;
use std::sync::Arc;

/// A session that has just become active, with its loaded history
#[derive(Debug, Clone)]
pub struct OpenedSession {
    pub session: Session,
    pub messages: Vec<Message>,
    /// Persistence problems hit while opening; empty when fully durable
    pub warnings: Vec<String>,
}

/// Log and count a degraded-persistence condition, returning its description
pub fn persistence_warning(action: &str, session_id: Option<&str>, err: &anyhow::Error) -> String {
    metrics::record_persistence_failure();
    tracing::warn!(
        target: "persistence",
        session_id = session_id.unwrap_or("-"),
        error = %format!("{:#}", err),
        "Failed to {}",
        action
    );
    format!("Failed to {}: {:#}", action, err)
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn ConversationStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Start a fresh session with an empty durable log and mark it last-active
    pub fn create_session(&self) -> OpenedSession {
        let session = Session::generate();
        let mut warnings = Vec::new();

        if let Err(e) = self.store.initialize(&session.id) {
            warnings.push(persistence_warning("initialize session log", Some(&session.id), &e));
        }
        if let Err(e) = self.store.set_last_session_id(&session.id) {
            warnings.push(persistence_warning("record last session", Some(&session.id), &e));
        }

        tracing::info!(session_id = %session.id, "Session created");
        OpenedSession {
            session,
            messages: Vec::new(),
            warnings,
        }
    }

    /// Reopen the last active session, or create one when there is none
    pub fn resume_last_session(&self) -> OpenedSession {
        let last = match self.store.last_session_id() {
            Ok(last) => last.filter(|id| !id.trim().is_empty()),
            Err(e) => {
                let warning = persistence_warning("read last session", None, &e);
                let mut opened = self.create_session();
                opened.warnings.insert(0, warning);
                return opened;
            }
        };

        let Some(id) = last else {
            tracing::debug!("No previous session, creating one");
            return self.create_session();
        };

        let session = Session::from_id(id);
        match self.store.load(&session.id) {
            Ok(messages) => {
                tracing::info!(session_id = %session.id, messages = messages.len(), "Session resumed");
                OpenedSession {
                    session,
                    messages,
                    warnings: Vec::new(),
                }
            }
            Err(e) => {
                let warning = persistence_warning("load session history", Some(&session.id), &e);
                OpenedSession {
                    session,
                    messages: Vec::new(),
                    warnings: vec![warning],
                }
            }
        }
    }

    /// Purge every session and setting. Callers confirm with the user first.
    pub fn reset_all(&self) -> Result<()> {
        self.store.clear_all()?;
        tracing::info!("All conversation data cleared");
        Ok(())
    }
}
