// ABOUTME: Agent gateway orchestrating one turn at a time: session, adapter, normalizer, store.
// ABOUTME: Every failure becomes an agent message; live state is published over a broadcast channel.

use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::message::{AgentIdentity, Message, Session};
use crate::metrics;
use crate::progress::{normalize, ProgressState, TurnFailure, TurnOutcome};
use crate::session::{persistence_warning, OpenedSession, SessionManager};
use crate::store::ConversationStore;
use anyhow::{bail, Result};
use parley_agent::{AgentBackend, AgentRegistry, ErrorCode, InvokeRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// First sentence of every synthesized failure reply
pub const FAILURE_PREFIX: &str = "Sorry, something went wrong while processing your request.";

const UNCONFIGURED_BACKEND: &str = "unconfigured";

/// Render a failure as the text of an agent message
pub fn failure_text(failure: &TurnFailure) -> String {
    format!("{}\n\n*{}*", FAILURE_PREFIX, failure.message)
}

/// Live state changes, sent in causal order
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayUpdate {
    MessageAppended(Message),
    /// An optimistic user message was withdrawn because its turn was abandoned
    MessageRetracted(Message),
    Progress(ProgressState),
    InFlight(bool),
    SessionChanged(Session),
    /// All data was purged; no session is active and the message list is empty
    SessionCleared,
    PersistenceDegraded(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyUtterance,
    NoActiveSession,
    TurnInFlight,
}

/// What a call to [`Gateway::submit`] did
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Ignored(IgnoreReason),
    Completed { reply: Message },
    Failed { reply: Message, failure: TurnFailure },
}

impl SubmitOutcome {
    pub fn reply(&self) -> Option<&Message> {
        match self {
            Self::Ignored(_) => None,
            Self::Completed { reply } | Self::Failed { reply, .. } => Some(reply),
        }
    }
}

struct ConversationState {
    session: Option<Session>,
    messages: Vec<Message>,
    progress: ProgressState,
    opened_at: Instant,
}

impl ConversationState {
    fn is_active(&self, session_id: &str) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session_id)
    }
}

/// Clears the in-flight flag when the turn ends, even if the future is dropped.
///
/// Until the turn is settled the optimistic user message is not durable; an
/// abandoned turn takes it back out of the in-memory list.
struct InFlightGuard<'a> {
    gateway: &'a Gateway,
    session_id: &'a str,
    pending: Option<Message>,
}

impl InFlightGuard<'_> {
    fn settle(&mut self) {
        self.pending = None;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(message) = self.pending.take() {
            let retracted = {
                let mut state = self.gateway.lock_state();
                let is_last = state.messages.last() == Some(&message);
                if state.is_active(self.session_id) && is_last {
                    state.messages.pop();
                    state.progress = ProgressState::default();
                    true
                } else {
                    false
                }
            };
            tracing::info!(session_id = %self.session_id, "Turn abandoned before completion");
            if retracted {
                self.gateway.publish(GatewayUpdate::MessageRetracted(message));
                self.gateway
                    .publish(GatewayUpdate::Progress(ProgressState::default()));
            }
        }
        self.gateway.in_flight.store(false, Ordering::SeqCst);
        self.gateway.publish(GatewayUpdate::InFlight(false));
    }
}

pub struct Gateway {
    backend: std::result::Result<Box<dyn AgentBackend>, String>,
    identity: AgentIdentity,
    credentials: Arc<dyn CredentialProvider>,
    sessions: SessionManager,
    session_debounce: Duration,
    state: Mutex<ConversationState>,
    in_flight: AtomicBool,
    updates: broadcast::Sender<GatewayUpdate>,
}

impl Gateway {
    /// Gateway over an already constructed backend
    pub fn new(
        backend: Box<dyn AgentBackend>,
        identity: AgentIdentity,
        store: Arc<dyn ConversationStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::assemble(Ok(backend), identity, store, credentials)
    }

    /// Resolve the backend from configuration once.
    ///
    /// A configuration problem does not prevent construction: every submit
    /// then answers with a message naming the problem.
    pub fn from_config(
        config: &Config,
        registry: &AgentRegistry,
        store: Arc<dyn ConversationStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let identity = match config.backends.select() {
            Ok(kind) => AgentIdentity::new(config.backends.display_name(kind)),
            Err(_) => AgentIdentity::new(parley_agent::config::DEFAULT_DISPLAY_NAME),
        };

        let backend = registry.create_selected(&config.backends).map_err(|e| {
            let message = format!("backend configuration error: {:#}", e);
            tracing::error!(error = %message, "No usable backend");
            message
        });
        if let Ok(ref backend) = backend {
            tracing::info!(backend = backend.name(), agent = %identity.display_name, "Backend ready");
        }

        Self::assemble(backend, identity, store, credentials)
            .with_session_debounce(config.session_debounce())
            .with_update_capacity(config.gateway.update_capacity)
    }

    fn assemble(
        backend: std::result::Result<Box<dyn AgentBackend>, String>,
        identity: AgentIdentity,
        store: Arc<dyn ConversationStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (updates, _) = broadcast::channel(crate::config::DEFAULT_UPDATE_CAPACITY);
        Self {
            backend,
            identity,
            credentials,
            sessions: SessionManager::new(store),
            session_debounce: Duration::from_millis(750),
            state: Mutex::new(ConversationState {
                session: None,
                messages: Vec::new(),
                progress: ProgressState::default(),
                opened_at: Instant::now(),
            }),
            in_flight: AtomicBool::new(false),
            updates,
        }
    }

    pub fn with_session_debounce(mut self, debounce: Duration) -> Self {
        self.session_debounce = debounce;
        self
    }

    /// Size of the update buffer kept for each subscriber.
    ///
    /// A subscriber that falls further behind than this sees
    /// `RecvError::Lagged` and loses the oldest updates. Replaces the
    /// channel, so call it before anyone subscribes.
    pub fn with_update_capacity(mut self, capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        self.updates = updates;
        self
    }

    /// Live updates; see [`Gateway::with_update_capacity`] for the buffer bound
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayUpdate> {
        self.updates.subscribe()
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Ok(backend) => backend.name(),
            Err(_) => UNCONFIGURED_BACKEND,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock_state().messages.clone()
    }

    pub fn progress(&self) -> ProgressState {
        self.lock_state().progress.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn active_session(&self) -> Option<Session> {
        self.lock_state().session.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, update: GatewayUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    /// Start a new session.
    ///
    /// Returns the current session unchanged while a turn is in flight, or
    /// when it is still empty and younger than the debounce window.
    pub fn create_session(&self) -> Session {
        let mut state = self.lock_state();
        if let Some(current) = state.session.clone() {
            if self.is_in_flight() {
                tracing::info!(session_id = %current.id, "Ignoring new session while a turn is in flight");
                return current;
            }
            if state.messages.is_empty() && state.opened_at.elapsed() < self.session_debounce {
                tracing::debug!(session_id = %current.id, "Reusing fresh empty session");
                return current;
            }
        }

        let opened = self.sessions.create_session();
        self.activate(&mut state, opened)
    }

    /// Reopen the last active session, creating one when there is none
    pub fn resume_last_session(&self) -> Session {
        let mut state = self.lock_state();
        if let Some(current) = state.session.clone() {
            if self.is_in_flight() {
                tracing::info!(session_id = %current.id, "Ignoring resume while a turn is in flight");
                return current;
            }
        }

        let opened = self.sessions.resume_last_session();
        self.activate(&mut state, opened)
    }

    /// Purge all durable state and leave no session active
    pub fn reset_all(&self) -> Result<()> {
        let mut state = self.lock_state();
        if self.is_in_flight() {
            bail!("cannot reset while a turn is in flight");
        }

        self.sessions.reset_all()?;
        state.session = None;
        state.messages.clear();
        state.progress = ProgressState::default();
        drop(state);

        self.publish(GatewayUpdate::SessionCleared);
        self.publish(GatewayUpdate::Progress(ProgressState::default()));
        Ok(())
    }

    fn activate(&self, state: &mut ConversationState, opened: OpenedSession) -> Session {
        let OpenedSession {
            session,
            messages,
            warnings,
        } = opened;

        state.session = Some(session.clone());
        state.messages = messages;
        state.progress = ProgressState::default();
        state.opened_at = Instant::now();

        self.publish(GatewayUpdate::SessionChanged(session.clone()));
        for warning in warnings {
            self.publish(GatewayUpdate::PersistenceDegraded(warning));
        }
        session
    }

    /// Run one turn to completion.
    ///
    /// Blank utterances, a missing session and overlapping calls are no-ops.
    pub async fn submit(&self, utterance: &str) -> SubmitOutcome {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return SubmitOutcome::Ignored(IgnoreReason::EmptyUtterance);
        }

        let user_message = Message::user(utterance);
        let session = {
            let mut state = self.lock_state();
            let Some(session) = state.session.clone() else {
                return SubmitOutcome::Ignored(IgnoreReason::NoActiveSession);
            };
            if self
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::debug!(session_id = %session.id, "Turn already in flight, ignoring submit");
                return SubmitOutcome::Ignored(IgnoreReason::TurnInFlight);
            }
            state.messages.push(user_message.clone());
            session
        };
        let mut guard = InFlightGuard {
            gateway: self,
            session_id: &session.id,
            pending: Some(user_message.clone()),
        };
        self.publish(GatewayUpdate::InFlight(true));
        self.publish(GatewayUpdate::MessageAppended(user_message.clone()));

        let started = Instant::now();
        tracing::info!(session_id = %session.id, backend = self.backend_name(), "Turn started");
        tracing::debug!(session_id = %session.id, utterance = %utterance, "User utterance");

        let outcome = self.run_turn(utterance, &session).await;
        guard.settle();
        let (reply, failure) = match outcome {
            TurnOutcome::Completed(text) => (Message::agent(&self.identity, text), None),
            TurnOutcome::Failed(failure) => {
                tracing::warn!(
                    session_id = %session.id,
                    code = %failure.code,
                    error = %failure.message,
                    "Turn failed"
                );
                (
                    Message::agent(&self.identity, failure_text(&failure)),
                    Some(failure),
                )
            }
        };

        if let Err(e) = self
            .sessions
            .store()
            .append(&session.id, &[user_message, reply.clone()])
        {
            let warning = persistence_warning("store turn", Some(&session.id), &e);
            self.publish(GatewayUpdate::PersistenceDegraded(warning));
        }

        let still_active = {
            let mut state = self.lock_state();
            let active = state.is_active(&session.id);
            if active {
                state.messages.push(reply.clone());
                state.progress = ProgressState::default();
            }
            active
        };
        if still_active {
            self.publish(GatewayUpdate::MessageAppended(reply.clone()));
        }

        let elapsed = started.elapsed();
        metrics::record_turn_duration(self.backend_name(), elapsed);
        metrics::record_turn(if failure.is_some() { "failed" } else { "completed" });
        tracing::info!(
            session_id = %session.id,
            elapsed_ms = elapsed.as_millis() as u64,
            ok = failure.is_none(),
            "Turn finished"
        );

        match failure {
            None => SubmitOutcome::Completed { reply },
            Some(failure) => SubmitOutcome::Failed { reply, failure },
        }
    }

    async fn run_turn(&self, utterance: &str, session: &Session) -> TurnOutcome {
        let backend = match &self.backend {
            Ok(backend) => backend,
            Err(message) => {
                return TurnOutcome::Failed(TurnFailure::new(ErrorCode::Configuration, message.clone()))
            }
        };

        let identity = match self.credentials.identity().await {
            Ok(identity) => identity,
            Err(e) => {
                return TurnOutcome::Failed(TurnFailure::new(
                    ErrorCode::AuthFailed,
                    format!("could not obtain credentials: {:#}", e),
                ))
            }
        };

        let events = backend.invoke(InvokeRequest {
            utterance,
            session_id: &session.id,
            identity: &identity,
        });

        normalize(events, |progress| {
            {
                let mut state = self.lock_state();
                if state.is_active(&session.id) {
                    state.progress = progress.clone();
                }
            }
            self.publish(GatewayUpdate::Progress(progress.clone()));
        })
        .await
    }
}
