// ABOUTME: Response normalizer folding an adapter's RawEvent stream into progress and one outcome.
// ABOUTME: ProgressState is rebuilt per event and published before the next event is read.

use crate::metrics;
use futures::stream::{BoxStream, StreamExt};
use parley_agent::{ErrorCode, RawEvent};
use serde::{Deserialize, Serialize};

/// Message used when a backend ends its stream without a terminal event
pub const CLOSED_WITHOUT_RESPONSE: &str = "backend closed the stream without a response";

/// Transient, UI-facing progress for the in-flight turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub steps_completed: u32,
    pub latest_rationale: String,
}

impl ProgressState {
    /// Next state after one progress event.
    ///
    /// Empty rationale keeps the previous one.
    pub fn advance(&self, rationale: &str) -> ProgressState {
        ProgressState {
            steps_completed: self.steps_completed.saturating_add(1),
            latest_rationale: if rationale.is_empty() {
                self.latest_rationale.clone()
            } else {
                rationale.to_string()
            },
        }
    }

    pub fn is_idle(&self) -> bool {
        self.steps_completed == 0 && self.latest_rationale.is_empty()
    }
}

/// Why a turn failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl TurnFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TurnFailure {}

/// Terminal result of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed(String),
    Failed(TurnFailure),
}

/// Drive one adapter stream to its terminal outcome.
///
/// `publish` sees `{0, ""}` first, then one state per progress event in
/// emission order, and `{0, ""}` again as the last call. Nothing after the
/// first terminal event is read.
pub async fn normalize<F>(mut events: BoxStream<'_, RawEvent>, mut publish: F) -> TurnOutcome
where
    F: FnMut(&ProgressState),
{
    let mut state = ProgressState::default();
    publish(&state);

    let mut chunk_bytes = 0usize;
    let outcome = loop {
        let Some(event) = events.next().await else {
            tracing::warn!(steps = state.steps_completed, "Backend stream ended without a terminal event");
            break TurnOutcome::Failed(TurnFailure::new(ErrorCode::Protocol, CLOSED_WITHOUT_RESPONSE));
        };

        match event {
            RawEvent::Progress {
                rationale,
                is_failure,
                failure_reason,
            } => {
                state = state.advance(&rationale);
                metrics::record_progress_event();
                tracing::debug!(steps = state.steps_completed, rationale = %state.latest_rationale, "Progress");
                publish(&state);

                if is_failure {
                    let reason = failure_reason
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| "the agent reported a failure".to_string());
                    break TurnOutcome::Failed(TurnFailure::new(ErrorCode::BackendFailure, reason));
                }
            }
            RawEvent::Chunk(bytes) => {
                chunk_bytes += bytes.len();
                tracing::trace!(len = bytes.len(), total = chunk_bytes, "Chunk received");
            }
            RawEvent::Final(text) => break TurnOutcome::Completed(text),
            RawEvent::Error { code, message } => {
                break TurnOutcome::Failed(TurnFailure::new(code, message))
            }
        }
    };

    drop(events);
    publish(&ProgressState::default());
    outcome
}
