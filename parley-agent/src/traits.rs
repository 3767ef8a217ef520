// ABOUTME: Core AgentBackend trait that every protocol adapter implements.
// ABOUTME: One invoke capability producing a lazy, finite RawEvent stream.

use crate::{IdentityContext, RawEvent};
use futures::stream::BoxStream;

/// Everything an adapter needs to process one utterance
#[derive(Debug, Clone, Copy)]
pub struct InvokeRequest<'a> {
    /// The user's utterance, already trimmed
    pub utterance: &'a str,
    /// Identifier of the active session
    pub session_id: &'a str,
    /// Opaque credentials for this call
    pub identity: &'a IdentityContext,
}

/// Core trait that all agent backends implement.
///
/// Adapters never fail out of band: transport and protocol problems are
/// reported as `RawEvent::Error` inside the returned stream. The stream is
/// finite and is consumed by a single reader; it cannot be restarted.
pub trait AgentBackend: Send + Sync {
    /// Backend name for logging and metrics
    fn name(&self) -> &'static str;

    /// Send an utterance and receive the ordered event sequence for it
    fn invoke<'a>(&'a self, request: InvokeRequest<'a>) -> BoxStream<'a, RawEvent>;
}
