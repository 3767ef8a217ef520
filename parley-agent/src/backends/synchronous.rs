// ABOUTME: Synchronous backend - one request, one opaque JSON payload back.
// ABOUTME: Extracts the answer through an ordered field fallback chain; never reports progress.

use crate::backends::http;
use crate::config::{BackendKind, BackendsConfig, SynchronousConfig};
use crate::event::{ErrorCode, RawEvent};
use crate::extract::FallbackChain;
use crate::registry::BackendFactory;
use crate::traits::{AgentBackend, InvokeRequest};
use anyhow::{bail, Result};
use futures::stream::BoxStream;
use serde::Serialize;

const NAME: &str = "synchronous";

/// Text used when the payload carries no recognizable response field
pub const FALLBACK_RESPONSE: &str = "could not process request";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeBody<'a> {
    input_text: &'a str,
    session_id: &'a str,
}

/// Fields tried in order: `body.response`, then `response`
pub fn response_fields() -> FallbackChain {
    FallbackChain::new(FALLBACK_RESPONSE)
        .then("body.response")
        .then("response")
}

pub struct SynchronousBackend {
    client: reqwest::Client,
    url: String,
    fields: FallbackChain,
}

impl SynchronousBackend {
    pub fn new(config: &SynchronousConfig) -> Result<Self> {
        let function_name = config.function_name.trim();
        if function_name.is_empty() {
            bail!("synchronous backend requires 'function_name'");
        }
        let endpoint = config
            .connection
            .resolve_endpoint("lambda")
            .map_err(|e| anyhow::anyhow!("synchronous backend: {}", e))?;

        Ok(Self {
            client: http::build_client(config.connection.timeout_secs)?,
            url: format!(
                "{}/2015-03-31/functions/{}/invocations",
                endpoint, function_name
            ),
            fields: response_fields(),
        })
    }

    /// Factory function for the registry
    pub fn factory() -> BackendFactory {
        Box::new(|config: &BackendsConfig| {
            let Some(ref cfg) = config.synchronous else {
                bail!("[backends.{}] section is missing", BackendKind::Synchronous);
            };
            let backend: Box<dyn AgentBackend> = Box::new(SynchronousBackend::new(cfg)?);
            Ok(backend)
        })
    }
}

impl AgentBackend for SynchronousBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn invoke<'a>(&'a self, request: InvokeRequest<'a>) -> BoxStream<'a, RawEvent> {
        Box::pin(async_stream::stream! {
            let body = InvokeBody {
                input_text: request.utterance,
                session_id: request.session_id,
            };
            let builder = request
                .identity
                .apply(self.client.post(&self.url).json(&body));

            tracing::debug!(session_id = %request.session_id, "Invoking synchronous backend");

            let response = match http::send(NAME, builder).await {
                Ok(response) => response,
                Err(event) => {
                    yield event;
                    return;
                }
            };

            match response.bytes().await {
                Ok(payload) => {
                    yield decode_payload(&payload, &self.fields);
                }
                Err(e) => {
                    yield RawEvent::error(
                        ErrorCode::Transport,
                        format!("failed to read response: {}", e),
                    );
                }
            }
        })
    }
}

/// Decode a returned payload into the single terminal event
pub fn decode_payload(payload: &[u8], fields: &FallbackChain) -> RawEvent {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            return RawEvent::error(
                ErrorCode::Protocol,
                format!("payload is not valid UTF-8: {}", e),
            )
        }
    };

    if text.trim().is_empty() {
        return RawEvent::error(ErrorCode::Protocol, "backend returned an empty payload");
    }

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => RawEvent::Final(fields.extract(&value)),
        Err(e) => RawEvent::error(
            ErrorCode::Protocol,
            format!("payload is not valid JSON: {}", e),
        ),
    }
}
