// ABOUTME: Byte stream backend - reads a response channel chunk by chunk until it closes.
// ABOUTME: Reassembles the UTF-8 text, then extracts the result field from the JSON envelope.

use crate::backends::http;
use crate::config::{BackendKind, BackendsConfig, ByteStreamConfig};
use crate::decode::Utf8StreamDecoder;
use crate::event::{ErrorCode, RawEvent};
use crate::extract::FallbackChain;
use crate::registry::BackendFactory;
use crate::traits::{AgentBackend, InvokeRequest};
use anyhow::{bail, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;

const NAME: &str = "byte_stream";

/// Text used when the envelope carries no result field
pub const FALLBACK_RESULT: &str = "no result returned";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeBody<'a> {
    input_text: &'a str,
    session_id: &'a str,
}

/// Fields tried in order: `<field>`, then `body.<field>`
pub fn result_fields(field: &str) -> FallbackChain {
    FallbackChain::new(FALLBACK_RESULT)
        .then(field)
        .then(&format!("body.{}", field))
}

pub struct ByteStreamBackend {
    client: reqwest::Client,
    url: String,
    fields: FallbackChain,
    progress_per_chunk: bool,
}

impl ByteStreamBackend {
    pub fn new(config: &ByteStreamConfig) -> Result<Self> {
        let function_name = config.function_name.trim();
        if function_name.is_empty() {
            bail!("byte_stream backend requires 'function_name'");
        }
        let result_field = config.result_field.trim();
        if result_field.is_empty() {
            bail!("byte_stream backend requires a non-empty 'result_field'");
        }
        let endpoint = config
            .connection
            .resolve_endpoint("lambda")
            .map_err(|e| anyhow::anyhow!("byte_stream backend: {}", e))?;

        Ok(Self {
            client: http::build_client(config.connection.timeout_secs)?,
            url: format!(
                "{}/2021-11-15/functions/{}/response-streaming-invocations",
                endpoint, function_name
            ),
            fields: result_fields(result_field),
            progress_per_chunk: config.progress_per_chunk,
        })
    }

    /// Factory function for the registry
    pub fn factory() -> BackendFactory {
        Box::new(|config: &BackendsConfig| {
            let Some(ref cfg) = config.byte_stream else {
                bail!("[backends.{}] section is missing", BackendKind::ByteStream);
            };
            let backend: Box<dyn AgentBackend> = Box::new(ByteStreamBackend::new(cfg)?);
            Ok(backend)
        })
    }
}

impl AgentBackend for ByteStreamBackend {
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

            tracing::debug!(session_id = %request.session_id, "Invoking byte stream backend");

            let response = match http::send(NAME, builder).await {
                Ok(response) => response,
                Err(event) => {
                    yield event;
                    return;
                }
            };

            let mut channel = response.bytes_stream();
            let mut decoder = Utf8StreamDecoder::new();
            let mut text = String::new();
            let mut chunks = 0usize;

            while let Some(next) = channel.next().await {
                match next {
                    Ok(chunk) => {
                        chunks += 1;
                        text.push_str(&decoder.decode(&chunk));
                        if self.progress_per_chunk {
                            yield RawEvent::progress("");
                        }
                    }
                    Err(e) => {
                        yield RawEvent::error(
                            ErrorCode::Transport,
                            format!("stream interrupted: {}", e),
                        );
                        return;
                    }
                }
            }
            let truncated = decoder.pending_len();
            text.push_str(&decoder.finish());

            tracing::debug!(chunks, bytes = text.len(), truncated, "Byte stream closed");

            yield assemble(&text, &self.fields);
        })
    }
}

/// Turn fully assembled channel text into the single terminal event.
///
/// An empty channel is an empty answer, not an error.
pub fn assemble(text: &str, fields: &FallbackChain) -> RawEvent {
    if text.trim().is_empty() {
        return RawEvent::Final(String::new());
    }

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => RawEvent::Final(fields.extract(&value)),
        Err(e) => RawEvent::error(
            ErrorCode::Protocol,
            format!("stream did not assemble into valid JSON: {}", e),
        ),
    }
}
