// ABOUTME: Traced streaming backend - invokes an agent alias with tracing enabled.
// ABOUTME: Parses newline-delimited trace and chunk records into progress, chunk and final events.

use crate::backends::http;
use crate::config::{BackendKind, BackendsConfig, TracedStreamingConfig};
use crate::event::{ErrorCode, RawEvent};
use crate::registry::BackendFactory;
use crate::traits::{AgentBackend, InvokeRequest};
use anyhow::{bail, Result};
use base64::Engine;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

const NAME: &str = "traced_streaming";
const DEFAULT_FAILURE_REASON: &str = "the agent reported a failure";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeBody<'a> {
    input_text: &'a str,
    enable_trace: bool,
}

/// One line of the response stream
#[derive(Debug, Deserialize)]
struct StreamRecord {
    chunk: Option<ChunkRecord>,
    trace: Option<TraceEnvelope>,
}

#[derive(Debug, Deserialize)]
struct ChunkRecord {
    /// Base64-encoded text bytes
    #[serde(default)]
    bytes: String,
}

#[derive(Debug, Deserialize)]
struct TraceEnvelope {
    #[serde(default)]
    trace: TraceBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraceBody {
    orchestration_trace: Option<OrchestrationTrace>,
    failure_trace: Option<FailureTrace>,
}

#[derive(Debug, Deserialize)]
struct OrchestrationTrace {
    rationale: Option<Rationale>,
}

#[derive(Debug, Deserialize)]
struct Rationale {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailureTrace {
    failure_reason: Option<String>,
}

pub struct TracedStreamingBackend {
    client: reqwest::Client,
    endpoint: String,
    agent_id: String,
    alias_id: String,
}

impl TracedStreamingBackend {
    pub fn new(config: &TracedStreamingConfig) -> Result<Self> {
        if config.agent_id.trim().is_empty() {
            bail!("traced_streaming backend requires 'agent_id'");
        }
        if config.alias_id.trim().is_empty() {
            bail!("traced_streaming backend requires 'alias_id'");
        }
        let endpoint = config
            .connection
            .resolve_endpoint("bedrock-agent-runtime")
            .map_err(|e| anyhow::anyhow!("traced_streaming backend: {}", e))?;

        Ok(Self {
            client: http::build_client(config.connection.timeout_secs)?,
            endpoint,
            agent_id: config.agent_id.trim().to_string(),
            alias_id: config.alias_id.trim().to_string(),
        })
    }

    /// Factory function for the registry
    pub fn factory() -> BackendFactory {
        Box::new(|config: &BackendsConfig| {
            let Some(ref cfg) = config.traced_streaming else {
                bail!("[backends.{}] section is missing", BackendKind::TracedStreaming);
            };
            let backend: Box<dyn AgentBackend> = Box::new(TracedStreamingBackend::new(cfg)?);
            Ok(backend)
        })
    }

    fn url(&self, session_id: &str) -> String {
        format!(
            "{}/agents/{}/agentAliases/{}/sessions/{}/text",
            self.endpoint, self.agent_id, self.alias_id, session_id
        )
    }
}

impl AgentBackend for TracedStreamingBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn invoke<'a>(&'a self, request: InvokeRequest<'a>) -> BoxStream<'a, RawEvent> {
        Box::pin(async_stream::stream! {
            let body = InvokeBody {
                input_text: request.utterance,
                enable_trace: true,
            };
            let builder = request
                .identity
                .apply(self.client.post(self.url(request.session_id)).json(&body));

            tracing::debug!(session_id = %request.session_id, "Invoking traced streaming agent");

            let response = match http::send(NAME, builder).await {
                Ok(response) => response,
                Err(event) => {
                    yield event;
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut framer = LineFramer::default();
            let mut text = Vec::new();
            let mut finished = false;

            while !finished {
                let lines = match body.next().await {
                    Some(Ok(chunk)) => framer.push(&chunk),
                    Some(Err(e)) => {
                        yield RawEvent::error(
                            ErrorCode::Transport,
                            format!("stream interrupted: {}", e),
                        );
                        return;
                    }
                    None => {
                        finished = true;
                        framer.finish().into_iter().collect()
                    }
                };

                for line in lines {
                    let events = match parse_record(&line) {
                        Ok(events) => events,
                        Err(message) => {
                            yield RawEvent::error(ErrorCode::Protocol, message);
                            return;
                        }
                    };
                    for event in events {
                        if let RawEvent::Chunk(ref bytes) = event {
                            text.extend_from_slice(bytes);
                        }
                        let fatal = matches!(event, RawEvent::Error { .. });
                        yield event;
                        if fatal {
                            return;
                        }
                    }
                }
            }

            yield RawEvent::Final(String::from_utf8_lossy(&text).into_owned());
        })
    }
}

/// Map one newline-delimited record onto raw events
fn parse_record(line: &[u8]) -> std::result::Result<Vec<RawEvent>, String> {
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }

    let record: StreamRecord = serde_json::from_slice(line)
        .map_err(|e| format!("malformed stream record: {}", e))?;

    let mut events = Vec::new();

    if let Some(trace) = record.trace {
        if let Some(failure) = trace.trace.failure_trace {
            let reason = failure
                .failure_reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
            tracing::warn!(reason = %reason, "Agent emitted failure trace");
            events.push(RawEvent::failure(reason.clone()));
            events.push(RawEvent::error(ErrorCode::BackendFailure, reason));
            return Ok(events);
        }

        let rationale = trace
            .trace
            .orchestration_trace
            .and_then(|o| o.rationale)
            .map(|r| r.text)
            .unwrap_or_default();
        events.push(RawEvent::progress(rationale));
    }

    if let Some(chunk) = record.chunk {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(chunk.bytes.trim())
            .map_err(|e| format!("chunk is not valid base64: {}", e))?;
        events.push(RawEvent::Chunk(bytes));
    }

    if events.is_empty() {
        tracing::debug!("Ignoring stream record without trace or chunk");
    }

    Ok(events)
}

/// Splits a byte stream into newline-terminated records
#[derive(Debug, Default)]
struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}
