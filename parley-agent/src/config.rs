// ABOUTME: Backend configuration for the three protocol adapters.
// ABOUTME: Resolves exactly one BackendKind by fixed precedence, once, at startup.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Display name used when the selected backend does not configure one
pub const DEFAULT_DISPLAY_NAME: &str = "Agent";

/// Sender name of the end user; never usable as an agent display name
pub const USER_SENDER: &str = "user";

/// The protocol family a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Streaming call with interleaved trace records and text chunks
    TracedStreaming,
    /// Single request/response returning one opaque payload
    Synchronous,
    /// Byte channel reassembled into a JSON envelope
    ByteStream,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TracedStreaming => "traced_streaming",
            Self::Synchronous => "synchronous",
            Self::ByteStream => "byte_stream",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traced_streaming" | "traced" => Ok(Self::TracedStreaming),
            "synchronous" | "sync" => Ok(Self::Synchronous),
            "byte_stream" | "stream" => Ok(Self::ByteStream),
            _ => bail!("Unknown backend kind: {}", s),
        }
    }
}

/// Connection parameters shared by every backend section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL; derived from `region` when omitted
    pub endpoint: Option<String>,
    /// Service region used to derive the endpoint
    pub region: Option<String>,
    /// Name shown for the agent's messages
    pub display_name: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: None,
            display_name: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_result_field() -> String {
    "result".to_string()
}

impl ConnectionConfig {
    /// Base URL without a trailing slash.
    ///
    /// `service` names the regional host family, e.g. `lambda`.
    pub fn resolve_endpoint(&self, service: &str) -> Result<String> {
        if let Some(endpoint) = self.endpoint.as_deref().map(str::trim) {
            if !endpoint.is_empty() {
                return Ok(endpoint.trim_end_matches('/').to_string());
            }
        }
        match self.region.as_deref().map(str::trim) {
            Some(region) if !region.is_empty() => {
                Ok(format!("https://{}.{}.amazonaws.com", service, region))
            }
            _ => bail!("either 'endpoint' or 'region' must be set"),
        }
    }
}

/// `[backends.traced_streaming]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracedStreamingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub alias_id: String,
}

/// `[backends.synchronous]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchronousConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub function_name: String,
}

/// `[backends.byte_stream]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByteStreamConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub function_name: String,
    /// Field of the assembled JSON envelope holding the answer
    #[serde(default = "default_result_field")]
    pub result_field: String,
    /// Emit an informational progress event for every received chunk
    #[serde(default)]
    pub progress_per_chunk: bool,
}

impl Default for TracedStreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connection: ConnectionConfig::default(),
            agent_id: String::new(),
            alias_id: String::new(),
        }
    }
}

impl Default for SynchronousConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connection: ConnectionConfig::default(),
            function_name: String::new(),
        }
    }
}

impl Default for ByteStreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connection: ConnectionConfig::default(),
            function_name: String::new(),
            result_field: default_result_field(),
            progress_per_chunk: false,
        }
    }
}

/// `[backends]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traced_streaming: Option<TracedStreamingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronous: Option<SynchronousConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_stream: Option<ByteStreamConfig>,
}

impl BackendsConfig {
    /// Pick the active backend.
    ///
    /// ByteStream wins over Synchronous, which wins over the TracedStreaming
    /// default. TracedStreaming is selected even without a section unless it
    /// is explicitly disabled.
    pub fn select(&self) -> Result<BackendKind> {
        if self.byte_stream.as_ref().is_some_and(|c| c.enabled) {
            return Ok(BackendKind::ByteStream);
        }
        if self.synchronous.as_ref().is_some_and(|c| c.enabled) {
            return Ok(BackendKind::Synchronous);
        }
        match self.traced_streaming {
            Some(ref traced) if !traced.enabled => {
                bail!("no backend is enabled; enable one of [backends.*]")
            }
            _ => Ok(BackendKind::TracedStreaming),
        }
    }

    /// Connection section for a backend, if configured
    pub fn connection(&self, kind: BackendKind) -> Option<&ConnectionConfig> {
        match kind {
            BackendKind::TracedStreaming => self.traced_streaming.as_ref().map(|c| &c.connection),
            BackendKind::Synchronous => self.synchronous.as_ref().map(|c| &c.connection),
            BackendKind::ByteStream => self.byte_stream.as_ref().map(|c| &c.connection),
        }
    }

    pub fn connection_mut(&mut self, kind: BackendKind) -> Option<&mut ConnectionConfig> {
        match kind {
            BackendKind::TracedStreaming => {
                self.traced_streaming.as_mut().map(|c| &mut c.connection)
            }
            BackendKind::Synchronous => self.synchronous.as_mut().map(|c| &mut c.connection),
            BackendKind::ByteStream => self.byte_stream.as_mut().map(|c| &mut c.connection),
        }
    }

    /// Display name for a backend's messages.
    ///
    /// Blank names and the reserved user sender fall back to the default.
    pub fn display_name(&self, kind: BackendKind) -> String {
        let configured = self
            .connection(kind)
            .and_then(|c| c.display_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty());

        match configured {
            Some(name) if name.eq_ignore_ascii_case(USER_SENDER) => {
                tracing::warn!(
                    backend = %kind,
                    display_name = %name,
                    "Display name is reserved for the user, using {}",
                    DEFAULT_DISPLAY_NAME
                );
                DEFAULT_DISPLAY_NAME.to_string()
            }
            Some(name) => name.to_string(),
            None => DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> BackendsConfig {
        #[derive(Deserialize)]
        struct Wrapper {
            backends: BackendsConfig,
        }
        toml::from_str::<Wrapper>(toml_str).unwrap().backends
    }

    #[test]
    fn test_default_selects_traced_streaming() {
        let config = BackendsConfig::default();
        assert_eq!(config.select().unwrap(), BackendKind::TracedStreaming);
    }

    #[test]
    fn test_byte_stream_beats_synchronous() {
        let config = parse(
            r#"
[backends.traced_streaming]
region = "us-east-1"
agent_id = "A1"
alias_id = "B1"

[backends.synchronous]
enabled = true
region = "us-east-1"
function_name = "chat"

[backends.byte_stream]
enabled = true
endpoint = "http://localhost:9000"
function_name = "chat-stream"
"#,
        );
        assert_eq!(config.select().unwrap(), BackendKind::ByteStream);
    }

    #[test]
    fn test_synchronous_beats_traced() {
        let config = parse(
            r#"
[backends.synchronous]
enabled = true
endpoint = "http://localhost:9000"
function_name = "chat"
display_name = "Helper"
"#,
        );
        assert_eq!(config.select().unwrap(), BackendKind::Synchronous);
        assert_eq!(config.display_name(BackendKind::Synchronous), "Helper");
    }

    #[test]
    fn test_present_but_disabled_section_is_skipped() {
        let config = parse(
            r#"
[backends.byte_stream]
function_name = "chat-stream"
endpoint = "http://localhost:9000"
"#,
        );
        assert_eq!(config.select().unwrap(), BackendKind::TracedStreaming);
        let byte_stream = config.byte_stream.unwrap();
        assert_eq!(byte_stream.result_field, "result");
        assert!(!byte_stream.progress_per_chunk);
        assert_eq!(byte_stream.connection.timeout_secs, 120);
    }

    #[test]
    fn test_everything_disabled_is_an_error() {
        let config = parse(
            r#"
[backends.traced_streaming]
enabled = false
"#,
        );
        assert!(config.select().is_err());
    }

    #[test]
    fn test_display_name_defaults() {
        let config = BackendsConfig::default();
        assert_eq!(config.display_name(BackendKind::TracedStreaming), "Agent");
    }

    #[test]
    fn test_reserved_user_display_name_is_replaced() {
        for name in ["user", " User "] {
            let config = BackendsConfig {
                traced_streaming: Some(TracedStreamingConfig {
                    connection: ConnectionConfig {
                        display_name: Some(name.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                ..Default::default()
            };
            assert_eq!(
                config.display_name(BackendKind::TracedStreaming),
                DEFAULT_DISPLAY_NAME
            );
        }
    }

    #[test]
    fn test_endpoint_from_region() {
        let conn = ConnectionConfig {
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        };
        assert_eq!(
            conn.resolve_endpoint("lambda").unwrap(),
            "https://lambda.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn test_explicit_endpoint_trims_slash() {
        let conn = ConnectionConfig {
            endpoint: Some("http://localhost:8080/".to_string()),
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        };
        assert_eq!(conn.resolve_endpoint("lambda").unwrap(), "http://localhost:8080");
    }

    #[test]
    fn test_missing_endpoint_and_region_errors() {
        let conn = ConnectionConfig::default();
        assert!(conn.resolve_endpoint("lambda").is_err());
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("sync".parse::<BackendKind>().unwrap(), BackendKind::Synchronous);
        assert_eq!(
            "byte_stream".parse::<BackendKind>().unwrap(),
            BackendKind::ByteStream
        );
        assert!("carrier-pigeon".parse::<BackendKind>().is_err());
    }
}
