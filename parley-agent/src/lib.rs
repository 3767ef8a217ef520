// ABOUTME: Pluggable agent backend adapters for parley.
// ABOUTME: Maps traced-streaming, synchronous and byte-stream protocols onto one RawEvent stream.

pub mod config;
pub mod decode;
pub mod event;
pub mod extract;
pub mod identity;
pub mod registry;
pub mod traits;

pub mod backends;

pub use config::{BackendKind, BackendsConfig};
pub use event::{ErrorCode, RawEvent};
pub use identity::IdentityContext;
pub use registry::{AgentRegistry, BackendFactory};
pub use traits::{AgentBackend, InvokeRequest};
