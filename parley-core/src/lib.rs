// ABOUTME: Conversation core for parley: sessions, durable store, normalizer and agent gateway.
// ABOUTME: Backend adapters live in parley-agent; this crate turns their events into turns.

pub mod config;
pub mod credentials;
pub mod gateway;
pub mod message;
pub mod metrics;
pub mod paths;
pub mod progress;
pub mod session;
pub mod store;

pub use config::Config;
pub use credentials::{CredentialProvider, EnvCredentials, StaticCredentials};
pub use gateway::{Gateway, GatewayUpdate, IgnoreReason, SubmitOutcome};
pub use message::{AgentIdentity, Message, Session};
pub use progress::{normalize, ProgressState, TurnFailure, TurnOutcome};
pub use session::{OpenedSession, SessionManager};
pub use store::{ConversationStore, SqliteStore};
