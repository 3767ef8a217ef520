// ABOUTME: Backend implementations, one per protocol family, plus a scripted mock.
// ABOUTME: Each backend implements the AgentBackend trait.

pub mod byte_stream;
mod http;
pub mod mock;
pub mod synchronous;
pub mod traced;
