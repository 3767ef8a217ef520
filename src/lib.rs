// ABOUTME: Library surface of the parley terminal client.
// ABOUTME: Re-exports the agent and core crates alongside the chat loop and its rendering.

pub mod render;
pub mod repl;

pub use parley_agent;
pub use parley_core;

pub use parley_core::{Config, Gateway, GatewayUpdate, SubmitOutcome};
