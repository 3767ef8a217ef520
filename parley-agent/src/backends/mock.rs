// ABOUTME: Mock backend for testing - replays pre-configured raw event sequences.
// ABOUTME: Allows deterministic tests of normalization and the gateway without a network.
//!
//! # Example
//!
//! ```no_run
//! use parley_agent::backends::mock::MockBackend;
//! use parley_agent::{AgentBackend, IdentityContext, InvokeRequest, RawEvent};
//! use futures::StreamExt;
//!
//! # async fn example() {
//! let mock = MockBackend::new()
//!     .on_prompt("hello").respond_final("Hi there!")
//!     .on_prompt("weather").respond_with(vec![
//!         RawEvent::progress("checking the forecast"),
//!         RawEvent::Final("Sunny".to_string()),
//!     ]);
//!
//! let identity = IdentityContext::anonymous();
//! let request = InvokeRequest { utterance: "hello", session_id: "s1", identity: &identity };
//! let events: Vec<RawEvent> = mock.invoke(request).collect().await;
//! assert_eq!(events, vec![RawEvent::Final("Hi there!".to_string())]);
//! # }
//! ```

use crate::event::{ErrorCode, RawEvent};
use crate::traits::{AgentBackend, InvokeRequest};
use futures::stream::BoxStream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock backend for testing.
///
/// Clones share expectations and counters, so a test can keep one clone
/// while handing another to the code under test.
#[derive(Clone, Default)]
pub struct MockBackend {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    invocations: Arc<AtomicUsize>,
}

struct Expectation {
    pattern: String,
    delay: Option<Duration>,
    events: Vec<RawEvent>,
}

impl MockBackend {
    /// Create a new mock backend with no expectations
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up an expectation for a prompt matching the given pattern
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            backend: self,
            pattern: pattern.to_string(),
            delay: None,
        }
    }

    /// Number of times `invoke` has been called
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Expectations not yet consumed
    pub fn pending_expectations(&self) -> usize {
        self.expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn take_expectation(&self, text: &str) -> Option<(Option<Duration>, Vec<RawEvent>)> {
        // FIFO preference: check the front first, fall back to searching the
        // queue so out-of-order prompts still find their match.
        let mut exp = self.expectations.lock().unwrap_or_else(|e| e.into_inner());
        let front_matches = exp.front().is_some_and(|e| text.contains(&e.pattern));
        let found = if front_matches {
            exp.pop_front()
        } else {
            exp.iter()
                .position(|e| text.contains(&e.pattern))
                .and_then(|i| exp.remove(i))
        };
        found.map(|e| (e.delay, e.events))
    }
}

impl AgentBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn invoke<'a>(&'a self, request: InvokeRequest<'a>) -> BoxStream<'a, RawEvent> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let (delay, events) = self.take_expectation(request.utterance).unwrap_or_else(|| {
            (
                None,
                vec![RawEvent::Final(format!(
                    "Mock: no expectation for '{}'",
                    request.utterance
                ))],
            )
        });

        Box::pin(async_stream::stream! {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            for event in events {
                yield event;
            }
        })
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    backend: MockBackend,
    pattern: String,
    delay: Option<Duration>,
}

impl ExpectationBuilder {
    /// Wait before emitting the first event
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Respond with a list of events
    pub fn respond_with(self, events: Vec<RawEvent>) -> MockBackend {
        self.backend
            .expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Expectation {
                pattern: self.pattern,
                delay: self.delay,
                events,
            });
        self.backend
    }

    /// Respond with a single final answer
    pub fn respond_final(self, text: &str) -> MockBackend {
        self.respond_with(vec![RawEvent::Final(text.to_string())])
    }

    /// Respond with an error
    pub fn respond_error(self, code: ErrorCode, message: &str) -> MockBackend {
        self.respond_with(vec![RawEvent::error(code, message)])
    }
}
