// ABOUTME: Opaque identity context handed to adapters for request authentication.
// ABOUTME: Carried through per call without inspection; secrets are redacted in Debug output.

use std::collections::BTreeMap;

/// Credentials supplied by the host for one invocation
#[derive(Clone, Default)]
pub struct IdentityContext {
    bearer_token: Option<String>,
    headers: BTreeMap<String, String>,
}

impl IdentityContext {
    /// Context that adds no authentication
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context that authenticates with a bearer token
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            headers: BTreeMap::new(),
        }
    }

    /// Attach an extra header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    /// Apply this context to an outgoing request
    pub fn apply(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

impl std::fmt::Debug for IdentityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityContext")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}
