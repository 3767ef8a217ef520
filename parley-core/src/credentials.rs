// ABOUTME: Credential providers that hand an opaque identity context to backend adapters.
// ABOUTME: The gateway asks once per submit and never inspects or caches the result.

use anyhow::Result;
use async_trait::async_trait;
use parley_agent::IdentityContext;

/// Environment variable read by [`EnvCredentials`]
pub const ACCESS_TOKEN_ENV: &str = "PARLEY_ACCESS_TOKEN";

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn identity(&self) -> Result<IdentityContext>;
}

/// Always returns the same context
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    context: IdentityContext,
}

impl StaticCredentials {
    pub fn new(context: IdentityContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn identity(&self) -> Result<IdentityContext> {
        Ok(self.context.clone())
    }
}

/// Reads a bearer token from the environment on every call.
///
/// An unset or blank variable yields an anonymous context.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new() -> Self {
        Self::from_var(ACCESS_TOKEN_ENV)
    }

    pub fn from_var(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn identity(&self) -> Result<IdentityContext> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(IdentityContext::bearer(token.trim())),
            Ok(_) | Err(std::env::VarError::NotPresent) => Ok(IdentityContext::anonymous()),
            Err(e) => Err(anyhow::anyhow!("{} is not valid unicode: {}", self.var, e)),
        }
    }
}
