//! Static bearer-token identity provider.

use std::collections::HashMap;

use async_trait::async_trait;

use ingestd_core::auth::{IdentityProvider, Principal};
use ingestd_core::error::{Error, Result};

/// Identity provider backed by a fixed token table.
///
/// Tokens come from the `API_TOKENS` environment variable as a
/// comma-separated list of `token:name` or `token:name:admin` entries, e.g.
///
/// ```text
/// API_TOKENS=s3cr3t:alice,0psk3y:ops:admin
/// ```
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `API_TOKENS` environment variable. Missing or empty means
    /// no token is accepted.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var("API_TOKENS").unwrap_or_default();
        Self::parse(&raw)
    }

    fn parse(raw: &str) -> Result<Self> {
        let mut provider = Self::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.split(':');
            let token = parts.next().unwrap_or_default();
            let name = parts.next().unwrap_or_default();
            if token.is_empty() || name.is_empty() {
                return Err(Error::Config(format!(
                    "malformed API_TOKENS entry: {entry:?} (expected token:name[:admin])"
                )));
            }
            let principal = match parts.next() {
                Some("admin") => Principal::admin(name),
                Some(other) => {
                    return Err(Error::Config(format!(
                        "unknown role {other:?} in API_TOKENS entry {entry:?}"
                    )));
                }
                None => Principal::new(name),
            };
            provider = provider.with_token(token, principal);
        }
        Ok(provider)
    }

    /// Register a token (used by tests and embedded setups).
    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn verify(&self, token: &str) -> Result<Option<Principal>> {
        Ok(self.tokens.get(token).cloned())
    }
}
