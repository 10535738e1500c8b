//! Principals and owner-or-admin access control.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// A verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable identifier recorded as job owner.
    pub name: String,
    /// Admins may read, list, cancel, and notify any job.
    pub is_admin: bool,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_admin: false,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_admin: true,
        }
    }

    /// Whether this principal may act on a job owned by `owner`.
    pub fn can_access(&self, owner: &str) -> bool {
        self.is_admin || self.name == owner
    }
}

/// Enforce the owner-or-admin rule for a job operation.
pub fn authorize(principal: &Principal, owner: &str) -> Result<()> {
    if principal.can_access(owner) {
        Ok(())
    } else {
        Err(Error::Forbidden("access denied to this job".to_string()))
    }
}

/// Verifies bearer tokens into principals. Injected at the API boundary so
/// the services below it never see raw credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a token to a principal, or `None` if the token is unknown.
    async fn verify(&self, token: &str) -> Result<Option<Principal>>;
}
