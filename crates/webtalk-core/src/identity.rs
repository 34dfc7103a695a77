//! Identity provider seam
//!
//! The room core stamps every outbound message with the local user's
//! identity but never persists it. Hosts plug in whatever owns the profile:
//! a fixed identity for tests and simulations, or one loaded through
//! [`Storage::load_or_create_identity`] for a persisted one.
//!
//! [`Storage::load_or_create_identity`]: crate::storage::Storage::load_or_create_identity

use crate::types::UserInfo;

/// Supplies the local user's stable identity.
pub trait IdentityProvider: Send + Sync + 'static {
    fn user_info(&self) -> UserInfo;
}

/// An identity that never changes.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub UserInfo);

impl StaticIdentity {
    pub fn new(user: UserInfo) -> Self {
        Self(user)
    }

    /// Generate a fresh identity with the given display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self(UserInfo::generate(name))
    }
}

impl IdentityProvider for StaticIdentity {
    fn user_info(&self) -> UserInfo {
        self.0.clone()
    }
}

impl IdentityProvider for UserInfo {
    fn user_info(&self) -> UserInfo {
        self.clone()
    }
}
