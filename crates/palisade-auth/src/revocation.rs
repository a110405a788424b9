//! Revoked-token tracking.
//!
//! A concurrent set of revoked token identifiers, pushed by the control
//! plane. Entries carry the token's expiry so the set can be purged once
//! revocation no longer matters.

use chrono::Utc;
use dashmap::DashMap;

/// Concurrent set of revoked token identifiers.
#[derive(Debug, Default)]
pub struct RevocationStore {
    revoked: DashMap<String, i64>,
}

impl RevocationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a revoked token identifier with its expiry timestamp.
    pub fn revoke(&self, identifier: impl Into<String>, expiry: i64) {
        self.revoked.insert(identifier.into(), expiry);
    }

    /// Remove a revocation entry.
    pub fn remove(&self, identifier: &str) {
        self.revoked.remove(identifier);
    }

    /// Whether the identifier is revoked.
    #[must_use]
    pub fn is_revoked(&self, identifier: &str) -> bool {
        self.revoked.contains_key(identifier)
    }

    /// Drop entries whose token has expired anyway.
    pub fn purge_expired(&self) {
        let now = Utc::now().timestamp();
        self.revoked.retain(|_, expiry| *expiry > now);
    }

    /// Number of tracked revocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    /// Whether no revocations are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_and_remove() {
        let store = RevocationStore::new();
        store.revoke("sig-1", Utc::now().timestamp() + 3600);
        assert!(store.is_revoked("sig-1"));
        assert!(!store.is_revoked("sig-2"));

        store.remove("sig-1");
        assert!(!store.is_revoked("sig-1"));
    }

    #[test]
    fn test_purge_drops_only_expired() {
        let store = RevocationStore::new();
        let now = Utc::now().timestamp();
        store.revoke("dead", now - 10);
        store.revoke("live", now + 3600);

        store.purge_expired();
        assert!(!store.is_revoked("dead"));
        assert!(store.is_revoked("live"));
        assert_eq!(store.len(), 1);
    }
}
