//! Core types used throughout Palisade.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the tier applied when no throttling policy is attached.
pub const UNLIMITED_TIER: &str = "Unlimited";

/// Default tenant domain appended to usernames without one.
pub const SUPER_TENANT_DOMAIN: &str = "carbon.super";

/// A named throttling policy attached to an API, resource, application,
/// or subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierName(pub String);

impl TierName {
    /// Create a new tier name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The tier applied when no policy is attached.
    #[must_use]
    pub fn unlimited() -> Self {
        Self(UNLIMITED_TIER.to_string())
    }

    /// Whether this tier exempts the holder from throttling.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.0 == UNLIMITED_TIER || self.0.is_empty()
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TierName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Default for TierName {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Key environment a credential was issued for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    /// Production keys.
    #[default]
    Production,
    /// Sandbox keys.
    Sandbox,
}

impl KeyType {
    /// Parse a key type, defaulting to production for unknown values.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("sandbox") {
            Self::Sandbox
        } else {
            Self::Production
        }
    }

    /// Canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "PRODUCTION",
            Self::Sandbox => "SANDBOX",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append the tenant domain to a username unless it already carries one.
#[must_use]
pub fn username_with_tenant(username: &str, tenant_domain: &str) -> String {
    let domain = if tenant_domain.is_empty() {
        SUPER_TENANT_DOMAIN
    } else {
        tenant_domain
    };
    if username.contains(domain) {
        username.to_string()
    } else {
        format!("{username}@{domain}")
    }
}

/// Generate a random hex request id.
#[must_use]
pub fn generate_request_id() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
