//! The token cache layer.
//!
//! Four bounded, time-expiring caches: parsed tokens (keyed by the raw
//! credential, since parsing is what produces the identifier), validation
//! verdicts, positive and negative markers, and internal-key validations
//! (all keyed by the token identifier). Entries are evicted when a cache
//! exceeds its configured capacity or an entry idles past its TTL.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use palisade_core::config::TokenCacheConfig;

use crate::token::ParsedToken;
use crate::validator::TokenValidation;

/// The four token caches shared by all requests.
pub struct TokenCaches {
    /// Whether lookups consult the caches at all.
    pub enabled: bool,
    parsed: Cache<String, Arc<ParsedToken>>,
    validations: Cache<String, Arc<TokenValidation>>,
    valid: Cache<String, bool>,
    invalid: Cache<String, bool>,
    internal_keys: Cache<String, Arc<TokenValidation>>,
}

impl TokenCaches {
    /// Build the caches from configuration.
    #[must_use]
    pub fn new(config: &TokenCacheConfig) -> Self {
        let ttl = Duration::from_secs(config.idle_ttl_secs);
        Self {
            enabled: config.enabled,
            parsed: build_cache(config.max_valid_entries, ttl),
            validations: build_cache(config.max_valid_entries, ttl),
            valid: build_cache(config.max_valid_entries, ttl),
            invalid: build_cache(config.max_invalid_entries, ttl),
            internal_keys: build_cache(config.max_valid_entries, ttl),
        }
    }

    /// Cached parsed token for a raw credential.
    #[must_use]
    pub fn parsed(&self, raw: &str) -> Option<Arc<ParsedToken>> {
        self.enabled.then(|| self.parsed.get(raw)).flatten()
    }

    /// Cache a parsed token.
    pub fn insert_parsed(&self, token: Arc<ParsedToken>) {
        if self.enabled {
            self.parsed.insert(token.raw.clone(), token);
        }
    }

    /// Cached validation verdict for a token identifier.
    #[must_use]
    pub fn validation(&self, identifier: &str) -> Option<Arc<TokenValidation>> {
        self.enabled.then(|| self.validations.get(identifier)).flatten()
    }

    /// Whether the identifier is in the positive cache.
    #[must_use]
    pub fn is_known_valid(&self, identifier: &str) -> bool {
        self.enabled && self.valid.get(identifier).unwrap_or(false)
    }

    /// Whether the identifier is in the negative cache.
    #[must_use]
    pub fn is_known_invalid(&self, identifier: &str) -> bool {
        self.enabled && self.invalid.get(identifier).unwrap_or(false)
    }

    /// Record a validation outcome, updating the marker caches.
    pub fn record_validation(&self, identifier: &str, validation: Arc<TokenValidation>) {
        if !self.enabled {
            return;
        }
        if validation.valid {
            self.valid.insert(identifier.to_string(), true);
        } else {
            self.invalid.insert(identifier.to_string(), true);
        }
        self.validations.insert(identifier.to_string(), validation);
    }

    /// Demote an identifier from the positive to the negative cache, e.g.
    /// when a cached token crosses its expiry.
    pub fn invalidate(&self, identifier: &str) {
        if !self.enabled {
            return;
        }
        self.valid.invalidate(identifier);
        self.invalid.insert(identifier.to_string(), true);
    }

    /// Cached internal-key validation.
    #[must_use]
    pub fn internal_key(&self, identifier: &str) -> Option<Arc<TokenValidation>> {
        self.enabled.then(|| self.internal_keys.get(identifier)).flatten()
    }

    /// Cache an internal-key validation.
    pub fn insert_internal_key(&self, identifier: &str, validation: Arc<TokenValidation>) {
        if self.enabled {
            self.internal_keys.insert(identifier.to_string(), validation);
        }
    }
}

fn build_cache<V>(capacity: u64, ttl: Duration) -> Cache<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(capacity)
        .time_to_idle(ttl)
        .build()
}

impl std::fmt::Debug for TokenCaches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCaches")
            .field("enabled", &self.enabled)
            .field("parsed", &self.parsed.entry_count())
            .field("validations", &self.validations.entry_count())
            .field("valid", &self.valid.entry_count())
            .field("invalid", &self.invalid.entry_count())
            .field("internal_keys", &self.internal_keys.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token;
    use serde_json::json;

    fn caches() -> TokenCaches {
        TokenCaches::new(&TokenCacheConfig::default())
    }

    fn validation(valid: bool) -> Arc<TokenValidation> {
        Arc::new(TokenValidation {
            valid,
            ..TokenValidation::default()
        })
    }

    #[test]
    fn test_parsed_cache_round_trip() {
        let caches = caches();
        let raw = token::testing::fake_token(&json!({"jti": "t1", "exp": 1_900_000_000i64}));
        let parsed = Arc::new(token::parse(&raw).unwrap());

        assert!(caches.parsed(&raw).is_none());
        caches.insert_parsed(Arc::clone(&parsed));
        assert_eq!(caches.parsed(&raw).unwrap().identifier(), "t1");
    }

    #[test]
    fn test_validation_markers() {
        let caches = caches();
        caches.record_validation("good", validation(true));
        caches.record_validation("bad", validation(false));

        assert!(caches.is_known_valid("good"));
        assert!(!caches.is_known_invalid("good"));
        assert!(caches.is_known_invalid("bad"));
        assert!(!caches.is_known_valid("bad"));
        assert!(caches.validation("good").is_some());
    }

    #[test]
    fn test_invalidate_demotes() {
        let caches = caches();
        caches.record_validation("t", validation(true));
        caches.invalidate("t");
        assert!(!caches.is_known_valid("t"));
        assert!(caches.is_known_invalid("t"));
    }

    #[test]
    fn test_disabled_caches_store_nothing() {
        let config = TokenCacheConfig {
            enabled: false,
            ..TokenCacheConfig::default()
        };
        let caches = TokenCaches::new(&config);
        caches.record_validation("t", validation(true));
        assert!(!caches.is_known_valid("t"));
        assert!(caches.validation("t").is_none());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let config = TokenCacheConfig {
            max_invalid_entries: 4,
            ..TokenCacheConfig::default()
        };
        let caches = TokenCaches::new(&config);
        for i in 0..64 {
            caches.record_validation(&format!("bad-{i}"), validation(false));
        }
        caches.invalid.run_pending_tasks();
        assert!(caches.invalid.entry_count() <= 4);
    }
}
