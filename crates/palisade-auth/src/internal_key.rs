//! Internal (test) key authentication.
//!
//! Internal keys are JWTs signed by the issuer flagged `internal` in the
//! trust set. They bypass subscription validation and throttle at
//! unlimited tiers, and their validations live in the dedicated
//! internal-key cache.

use std::sync::Arc;

use palisade_core::context::AuthenticationContext;
use palisade_core::error::AuthErrorKind;
use palisade_core::types::TierName;

use crate::cache::TokenCaches;
use crate::token::{self, masked_token};
use crate::validator::{TokenValidation, TokenValidator};

/// Name recorded as the application for internal-key traffic.
const INTERNAL_KEY_APP: &str = "internal-key-app";

/// Authenticates internal (test) keys.
#[derive(Debug)]
pub struct InternalKeyAuthenticator {
    caches: Arc<TokenCaches>,
    validator: Arc<TokenValidator>,
}

impl InternalKeyAuthenticator {
    /// Wire the authenticator to its collaborators.
    #[must_use]
    pub fn new(caches: Arc<TokenCaches>, validator: Arc<TokenValidator>) -> Self {
        Self { caches, validator }
    }

    /// Authenticate an internal key.
    ///
    /// # Errors
    ///
    /// Returns the denial kind when no internal issuer is configured, the
    /// key was signed by a different issuer, or validation fails.
    pub async fn authenticate(
        &self,
        credential: &str,
    ) -> Result<AuthenticationContext, AuthErrorKind> {
        let parsed = match token::parse(credential) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(token = %masked_token(credential), error = %e, "failed to decode internal key");
                return Err(AuthErrorKind::InvalidCredentials);
            }
        };
        let identifier = parsed.identifier().to_string();

        let Some(internal_issuer) = self.validator.registry().internal_issuer() else {
            tracing::debug!("no internal issuer configured");
            return Err(AuthErrorKind::InvalidCredentials);
        };
        if parsed.claims.iss.as_deref() != Some(internal_issuer.issuer.as_str()) {
            tracing::debug!(token = %masked_token(credential), "internal key from a non-internal issuer");
            return Err(AuthErrorKind::InvalidCredentials);
        }

        if let Some(cached) = self.caches.internal_key(&identifier) {
            if cached.is_expired(self.validator.skew_secs()) {
                return Err(AuthErrorKind::TokenExpired);
            }
            return Ok(build_context(credential, &identifier, &cached));
        }

        let validation = Arc::new(self.validator.validate(&parsed).await);
        if !validation.valid {
            return Err(validation.error_kind());
        }
        self.caches.insert_internal_key(&identifier, Arc::clone(&validation));
        Ok(build_context(credential, &identifier, &validation))
    }
}

fn build_context(
    credential: &str,
    identifier: &str,
    validation: &TokenValidation,
) -> AuthenticationContext {
    AuthenticationContext {
        authenticated: true,
        token_identifier: identifier.to_string(),
        username: validation.username.clone(),
        key_type: validation.key_type,
        application_id: String::new(),
        application_name: INTERNAL_KEY_APP.to_string(),
        application_tier: TierName::unlimited(),
        subscriber: INTERNAL_KEY_APP.to_string(),
        subscription_tier: TierName::unlimited(),
        subscriber_tenant_domain: String::new(),
        scopes: validation.scopes.clone(),
        consumer_key: validation.consumer_key.clone(),
        stop_on_quota_reach: true,
        spike_arrest_limit: 0,
        raw_token: credential.to_string(),
    }
}
