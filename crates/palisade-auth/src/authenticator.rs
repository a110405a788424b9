//! The bearer-credential authenticator.
//!
//! Implements the full authentication pipeline: cached parsing, the
//! negative-cache short circuit, signature and expiry validation, the
//! revocation check, subscription resolution, and scope validation.
//! Expected failures are returned as denial kinds, never as panics or
//! opaque errors.

use std::sync::Arc;

use palisade_core::context::AuthenticationContext;
use palisade_core::error::AuthErrorKind;
use palisade_core::store::SubscriptionStore;
use palisade_core::store::models::{Api, ResourceMeta};
use palisade_core::types::TierName;

use crate::cache::TokenCaches;
use crate::revocation::RevocationStore;
use crate::subscription::{SubscriptionValidation, validate_subscription};
use crate::token::{self, ParsedToken, masked_token};
use crate::validator::{TokenValidation, TokenValidator};

/// Authenticates bearer credentials with multi-layer caching.
#[derive(Debug)]
pub struct JwtAuthenticator {
    caches: Arc<TokenCaches>,
    validator: Arc<TokenValidator>,
    store: Arc<SubscriptionStore>,
    revocation: Arc<RevocationStore>,
}

impl JwtAuthenticator {
    /// Wire the authenticator to its collaborators.
    #[must_use]
    pub fn new(
        caches: Arc<TokenCaches>,
        validator: Arc<TokenValidator>,
        store: Arc<SubscriptionStore>,
        revocation: Arc<RevocationStore>,
    ) -> Self {
        Self {
            caches,
            validator,
            store,
            revocation,
        }
    }

    /// Number of expensive verification attempts performed so far.
    #[must_use]
    pub fn signature_checks(&self) -> u64 {
        self.validator.signature_checks()
    }

    /// The token caches backing this authenticator.
    #[must_use]
    pub fn caches(&self) -> &Arc<TokenCaches> {
        &self.caches
    }

    /// Authenticate a bearer credential against the matched API resource.
    ///
    /// # Errors
    ///
    /// Returns the denial kind for every expected failure: malformed or
    /// unverifiable credentials, expired or revoked tokens, missing or
    /// inactive subscriptions, and insufficient scopes.
    pub async fn authenticate(
        &self,
        api: &Api,
        resource: &ResourceMeta,
        credential: &str,
    ) -> Result<AuthenticationContext, AuthErrorKind> {
        let parsed = self.parse_cached(credential)?;
        let identifier = parsed.identifier().to_string();

        // Known-bad credentials short-circuit before any crypto work.
        if self.caches.is_known_invalid(&identifier) {
            tracing::debug!(token = %masked_token(credential), "negative cache hit");
            let kind = self
                .caches
                .validation(&identifier)
                .map_or(AuthErrorKind::InvalidCredentials, |v| v.error_kind());
            return Err(kind);
        }

        let validation = self.validation_for(&parsed, &identifier).await?;

        if self.revocation.is_revoked(&identifier) {
            tracing::debug!(token = %masked_token(credential), "token is revoked");
            self.caches.invalidate(&identifier);
            return Err(AuthErrorKind::InvalidCredentials);
        }

        let subscription = if validation.validate_subscriptions {
            let consumer_key = validation
                .consumer_key
                .as_deref()
                .ok_or(AuthErrorKind::Forbidden)?;
            validate_subscription(
                &self.store,
                api,
                consumer_key,
                &validation.key_manager,
                validation.key_type,
            )?
        } else {
            // Subscription validation disabled for the issuer: the
            // application notion degrades to an annotation for telemetry.
            SubscriptionValidation {
                application_id: String::new(),
                application_name: format!("anon:{}", validation.key_manager),
                application_tier: TierName::unlimited(),
                subscriber: validation.username.clone(),
                subscription_tier: TierName::unlimited(),
                tenant_domain: String::new(),
                key_type: validation.key_type,
                stop_on_quota_reach: true,
                spike_arrest_limit: 0,
            }
        };

        validate_scopes(resource, &validation)?;

        Ok(build_context(credential, &identifier, &validation, subscription))
    }

    fn parse_cached(&self, credential: &str) -> Result<Arc<ParsedToken>, AuthErrorKind> {
        if let Some(parsed) = self.caches.parsed(credential) {
            return Ok(parsed);
        }
        match token::parse(credential) {
            Ok(parsed) => {
                let parsed = Arc::new(parsed);
                self.caches.insert_parsed(Arc::clone(&parsed));
                Ok(parsed)
            }
            Err(e) => {
                tracing::debug!(token = %masked_token(credential), error = %e, "failed to decode credential");
                Err(AuthErrorKind::InvalidCredentials)
            }
        }
    }

    async fn validation_for(
        &self,
        parsed: &ParsedToken,
        identifier: &str,
    ) -> Result<Arc<TokenValidation>, AuthErrorKind> {
        if self.caches.is_known_valid(identifier) {
            if let Some(validation) = self.caches.validation(identifier) {
                // A cached verdict can outlive the token's own expiry.
                if validation.is_expired(self.validator.skew_secs()) {
                    tracing::debug!(token = %masked_token(&parsed.raw), "cached token crossed its expiry");
                    self.caches.invalidate(identifier);
                    return Err(AuthErrorKind::TokenExpired);
                }
                return Ok(validation);
            }
        }

        let validation = Arc::new(self.validator.validate(parsed).await);
        self.caches.record_validation(identifier, Arc::clone(&validation));
        if validation.valid {
            Ok(validation)
        } else {
            Err(validation.error_kind())
        }
    }
}

fn validate_scopes(
    resource: &ResourceMeta,
    validation: &TokenValidation,
) -> Result<(), AuthErrorKind> {
    if resource.scopes.is_empty() {
        return Ok(());
    }
    let granted = &validation.scopes;
    if resource.scopes.iter().any(|required| granted.contains(required)) {
        Ok(())
    } else {
        tracing::debug!(
            required = ?resource.scopes,
            "token scopes do not cover the resource"
        );
        Err(AuthErrorKind::InvalidScope)
    }
}

fn build_context(
    credential: &str,
    identifier: &str,
    validation: &TokenValidation,
    subscription: SubscriptionValidation,
) -> AuthenticationContext {
    AuthenticationContext {
        authenticated: true,
        token_identifier: identifier.to_string(),
        username: validation.username.clone(),
        key_type: subscription.key_type,
        application_id: subscription.application_id,
        application_name: subscription.application_name,
        application_tier: subscription.application_tier,
        subscriber: subscription.subscriber,
        subscription_tier: subscription.subscription_tier,
        subscriber_tenant_domain: subscription.tenant_domain,
        scopes: validation.scopes.clone(),
        consumer_key: validation.consumer_key.clone(),
        stop_on_quota_reach: subscription.stop_on_quota_reach,
        spike_arrest_limit: subscription.spike_arrest_limit,
        raw_token: credential.to_string(),
    }
}
