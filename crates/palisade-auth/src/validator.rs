//! Signature and expiry validation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use palisade_core::error::AuthErrorKind;
use palisade_core::types::KeyType;

use crate::issuer::IssuerRegistry;
use crate::token::{ParsedToken, masked_token};

/// Outcome of validating one credential.
///
/// Cached by token identifier; immutable once built.
#[derive(Debug, Clone, Default)]
pub struct TokenValidation {
    /// Whether the credential verified.
    pub valid: bool,
    /// Error code when invalid.
    pub validation_code: u32,
    /// The `iss` claim.
    pub issuer: String,
    /// Key manager name of the matched issuer.
    pub key_manager: String,
    /// End user the token was issued to.
    pub username: String,
    /// Consumer key from the token.
    pub consumer_key: Option<String>,
    /// Scopes granted by the token.
    pub scopes: Vec<String>,
    /// Expiry claim, seconds since the epoch.
    pub expiry: Option<i64>,
    /// Key environment claim.
    pub key_type: KeyType,
    /// Whether the matched issuer requires subscription validation.
    pub validate_subscriptions: bool,
}

impl TokenValidation {
    fn invalid(code: AuthErrorKind) -> Self {
        Self {
            valid: false,
            validation_code: code.code(),
            ..Self::default()
        }
    }

    /// The failure kind for an invalid validation.
    #[must_use]
    pub fn error_kind(&self) -> AuthErrorKind {
        match self.validation_code {
            900903 => AuthErrorKind::TokenExpired,
            900905 => AuthErrorKind::IncorrectTokenType,
            900900 => AuthErrorKind::General,
            _ => AuthErrorKind::InvalidCredentials,
        }
    }

    /// Whether the expiry claim has passed, with the given skew.
    #[must_use]
    pub fn is_expired(&self, skew_secs: u64) -> bool {
        match self.expiry {
            Some(exp) => Utc::now().timestamp() - i64::try_from(skew_secs).unwrap_or(0) > exp,
            None => false,
        }
    }
}

/// Validates parsed tokens against the issuer trust set.
#[derive(Debug)]
pub struct TokenValidator {
    registry: Arc<IssuerRegistry>,
    skew_secs: u64,
    verify_signatures: bool,
    checks: AtomicU64,
}

impl TokenValidator {
    /// Create a validator that verifies signatures.
    #[must_use]
    pub fn new(registry: Arc<IssuerRegistry>, skew_secs: u64) -> Self {
        Self {
            registry,
            skew_secs,
            verify_signatures: true,
            checks: AtomicU64::new(0),
        }
    }

    /// Create a validator that accepts any signature.
    ///
    /// Issuer trust, algorithm allowlists, and expiry are still enforced.
    /// Intended for tests that cannot mint real asymmetric signatures.
    #[must_use]
    pub fn trusting(registry: Arc<IssuerRegistry>, skew_secs: u64) -> Self {
        Self {
            registry,
            skew_secs,
            verify_signatures: false,
            checks: AtomicU64::new(0),
        }
    }

    /// Number of expensive verification attempts performed so far.
    #[must_use]
    pub fn signature_checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    /// Clock skew tolerated on the expiry claim, in seconds.
    #[must_use]
    pub const fn skew_secs(&self) -> u64 {
        self.skew_secs
    }

    /// The issuer registry backing this validator.
    #[must_use]
    pub fn registry(&self) -> &Arc<IssuerRegistry> {
        &self.registry
    }

    /// Validate a parsed token: issuer trust, algorithm, signature, expiry.
    pub async fn validate(&self, token: &ParsedToken) -> TokenValidation {
        let Some(iss) = token.claims.iss.as_deref() else {
            tracing::debug!(token = %masked_token(&token.raw), "token has no issuer claim");
            return TokenValidation::invalid(AuthErrorKind::InvalidCredentials);
        };
        let Some(issuer) = self.registry.issuer(iss) else {
            tracing::debug!(issuer = iss, "token issuer is not trusted");
            return TokenValidation::invalid(AuthErrorKind::InvalidCredentials);
        };

        let Ok(algorithm) = token.header.alg.parse() else {
            tracing::debug!(alg = %token.header.alg, "unknown signature algorithm");
            return TokenValidation::invalid(AuthErrorKind::InvalidCredentials);
        };
        if !issuer.allows(algorithm) {
            tracing::debug!(alg = %token.header.alg, issuer = iss, "algorithm not allowed for issuer");
            return TokenValidation::invalid(AuthErrorKind::InvalidCredentials);
        }

        self.checks.fetch_add(1, Ordering::Relaxed);
        if self.verify_signatures {
            let key = match self
                .registry
                .resolve_key(&issuer, token.header.kid.as_deref())
                .await
            {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(issuer = iss, error = %e, "could not resolve verification key");
                    return TokenValidation::invalid(AuthErrorKind::InvalidCredentials);
                }
            };
            let verified = jsonwebtoken::crypto::verify(
                &token.signature,
                token.signing_input.as_bytes(),
                &key,
                algorithm,
            )
            .unwrap_or(false);
            if !verified {
                tracing::debug!(token = %masked_token(&token.raw), "signature verification failed");
                return TokenValidation::invalid(AuthErrorKind::InvalidCredentials);
            }
        }

        let mut validation = TokenValidation {
            valid: true,
            validation_code: 0,
            issuer: iss.to_string(),
            key_manager: issuer.name.clone(),
            username: token.claims.sub.clone().unwrap_or_default(),
            consumer_key: token.consumer_key().map(ToString::to_string),
            scopes: token.scopes(),
            expiry: token.claims.exp,
            key_type: token
                .claims
                .keytype
                .as_deref()
                .map_or_else(KeyType::default, KeyType::parse),
            validate_subscriptions: issuer.validate_subscriptions,
        };

        if validation.is_expired(self.skew_secs) {
            tracing::debug!(token = %masked_token(&token.raw), "token is expired");
            validation.valid = false;
            validation.validation_code = AuthErrorKind::TokenExpired.code();
        }
        validation
    }
}
