//! Issuer trust: per-issuer key material and algorithm allowlists.
//!
//! Key material is either a configured PEM public key or a JWKS endpoint
//! fetched out of band and cached. Only asymmetric signature families are
//! trusted; symmetric entries are rejected when the registry is built.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey};
use moka::sync::Cache;
use thiserror::Error;

use palisade_core::config::{AuthConfig, IssuerConfig};
use palisade_core::error::EnforcerError;

/// Key material resolution failures.
#[derive(Debug, Error)]
pub enum IssuerError {
    /// The token's issuer is not in the trust set.
    #[error("issuer is not trusted: {0}")]
    Untrusted(String),
    /// No key matched the token's key id.
    #[error("no key material for kid {0:?}")]
    UnknownKey(Option<String>),
    /// The JWKS endpoint could not be fetched or parsed.
    #[error("JWKS fetch failed: {0}")]
    Jwks(String),
    /// A JWKS entry could not be converted into a verification key.
    #[error("unusable key material: {0}")]
    BadKey(String),
}

enum KeyMaterial {
    Static(Arc<DecodingKey>),
    Jwks(String),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static"),
            Self::Jwks(url) => f.debug_tuple("Jwks").field(url).finish(),
        }
    }
}

/// One trusted issuer.
#[derive(Debug)]
pub struct TrustedIssuer {
    /// Key manager display name.
    pub name: String,
    /// Expected `iss` claim value.
    pub issuer: String,
    /// Allowed signature algorithms.
    pub algorithms: Vec<Algorithm>,
    /// Whether tokens from this issuer require a subscription.
    pub validate_subscriptions: bool,
    /// Whether this issuer signs internal (test) keys.
    pub internal: bool,
    key: KeyMaterial,
}

impl TrustedIssuer {
    /// Whether the algorithm is allowed for this issuer.
    #[must_use]
    pub fn allows(&self, algorithm: Algorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }
}

/// Whether an algorithm belongs to an asymmetric signature family.
#[must_use]
pub const fn is_asymmetric(algorithm: Algorithm) -> bool {
    !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// The configured trust set, with a shared JWKS cache.
pub struct IssuerRegistry {
    issuers: HashMap<String, Arc<TrustedIssuer>>,
    jwks_cache: Cache<String, Arc<JwkSet>>,
    http: reqwest::Client,
}

impl std::fmt::Debug for IssuerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerRegistry")
            .field("issuers", &self.issuers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl IssuerRegistry {
    /// Build the registry from the auth configuration.
    ///
    /// # Errors
    ///
    /// Returns error when an issuer declares a symmetric algorithm, an
    /// unknown algorithm name, or unparsable key material.
    pub fn from_config(config: &AuthConfig) -> Result<Self, EnforcerError> {
        let mut issuers = HashMap::new();
        for issuer_cfg in &config.issuers {
            let issuer = Self::build_issuer(issuer_cfg)?;
            issuers.insert(issuer.issuer.clone(), Arc::new(issuer));
        }
        Ok(Self {
            issuers,
            jwks_cache: Cache::builder()
                .max_capacity(64)
                .time_to_live(Duration::from_secs(config.jwks_ttl_secs))
                .build(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        })
    }

    fn build_issuer(config: &IssuerConfig) -> Result<TrustedIssuer, EnforcerError> {
        let mut algorithms = Vec::new();
        for name in &config.algorithms {
            let algorithm: Algorithm = name.parse().map_err(|_| {
                EnforcerError::Config(format!("unknown signature algorithm: {name}"))
            })?;
            if !is_asymmetric(algorithm) {
                return Err(EnforcerError::Config(format!(
                    "issuer {} declares symmetric algorithm {name}; only asymmetric families are trusted",
                    config.issuer
                )));
            }
            algorithms.push(algorithm);
        }

        let key = if let Some(pem) = &config.certificate {
            Arc::new(Self::key_from_pem(pem, algorithms.first().copied())?)
        } else if let Some(url) = &config.jwks_url {
            return Ok(TrustedIssuer {
                name: config.name.clone(),
                issuer: config.issuer.clone(),
                algorithms,
                validate_subscriptions: config.validate_subscriptions,
                internal: config.internal,
                key: KeyMaterial::Jwks(url.clone()),
            });
        } else {
            return Err(EnforcerError::Config(format!(
                "issuer {} has no key material",
                config.issuer
            )));
        };

        Ok(TrustedIssuer {
            name: config.name.clone(),
            issuer: config.issuer.clone(),
            algorithms,
            validate_subscriptions: config.validate_subscriptions,
            internal: config.internal,
            key: KeyMaterial::Static(key),
        })
    }

    fn key_from_pem(pem: &str, algorithm: Option<Algorithm>) -> Result<DecodingKey, EnforcerError> {
        let bytes = pem.as_bytes();
        let key = match algorithm {
            Some(Algorithm::ES256 | Algorithm::ES384) => DecodingKey::from_ec_pem(bytes),
            Some(Algorithm::EdDSA) => DecodingKey::from_ed_pem(bytes),
            _ => DecodingKey::from_rsa_pem(bytes),
        };
        key.map_err(|e| EnforcerError::Config(format!("unparsable issuer key material: {e}")))
    }

    /// Look up a trusted issuer by its `iss` claim value.
    #[must_use]
    pub fn issuer(&self, iss: &str) -> Option<Arc<TrustedIssuer>> {
        self.issuers.get(iss).map(Arc::clone)
    }

    /// The issuer flagged as signing internal (test) keys, if any.
    #[must_use]
    pub fn internal_issuer(&self) -> Option<Arc<TrustedIssuer>> {
        self.issuers.values().find(|i| i.internal).map(Arc::clone)
    }

    /// Resolve the verification key for a token.
    ///
    /// # Errors
    ///
    /// Returns error when the JWKS endpoint is unreachable or carries no
    /// usable key for the token's key id.
    pub async fn resolve_key(
        &self,
        issuer: &TrustedIssuer,
        kid: Option<&str>,
    ) -> Result<Arc<DecodingKey>, IssuerError> {
        match &issuer.key {
            KeyMaterial::Static(key) => Ok(Arc::clone(key)),
            KeyMaterial::Jwks(url) => {
                let jwks = self.fetch_jwks(url).await?;
                let jwk = match kid {
                    Some(kid) => jwks.find(kid),
                    None => jwks.keys.first(),
                }
                .ok_or_else(|| IssuerError::UnknownKey(kid.map(ToString::to_string)))?;
                DecodingKey::from_jwk(jwk)
                    .map(Arc::new)
                    .map_err(|e| IssuerError::BadKey(e.to_string()))
            }
        }
    }

    async fn fetch_jwks(&self, url: &str) -> Result<Arc<JwkSet>, IssuerError> {
        if let Some(jwks) = self.jwks_cache.get(url) {
            return Ok(jwks);
        }
        let jwks: JwkSet = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| IssuerError::Jwks(e.to_string()))?
            .json()
            .await
            .map_err(|e| IssuerError::Jwks(e.to_string()))?;
        let jwks = Arc::new(jwks);
        self.jwks_cache.insert(url.to_string(), Arc::clone(&jwks));
        tracing::debug!(url, keys = jwks.keys.len(), "refreshed JWKS");
        Ok(jwks)
    }
}
