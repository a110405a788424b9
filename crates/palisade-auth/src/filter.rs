//! The authentication filter.

use std::sync::Arc;

use async_trait::async_trait;

use palisade_core::config::AuthConfig;
use palisade_core::context::{AuthenticationContext, RequestContext};
use palisade_core::error::AuthErrorKind;
use palisade_core::filter::Filter;
use palisade_core::types::TierName;

use crate::authenticator::JwtAuthenticator;
use crate::internal_key::InternalKeyAuthenticator;

const CHALLENGE_HEADER: &str = "www-authenticate";
const CHALLENGE: &str = "Bearer realm=\"Palisade\"";

/// Filter driving credential authentication for the chain.
pub struct AuthFilter {
    authenticator: Arc<JwtAuthenticator>,
    internal: Arc<InternalKeyAuthenticator>,
    config: AuthConfig,
}

impl AuthFilter {
    /// Wire the filter to its authenticators.
    #[must_use]
    pub fn new(
        authenticator: Arc<JwtAuthenticator>,
        internal: Arc<InternalKeyAuthenticator>,
        config: AuthConfig,
    ) -> Self {
        Self {
            authenticator,
            internal,
            config,
        }
    }

    fn deny(ctx: &mut RequestContext, kind: AuthErrorKind) -> bool {
        if kind.status() == 401 {
            ctx.add_header(CHALLENGE_HEADER, CHALLENGE);
        }
        ctx.deny(kind.denial());
        false
    }

    /// Extract the bearer token from an authorization header value.
    ///
    /// The credential must be exactly `Bearer <token>` with a three-segment
    /// JWS; anything else is treated as missing rather than invalid, since
    /// no authenticator can handle it.
    fn bearer_token(header_value: &str) -> Option<&str> {
        let trimmed = header_value.trim();
        let (scheme, token) = trimmed.split_once(char::is_whitespace)?;
        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("bearer") || token.split('.').count() != 3 {
            return None;
        }
        Some(token)
    }
}

#[async_trait]
impl Filter for AuthFilter {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> bool {
        if !self.config.enabled || ctx.resource.disable_security {
            ctx.auth = Some(anonymous_context());
            return true;
        }

        if let Some(internal_key) = ctx
            .header(&self.config.internal_key_header)
            .map(ToString::to_string)
        {
            return match self.internal.authenticate(&internal_key).await {
                Ok(auth) => {
                    ctx.auth = Some(auth);
                    ctx.protect_header(&self.config.internal_key_header);
                    true
                }
                Err(kind) => Self::deny(ctx, kind),
            };
        }

        let Some(header_value) = ctx.header(&self.config.header_name).map(ToString::to_string)
        else {
            return Self::deny(ctx, AuthErrorKind::MissingCredentials);
        };
        let Some(credential) = Self::bearer_token(&header_value) else {
            return Self::deny(ctx, AuthErrorKind::MissingCredentials);
        };

        let api = Arc::clone(&ctx.api);
        let resource = ctx.resource.clone();
        match self.authenticator.authenticate(&api, &resource, credential).await {
            Ok(auth) => {
                ctx.auth = Some(auth);
                ctx.protect_header(&self.config.header_name);
                true
            }
            Err(kind) => Self::deny(ctx, kind),
        }
    }
}

/// The context attached when security is disabled for a resource.
fn anonymous_context() -> AuthenticationContext {
    AuthenticationContext {
        authenticated: false,
        username: "anonymous".to_string(),
        application_tier: TierName::unlimited(),
        subscription_tier: TierName::unlimited(),
        ..AuthenticationContext::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TokenCaches;
    use crate::issuer::IssuerRegistry;
    use crate::revocation::RevocationStore;
    use crate::subscription::tests::{published_api, seeded_store};
    use crate::token::testing::{claims, fake_token};
    use crate::validator::TokenValidator;
    use palisade_core::config::TokenCacheConfig;
    use palisade_core::store::models::ResourceMeta;
    use std::collections::HashMap;

    fn filter() -> AuthFilter {
        let config = AuthConfig {
            issuers: vec![crate::issuer::tests::jwks_issuer("https://sts.example.com")],
            ..AuthConfig::default()
        };
        let registry = Arc::new(IssuerRegistry::from_config(&config).unwrap());
        let caches = Arc::new(TokenCaches::new(&TokenCacheConfig::default()));
        let validator = Arc::new(TokenValidator::trusting(registry, 5));
        AuthFilter::new(
            Arc::new(JwtAuthenticator::new(
                Arc::clone(&caches),
                Arc::clone(&validator),
                seeded_store(),
                Arc::new(RevocationStore::new()),
            )),
            Arc::new(InternalKeyAuthenticator::new(caches, validator)),
            config,
        )
    }

    fn context(headers: Vec<(&str, &str)>, disable_security: bool) -> RequestContext {
        let resource = ResourceMeta {
            path: "/pets".to_string(),
            method: "GET".to_string(),
            tier: None,
            scopes: vec![],
            disable_security,
            policies: vec![],
        };
        RequestContext::new(
            "req-1".to_string(),
            "GET",
            "/petstore/1.0.0/pets",
            headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            HashMap::new(),
            "10.0.0.1".to_string(),
            Arc::new(published_api()),
            resource,
        )
    }

    #[tokio::test]
    async fn test_missing_credentials_denied_with_challenge() {
        let filter = filter();
        let mut ctx = context(vec![], false);

        assert!(!filter.handle(&mut ctx).await);
        let denial = ctx.denial.as_ref().expect("denial");
        assert_eq!(denial.status, 401);
        assert_eq!(denial.error.as_ref().unwrap().code, 900902);
        assert!(ctx
            .headers_to_add
            .iter()
            .any(|(k, v)| k == CHALLENGE_HEADER && v == CHALLENGE));
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_missing_credentials() {
        let filter = filter();
        let mut ctx = context(vec![("authorization", "Basic YWxhZGRpbg==")], false);

        assert!(!filter.handle(&mut ctx).await);
        assert_eq!(ctx.denial.as_ref().unwrap().error.as_ref().unwrap().code, 900902);
    }

    #[tokio::test]
    async fn test_valid_bearer_authenticates() {
        let filter = filter();
        let token = fake_token(&claims("https://sts.example.com", "alice", 3600));
        let mut ctx = context(vec![("authorization", &format!("Bearer {token}"))], false);

        assert!(filter.handle(&mut ctx).await);
        let auth = ctx.auth.as_ref().expect("auth context");
        assert!(auth.authenticated);
        assert_eq!(auth.username, "alice");
        // The credential header never leaves the enforcer in telemetry.
        assert!(ctx.protected_headers().contains(&"authorization".to_string()));
    }

    #[tokio::test]
    async fn test_security_disabled_resource_is_anonymous() {
        let filter = filter();
        let mut ctx = context(vec![], true);

        assert!(filter.handle(&mut ctx).await);
        let auth = ctx.auth.as_ref().expect("auth context");
        assert!(!auth.authenticated);
        assert_eq!(auth.username, "anonymous");
    }

    #[tokio::test]
    async fn test_lowercase_bearer_accepted() {
        let filter = filter();
        let token = fake_token(&claims("https://sts.example.com", "alice", 3600));
        let mut ctx = context(vec![("authorization", &format!("bearer {token}"))], false);
        assert!(filter.handle(&mut ctx).await);
    }
}
