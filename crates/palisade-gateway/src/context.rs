//! The dependency-injected enforcer context.
//!
//! Every shared resource — subscription store, token caches, revocation
//! set, throttle data, publisher — is constructed once, owned here, and
//! handed to the RPC front. There is no package-level mutable state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use palisade_auth::authenticator::JwtAuthenticator;
use palisade_auth::cache::TokenCaches;
use palisade_auth::filter::AuthFilter;
use palisade_auth::internal_key::InternalKeyAuthenticator;
use palisade_auth::issuer::IssuerRegistry;
use palisade_auth::revocation::RevocationStore;
use palisade_auth::validator::TokenValidator;
use palisade_core::config::EnforcerConfig;
use palisade_core::context::RequestContext;
use palisade_core::error::{AuthErrorKind, EnforcerError};
use palisade_core::filter::{CorsFilter, Filter, FilterChain, MediationFilter};
use palisade_core::store::SubscriptionStore;
use palisade_core::types::generate_request_id;
use palisade_throttle::data::ThrottleDataHolder;
use palisade_throttle::filter::ThrottleFilter;
use palisade_throttle::local::LocalGates;
use palisade_throttle::publish::{EventSink, Publisher};

use crate::check::{CheckRequest, CheckResponse, HeaderOp, transport_status};
use crate::deny;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const CONTENT_TYPE: &str = "content-type";

/// The enforcer's shared state and its filter chain.
pub struct EnforcerContext {
    config: EnforcerConfig,
    store: Arc<SubscriptionStore>,
    revocation: Arc<RevocationStore>,
    throttle_data: Arc<ThrottleDataHolder>,
    authenticator: Arc<JwtAuthenticator>,
    chain: FilterChain,
}

impl EnforcerContext {
    /// Start building a context.
    #[must_use]
    pub fn builder(config: EnforcerConfig) -> EnforcerContextBuilder {
        EnforcerContextBuilder::new(config)
    }

    /// The subscription store, for the sync collaborator.
    #[must_use]
    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    /// The revocation store, for the sync collaborator.
    #[must_use]
    pub fn revocation(&self) -> &Arc<RevocationStore> {
        &self.revocation
    }

    /// The throttle data holder, for the sync collaborator.
    #[must_use]
    pub fn throttle_data(&self) -> &Arc<ThrottleDataHolder> {
        &self.throttle_data
    }

    /// The authenticator, exposed for instrumentation.
    #[must_use]
    pub fn authenticator(&self) -> &Arc<JwtAuthenticator> {
        &self.authenticator
    }

    /// The enforcer configuration.
    #[must_use]
    pub fn config(&self) -> &EnforcerConfig {
        &self.config
    }

    /// Decide one check call.
    pub async fn check(&self, request: CheckRequest) -> CheckResponse {
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(generate_request_id);

        // The proxy already routed; resolve its match against the store.
        let Some(api) = self
            .store
            .api_by_context_and_version(&request.api_context, &request.api_version)
        else {
            tracing::debug!(
                context = %request.api_context,
                version = %request.api_version,
                "check for an unknown API"
            );
            return deny_response(&request, AuthErrorKind::IncorrectApiResource, &self.config);
        };
        // Preflights carry OPTIONS, which resources rarely declare; match
        // by path alone so the CORS filter can answer them.
        let matched = if request.method.eq_ignore_ascii_case("OPTIONS") {
            api.match_resource(&request.path, &request.method)
                .or_else(|| api.match_resource_any_method(&request.path))
        } else {
            api.match_resource(&request.path, &request.method)
        };
        let Some(resource) = matched.cloned() else {
            tracing::debug!(path = %request.path, method = %request.method, "no matching resource");
            return deny_response(&request, AuthErrorKind::IncorrectApiResource, &self.config);
        };

        let client_ip = resolve_client_ip(&request.headers, request.client_address.as_deref());
        let mut ctx = RequestContext::new(
            request_id,
            &request.method,
            &request.path,
            request.headers,
            request.query_params,
            client_ip,
            api,
            resource,
        );

        if self.chain.run(&mut ctx).await {
            allow_response(ctx)
        } else {
            verdict_response(ctx, &self.config)
        }
    }
}

impl std::fmt::Debug for EnforcerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcerContext").finish_non_exhaustive()
    }
}

/// Builder wiring the enforcer context.
pub struct EnforcerContextBuilder {
    config: EnforcerConfig,
    store: Option<Arc<SubscriptionStore>>,
    revocation: Option<Arc<RevocationStore>>,
    throttle_data: Option<Arc<ThrottleDataHolder>>,
    validator: Option<Arc<TokenValidator>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl EnforcerContextBuilder {
    /// Create a builder with the given configuration.
    #[must_use]
    pub fn new(config: EnforcerConfig) -> Self {
        Self {
            config,
            store: None,
            revocation: None,
            throttle_data: None,
            validator: None,
            sink: None,
        }
    }

    /// Use an existing subscription store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<SubscriptionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an existing revocation store.
    #[must_use]
    pub fn with_revocation(mut self, revocation: Arc<RevocationStore>) -> Self {
        self.revocation = Some(revocation);
        self
    }

    /// Use an existing throttle data holder.
    #[must_use]
    pub fn with_throttle_data(mut self, data: Arc<ThrottleDataHolder>) -> Self {
        self.throttle_data = Some(data);
        self
    }

    /// Use a specific token validator instead of the configured one.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<TokenValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Use a specific event sink instead of starting the publisher.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the context, starting the publisher when no sink was given.
    ///
    /// Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error when the issuer trust set is invalid.
    pub fn build(self) -> Result<EnforcerContext, EnforcerError> {
        let config = self.config;
        let store = self.store.unwrap_or_else(|| Arc::new(SubscriptionStore::new()));
        let revocation = self.revocation.unwrap_or_else(|| Arc::new(RevocationStore::new()));
        let throttle_data = self
            .throttle_data
            .unwrap_or_else(|| Arc::new(ThrottleDataHolder::new()));

        let validator = match self.validator {
            Some(validator) => validator,
            None => {
                let registry = Arc::new(IssuerRegistry::from_config(&config.auth)?);
                Arc::new(TokenValidator::new(registry, config.auth.timestamp_skew_secs))
            }
        };
        let caches = Arc::new(TokenCaches::new(&config.auth.token_cache));
        let authenticator = Arc::new(JwtAuthenticator::new(
            Arc::clone(&caches),
            Arc::clone(&validator),
            Arc::clone(&store),
            Arc::clone(&revocation),
        ));
        let internal = Arc::new(InternalKeyAuthenticator::new(caches, Arc::clone(&validator)));

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(Publisher::start(&config.throttle.publisher)));
        let gates = Arc::new(LocalGates::new(config.throttle.hard_limit_per_min));

        // Strict chain order: CORS, authentication, throttling, mediation.
        let filters: Vec<Box<dyn Filter>> = vec![
            Box::new(CorsFilter::new(config.cors.clone())),
            Box::new(AuthFilter::new(
                Arc::clone(&authenticator),
                internal,
                config.auth.clone(),
            )),
            Box::new(ThrottleFilter::new(
                Arc::clone(&throttle_data),
                gates,
                sink,
                config.throttle.clone(),
            )),
            Box::new(MediationFilter::new()),
        ];

        Ok(EnforcerContext {
            config,
            store,
            revocation,
            throttle_data,
            authenticator,
            chain: FilterChain::new(filters),
        })
    }
}

/// First X-Forwarded-For hop, else the connection address.
fn resolve_client_ip(headers: &HashMap<String, String>, client_address: Option<&str>) -> String {
    let forwarded = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(X_FORWARDED_FOR))
        .map(|(_, value)| value.as_str());
    if let Some(forwarded) = forwarded {
        let first = forwarded.split(',').next().unwrap_or(forwarded).trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    let Some(address) = client_address else {
        return String::new();
    };
    address
        .parse::<SocketAddr>()
        .map_or_else(|_| address.to_string(), |sock| sock.ip().to_string())
}

fn allow_response(ctx: RequestContext) -> CheckResponse {
    CheckResponse {
        result: "allow".to_string(),
        status: transport_status(200).to_string(),
        status_code: 200,
        headers_to_add: pairs(ctx.headers_to_add),
        headers_to_remove: ctx.headers_to_remove,
        query_to_add: pairs(ctx.query_to_add),
        query_to_remove: ctx.query_to_remove,
        rewritten_method: ctx.rewritten_method,
        metadata: ctx.metadata,
        body: None,
        content_type: None,
    }
}

/// Map a chain denial onto the wire, rendering the body by negotiation.
fn verdict_response(ctx: RequestContext, config: &EnforcerConfig) -> CheckResponse {
    let denial = ctx
        .denial
        .clone()
        .expect("chain returned deny without a denial");

    let (body, content_type) = match &denial.error {
        Some(error) => {
            let format = deny::negotiate(
                ctx.header(CONTENT_TYPE),
                ctx.header(deny::SOAP_ACTION_HEADER),
                &config.deny,
            );
            let (body, content_type) = deny::render(error, format);
            (Some(body), Some(content_type.to_string()))
        }
        // Direct responses (an answered CORS preflight) carry no body.
        None => (None, None),
    };

    CheckResponse {
        result: "deny".to_string(),
        status: transport_status(denial.status).to_string(),
        status_code: denial.status,
        headers_to_add: pairs(ctx.headers_to_add),
        headers_to_remove: Vec::new(),
        query_to_add: Vec::new(),
        query_to_remove: Vec::new(),
        rewritten_method: None,
        metadata: ctx.metadata,
        body,
        content_type,
    }
}

/// Denial for requests that never reach the chain (unknown API/resource).
fn deny_response(
    request: &CheckRequest,
    kind: AuthErrorKind,
    config: &EnforcerConfig,
) -> CheckResponse {
    let denial = kind.denial();
    let error = denial.error.expect("auth denials carry an error body");
    let content_type = request
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE))
        .map(|(_, value)| value.as_str());
    let soap_action = request
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(deny::SOAP_ACTION_HEADER))
        .map(|(_, value)| value.as_str());
    let format = deny::negotiate(content_type, soap_action, &config.deny);
    let (body, body_content_type) = deny::render(&error, format);

    CheckResponse {
        result: "deny".to_string(),
        status: transport_status(denial.status).to_string(),
        status_code: denial.status,
        headers_to_add: Vec::new(),
        headers_to_remove: Vec::new(),
        query_to_add: Vec::new(),
        query_to_remove: Vec::new(),
        rewritten_method: None,
        metadata: HashMap::new(),
        body: Some(body),
        content_type: Some(body_content_type.to_string()),
    }
}

fn pairs(raw: Vec<(String, String)>) -> Vec<HeaderOp> {
    raw.into_iter()
        .map(|(name, value)| HeaderOp { name, value })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HashMap::new();
        headers.insert("x-forwarded-for".to_string(), "203.0.113.9, 10.0.0.1".to_string());
        assert_eq!(
            resolve_client_ip(&headers, Some("192.168.0.5:41000")),
            "203.0.113.9"
        );
    }

    #[test]
    fn test_client_ip_strips_port_from_socket_address() {
        let headers = HashMap::new();
        assert_eq!(
            resolve_client_ip(&headers, Some("192.168.0.5:41000")),
            "192.168.0.5"
        );
        assert_eq!(resolve_client_ip(&headers, Some("192.168.0.5")), "192.168.0.5");
        assert_eq!(resolve_client_ip(&headers, None), "");
    }
}
