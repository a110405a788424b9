//! Per-request state flowing through the filter chain.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::models::{Api, ResourceMeta};
use crate::types::{KeyType, TierName};

/// The three-field error body every denial carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable numeric error code.
    pub code: u32,
    /// Human-readable message.
    pub message: String,
    /// Longer description.
    pub description: String,
}

/// A DENY verdict written into the request context by a filter.
///
/// A denial without an error body is a direct response (e.g. an answered
/// CORS preflight) rather than a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// HTTP status code of the response.
    pub status: u16,
    /// Error body, absent for direct responses.
    pub error: Option<ErrorBody>,
}

/// Result of authentication, attached to the request context.
///
/// Immutable once built; never shared across concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationContext {
    /// Whether the caller was authenticated.
    pub authenticated: bool,
    /// Token identifier (jti claim, or the JWS signature segment).
    pub token_identifier: String,
    /// End-user the token was issued to.
    pub username: String,
    /// Key environment of the credential.
    pub key_type: KeyType,
    /// UUID of the consuming application.
    pub application_id: String,
    /// Name of the consuming application.
    pub application_name: String,
    /// Application-level throttling tier.
    pub application_tier: TierName,
    /// Subscriber owning the application.
    pub subscriber: String,
    /// Subscription-level throttling tier.
    pub subscription_tier: TierName,
    /// Tenant domain of the subscriber.
    pub subscriber_tenant_domain: String,
    /// Scopes granted by the token.
    pub scopes: Vec<String>,
    /// Consumer (client) key from the token, when present.
    pub consumer_key: Option<String>,
    /// Whether traffic stops when the subscription quota is reached.
    pub stop_on_quota_reach: bool,
    /// Burst (spike-arrest) limit in requests per minute; 0 disables it.
    pub spike_arrest_limit: u32,
    /// The raw credential, kept for claim-condition publishing.
    pub raw_token: String,
}

/// Mutable per-call state, owned exclusively by one check call.
#[derive(Debug)]
pub struct RequestContext {
    /// Correlation id for the request.
    pub request_id: String,
    /// HTTP method, uppercase.
    pub method: String,
    /// Request path relative to the listener.
    pub path: String,
    /// Caller address, after X-Forwarded-For resolution.
    pub client_ip: String,
    /// The API the proxy matched.
    pub api: Arc<Api>,
    /// The resource matched within the API.
    pub resource: ResourceMeta,
    /// Authentication result, set by the authentication filter.
    pub auth: Option<AuthenticationContext>,
    /// Headers to add or overwrite before forwarding upstream.
    pub headers_to_add: Vec<(String, String)>,
    /// Headers to strip before forwarding upstream.
    pub headers_to_remove: Vec<String>,
    /// Query parameters to add before forwarding upstream.
    pub query_to_add: Vec<(String, String)>,
    /// Query parameters to strip before forwarding upstream.
    pub query_to_remove: Vec<String>,
    /// Method override requested by a mediation policy.
    pub rewritten_method: Option<String>,
    /// Metadata forwarded to the proxy for downstream telemetry.
    pub metadata: HashMap<String, String>,
    /// Free-form properties smuggled between filters.
    pub properties: HashMap<String, String>,
    /// The verdict, when a filter has denied the request.
    pub denial: Option<Denial>,
    headers: HashMap<String, String>,
    query_params: HashMap<String, String>,
    protected_headers: Vec<String>,
}

impl RequestContext {
    /// Create a request context for one check call.
    ///
    /// Header names are lowercased so lookups are case-insensitive.
    #[must_use]
    pub fn new(
        request_id: String,
        method: &str,
        path: &str,
        headers: HashMap<String, String>,
        query_params: HashMap<String, String>,
        client_ip: String,
        api: Arc<Api>,
        resource: ResourceMeta,
    ) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            request_id,
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            client_ip,
            api,
            resource,
            auth: None,
            headers_to_add: Vec::new(),
            headers_to_remove: Vec::new(),
            query_to_add: Vec::new(),
            query_to_remove: Vec::new(),
            rewritten_method: None,
            metadata: HashMap::new(),
            properties: HashMap::new(),
            denial: None,
            headers,
            query_params,
            protected_headers: Vec::new(),
        }
    }

    /// Look up a request header, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// All request headers (keys lowercased).
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// All request query parameters.
    #[must_use]
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Mark a header as protected so it is never published in telemetry.
    pub fn protect_header(&mut self, name: &str) {
        self.protected_headers.push(name.to_ascii_lowercase());
    }

    /// Headers that must never leave the enforcer.
    #[must_use]
    pub fn protected_headers(&self) -> &[String] {
        &self.protected_headers
    }

    /// Add or overwrite an upstream header.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers_to_add.push((name.into(), value.into()));
    }

    /// Strip an upstream header.
    pub fn remove_header(&mut self, name: impl Into<String>) {
        self.headers_to_remove.push(name.into());
    }

    /// Record a DENY verdict. The first denial wins; later filters do not
    /// run once the chain has stopped.
    pub fn deny(&mut self, denial: Denial) {
        if self.denial.is_none() {
            self.denial = Some(denial);
        }
    }

    /// The authentication context, when authentication has run.
    ///
    /// # Panics
    ///
    /// Panics if called before the authentication filter has populated it;
    /// filter ordering guarantees this on the throttling path.
    #[must_use]
    pub fn auth_context(&self) -> &AuthenticationContext {
        self.auth.as_ref().expect("authentication filter has not run")
    }
}
