//! Entities synchronized from the control plane.
//!
//! Every entity carries a stable UUID used as its cache key and is replaced
//! wholesale on update; nothing here is ever mutated in place after it has
//! been installed in the store.

use serde::{Deserialize, Serialize};

use crate::types::TierName;

/// Lifecycle state in which an API accepts traffic.
pub const LIFECYCLE_PUBLISHED: &str = "PUBLISHED";

/// Subscription state that authorizes traffic.
pub const SUBSCRIPTION_ACTIVE: &str = "ACTIVE";

/// A deployed API with its matchable resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Api {
    /// Stable UUID.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// Version segment.
    pub version: String,
    /// Base path (context) the proxy matched, e.g. `/petstore`.
    pub context: String,
    /// API-level throttling tier, when set in the API definition.
    #[serde(default)]
    pub tier: Option<TierName>,
    /// Lifecycle state; only `PUBLISHED` APIs accept traffic.
    pub lifecycle_state: String,
    /// Owning organization / tenant domain.
    #[serde(default)]
    pub organization: String,
    /// Matchable resources.
    #[serde(default)]
    pub resources: Vec<ResourceMeta>,
}

impl Api {
    /// Whether this API accepts traffic.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.lifecycle_state == LIFECYCLE_PUBLISHED
    }

    /// Store key for context/version lookup.
    #[must_use]
    pub fn context_version_key(&self) -> String {
        api_key(&self.context, &self.version)
    }

    /// Match a request path and method against the API's resources.
    ///
    /// Path templates support `{param}` single-segment wildcards and a
    /// trailing `/*` rest wildcard.
    #[must_use]
    pub fn match_resource(&self, path: &str, method: &str) -> Option<&ResourceMeta> {
        self.resources
            .iter()
            .find(|r| r.method.eq_ignore_ascii_case(method) && template_matches(&r.path, path))
    }

    /// Match a request path against the API's resources regardless of
    /// method. CORS preflights carry OPTIONS, which resources rarely
    /// declare.
    #[must_use]
    pub fn match_resource_any_method(&self, path: &str) -> Option<&ResourceMeta> {
        self.resources.iter().find(|r| template_matches(&r.path, path))
    }
}

/// Build the `context:version` store key for an API.
#[must_use]
pub fn api_key(context: &str, version: &str) -> String {
    if version.is_empty() {
        context.to_string()
    } else {
        format!("{context}:{version}")
    }
}

fn template_matches(template: &str, path: &str) -> bool {
    let template = template.trim_end_matches('?');
    let mut tpl_segments = template.split('/').filter(|s| !s.is_empty()).peekable();
    let mut path_segments = path.split('?').next().unwrap_or(path).split('/').filter(|s| !s.is_empty());

    loop {
        match (tpl_segments.next(), path_segments.next()) {
            (Some("*"), _) => return tpl_segments.peek().is_none(),
            (Some(tpl), Some(seg)) => {
                if !(tpl.starts_with('{') && tpl.ends_with('}')) && tpl != seg {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// One matchable operation of an API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Path template relative to the API context, e.g. `/pets/{id}`.
    pub path: String,
    /// HTTP method.
    pub method: String,
    /// Resource-level throttling tier.
    #[serde(default)]
    pub tier: Option<TierName>,
    /// Scopes required to invoke the resource.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Whether security is disabled for this resource.
    #[serde(default)]
    pub disable_security: bool,
    /// Mediation policies applied in declaration order.
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
}

impl ResourceMeta {
    /// Effective tier for throttling, defaulting to unlimited.
    #[must_use]
    pub fn effective_tier(&self) -> TierName {
        self.tier.clone().filter(|t| !t.as_ref().is_empty()).unwrap_or_default()
    }
}

/// A declarative mediation action attached to a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Action name, e.g. `SET_HEADER`.
    pub action: String,
    /// Action parameters.
    #[serde(default)]
    pub params: std::collections::HashMap<String, String>,
}

/// A consumer application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// Stable UUID.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// Owning subscriber.
    pub owner: String,
    /// Application-level throttling policy name.
    pub policy: String,
    /// Tenant domain of the owner.
    #[serde(default)]
    pub tenant_domain: String,
}

/// The binding between one application and one API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Stable UUID.
    pub uuid: String,
    /// Subscribed API UUID.
    pub api_uuid: String,
    /// Subscribing application UUID.
    pub app_uuid: String,
    /// Subscription-level throttling policy name.
    pub policy: String,
    /// Subscription state; only `ACTIVE` authorizes traffic.
    pub state: String,
}

impl Subscription {
    /// Whether the subscription authorizes traffic.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SUBSCRIPTION_ACTIVE
    }

    /// Store key for the (application, API) pair.
    #[must_use]
    pub fn pair_key(&self) -> String {
        subscription_key(&self.app_uuid, &self.api_uuid)
    }
}

/// Build the `app:api` store key for a subscription.
#[must_use]
pub fn subscription_key(app_uuid: &str, api_uuid: &str) -> String {
    format!("{app_uuid}:{api_uuid}")
}

/// Maps an OAuth/JWT client key onto an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationKeyMapping {
    /// Consumer (client) key from the token.
    pub consumer_key: String,
    /// Key manager that issued the key.
    pub key_manager: String,
    /// Key environment.
    pub key_type: String,
    /// Application UUID the key belongs to.
    pub app_uuid: String,
}

impl ApplicationKeyMapping {
    /// Store key for consumer-key lookup.
    #[must_use]
    pub fn lookup_key(&self) -> String {
        key_mapping_key(&self.consumer_key, &self.key_manager)
    }
}

/// Build the `consumerKey:keyManager` store key for a key mapping.
#[must_use]
pub fn key_mapping_key(consumer_key: &str, key_manager: &str) -> String {
    format!("{consumer_key}:{key_manager}")
}

/// Application-level throttling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationPolicy {
    /// Policy (tier) name.
    pub name: String,
}

/// Subscription-level throttling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPolicy {
    /// Policy (tier) name.
    pub name: String,
    /// Whether traffic continues past the quota (advisory throttling).
    #[serde(default)]
    pub stop_on_quota_reach: bool,
    /// Burst (spike-arrest) limit in requests per minute; 0 disables it.
    #[serde(default)]
    pub rate_limit: u32,
}

/// API-level throttling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPolicy {
    /// Policy (tier) name.
    pub name: String,
}
