//! Throttle event construction.
//!
//! One flat record per allowed request, carrying every composite key the
//! remote counting service aggregates on. Events are built fresh per
//! request and never persisted locally.

use std::net::IpAddr;

use serde::Serialize;
use serde_json::{Map, Value, json};

use palisade_core::config::ThrottleConfig;
use palisade_core::context::RequestContext;
use palisade_core::types::{SUPER_TENANT_DOMAIN, TierName, username_with_tenant};

/// Property key carrying custom throttle properties between filters.
pub const CUSTOM_THROTTLE_PROPERTIES: &str = "customThrottleProperties";

/// Path pseudo-header, never published: it can carry securing query params.
const PATH_HEADER: &str = ":path";

/// The flat usage record published to the remote counting service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleEvent {
    /// Correlation id of the request.
    pub message_id: String,
    /// `appId:user` composite key.
    pub app_key: String,
    /// Application-level tier.
    pub app_tier: String,
    /// `context:version` composite key.
    pub api_key: String,
    /// API-level tier.
    pub api_tier: String,
    /// `appId:apiContext` composite key.
    pub subscription_key: String,
    /// Subscription-level tier.
    pub subscription_tier: String,
    /// `context/version/path:method` composite key.
    pub resource_key: String,
    /// Resource-level tier.
    pub resource_tier: String,
    /// Tenant-qualified username.
    pub user_id: String,
    /// API base path.
    pub api_context: String,
    /// API version.
    pub api_version: String,
    /// Tenant domain of the subscriber.
    pub app_tenant: String,
    /// Tenant domain of the API.
    pub api_tenant: String,
    /// Application UUID.
    pub app_id: String,
    /// API display name.
    pub api_name: String,
    /// JSON properties blob (caller IP, optional conditions).
    pub properties: String,
}

/// Tenant domain derived from the API context
/// (`/t/<domain>/...` or the super tenant).
#[must_use]
pub fn tenant_from_context(context: &str) -> String {
    let mut segments = context.split('/').filter(|s| !s.is_empty());
    if segments.next() == Some("t") {
        if let Some(domain) = segments.next() {
            return domain.to_string();
        }
    }
    SUPER_TENANT_DOMAIN.to_string()
}

/// `context:version` throttle key.
#[must_use]
pub fn api_throttle_key(context: &str, version: &str) -> String {
    if version.is_empty() {
        context.to_string()
    } else {
        format!("{context}:{version}")
    }
}

/// `context/version/path:method` throttle key.
#[must_use]
pub fn resource_throttle_key(context: &str, version: &str, path: &str, method: &str) -> String {
    if version.is_empty() {
        format!("{context}{path}:{method}")
    } else {
        format!("{context}/{version}{path}:{method}")
    }
}

/// `appId:apiContext[:version]` throttle key.
#[must_use]
pub fn subscription_throttle_key(app_id: &str, context: &str, version: &str) -> String {
    if version.is_empty() {
        format!("{app_id}:{context}")
    } else {
        format!("{app_id}:{context}:{version}")
    }
}

/// Build the usage event for an allowed request.
///
/// Requires the authentication context; the filter chain guarantees it on
/// the throttling path.
#[must_use]
pub fn build_event(ctx: &RequestContext, config: &ThrottleConfig) -> ThrottleEvent {
    let auth = ctx.auth_context();
    let api = &ctx.api;
    let api_tenant = tenant_from_context(&api.context);
    let user = username_with_tenant(&auth.username, &api_tenant);
    let api_key = api_throttle_key(&api.context, &api.version);

    let api_tier = api
        .tier
        .clone()
        .filter(|t| !t.as_ref().is_empty())
        .unwrap_or_default();

    // An API-level tier overrides the resource-level definition.
    let (resource_key, resource_tier) = if api_tier.is_unlimited() {
        (
            resource_throttle_key(&api.context, &api.version, &ctx.resource.path, &ctx.method),
            ctx.resource.effective_tier(),
        )
    } else {
        (api_key.clone(), api_tier.clone())
    };

    ThrottleEvent {
        message_id: ctx.request_id.clone(),
        app_key: format!("{}:{user}", auth.application_id),
        app_tier: auth.application_tier.to_string(),
        api_key: api_key.clone(),
        api_tier: api_tier.to_string(),
        subscription_key: subscription_throttle_key(&auth.application_id, &api.context, &api.version),
        subscription_tier: auth.subscription_tier.to_string(),
        resource_key,
        resource_tier: resource_tier.to_string(),
        user_id: user,
        api_context: api.context.clone(),
        api_version: api.version.clone(),
        app_tenant: if auth.subscriber_tenant_domain.is_empty() {
            SUPER_TENANT_DOMAIN.to_string()
        } else {
            auth.subscriber_tenant_domain.clone()
        },
        api_tenant,
        app_id: auth.application_id.clone(),
        api_name: api.name.clone(),
        properties: build_properties(ctx, config).to_string(),
    }
}

/// Effective API-level tier, falling back to unlimited.
#[must_use]
pub fn effective_api_tier(api: &palisade_core::store::models::Api) -> TierName {
    api.tier
        .clone()
        .filter(|t| !t.as_ref().is_empty())
        .unwrap_or_default()
}

fn build_properties(ctx: &RequestContext, config: &ThrottleConfig) -> Value {
    let mut props = Map::new();

    match ctx.client_ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            props.insert("ip".to_string(), json!(i64::from(u32::from(v4))));
            props.insert("ipv6".to_string(), json!(0));
        }
        Ok(IpAddr::V6(v6)) => {
            // 128-bit values do not survive as JSON numbers; publish the
            // decimal string form.
            props.insert("ipv6".to_string(), json!(u128::from(v6).to_string()));
            props.insert("ip".to_string(), json!(0));
        }
        Err(e) => {
            if !ctx.client_ip.is_empty() {
                tracing::error!(ip = %ctx.client_ip, error = %e, "could not parse caller address");
            }
            props.insert("ip".to_string(), json!(0));
            props.insert("ipv6".to_string(), json!(0));
        }
    }

    if config.header_conditions_enabled {
        for (name, value) in ctx.headers() {
            // Credentials and the path pseudo-header never leave the node.
            if ctx.protected_headers().contains(name) || name == PATH_HEADER {
                continue;
            }
            props.insert(name.clone(), json!(value));
        }
    }

    if config.query_conditions_enabled {
        for (name, value) in ctx.query_params() {
            if ctx.query_to_remove.contains(name) {
                continue;
            }
            props.insert(name.clone(), json!(value));
        }
    }

    if config.jwt_claim_conditions_enabled {
        if let Some(auth) = &ctx.auth {
            if let Ok(parsed) = palisade_auth::token::parse(&auth.raw_token) {
                if let Some(sub) = &parsed.claims.sub {
                    props.insert("sub".to_string(), json!(sub));
                }
                if let Some(iss) = &parsed.claims.iss {
                    props.insert("iss".to_string(), json!(iss));
                }
                for (claim, value) in parsed.claims.extra {
                    props.insert(claim, value);
                }
            }
        }
    }

    // Custom throttle properties arrive as `key=value` pairs.
    if let Some(custom) = ctx.properties.get(CUSTOM_THROTTLE_PROPERTIES) {
        for pair in custom.split_whitespace() {
            if let Some((key, value)) = pair.split_once('=') {
                props.insert(key.to_string(), json!(value));
            } else {
                tracing::debug!(pair, "ignoring malformed custom throttle property");
            }
        }
    }

    Value::Object(props)
}
