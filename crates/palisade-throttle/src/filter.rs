//! The throttling filter.
//!
//! Levels are checked in a fixed priority order: blocklist, hard limit,
//! custom policy, subscription burst, subscription, application, API,
//! resource. The first violated level supplies the verdict and error code.
//! On allow, the usage event is handed to the publisher and the request
//! proceeds without waiting on it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use palisade_core::config::ThrottleConfig;
use palisade_core::context::RequestContext;
use palisade_core::error::ThrottleLevel;
use palisade_core::filter::Filter;
use palisade_core::types::username_with_tenant;

use crate::data::{TemplateVars, ThrottleDataHolder};
use crate::event::{
    self, api_throttle_key, build_event, resource_throttle_key, subscription_throttle_key,
    tenant_from_context,
};
use crate::local::LocalGates;
use crate::publish::EventSink;

/// Property key recording why a request was throttled out.
pub const THROTTLE_OUT_REASON: &str = "throttleOutReason";

const RETRY_AFTER: &str = "retry-after";

/// Filter computing the throttle verdict and publishing usage events.
pub struct ThrottleFilter {
    data: Arc<ThrottleDataHolder>,
    gates: Arc<LocalGates>,
    sink: Arc<dyn EventSink>,
    config: ThrottleConfig,
}

impl ThrottleFilter {
    /// Wire the filter to its collaborators.
    #[must_use]
    pub fn new(
        data: Arc<ThrottleDataHolder>,
        gates: Arc<LocalGates>,
        sink: Arc<dyn EventSink>,
        config: ThrottleConfig,
    ) -> Self {
        Self {
            data,
            gates,
            sink,
            config,
        }
    }

    /// Evaluate all levels in priority order.
    ///
    /// Returns the violated level and, when a remote decision supplied one,
    /// the reset timestamp in epoch milliseconds.
    fn evaluate(&self, ctx: &RequestContext) -> Option<(ThrottleLevel, Option<i64>)> {
        let auth = ctx.auth_context();
        let api = &ctx.api;
        let api_tenant = tenant_from_context(&api.context);
        let user = username_with_tenant(&auth.username, &api_tenant);

        let api_key = api_throttle_key(&api.context, &api.version);
        let resource_key =
            resource_throttle_key(&api.context, &api.version, &ctx.resource.path, &ctx.method);
        let subscription_key =
            subscription_throttle_key(&auth.application_id, &api.context, &api.version);
        let app_key = format!("{}:{user}", auth.application_id);

        // 1. Blocking conditions.
        if self.data.has_blocking_conditions() {
            let app_block_key = format!("{}:{}", auth.subscriber, auth.application_name);
            let sub_block_key = format!(
                "{}:{}:{}-{}:{}",
                api.context, api.version, auth.subscriber, auth.application_name, auth.key_type
            );
            if self.data.is_request_blocked(
                &api.context,
                &app_block_key,
                &user,
                &ctx.client_ip,
                &sub_block_key,
                &api_tenant,
            ) {
                tracing::debug!(
                    api = %api.context,
                    application = %app_block_key,
                    user = %user,
                    "request violates a blocking condition"
                );
                return Some((ThrottleLevel::Blocked, None));
            }
        }

        // 2. Deployment hard limit.
        if !self.gates.check_hard_limit(&api_key) {
            return Some((ThrottleLevel::HardLimit, None));
        }

        // 3. Custom policies, via key templates.
        let app_tenant = if auth.subscriber_tenant_domain.is_empty() {
            api_tenant.clone()
        } else {
            auth.subscriber_tenant_domain.clone()
        };
        let vars = TemplateVars {
            app_key: &app_key,
            api_key: &api_key,
            subscription_key: &subscription_key,
            resource_key: &resource_key,
            user_id: &user,
            api_context: &api.context,
            api_version: &api.version,
            app_tenant: &app_tenant,
            api_tenant: &api_tenant,
            client_ip: &ctx.client_ip,
        };
        if let Some(reset_at) = self.data.custom_policy_hit(&vars) {
            return Some((ThrottleLevel::CustomPolicy, Some(reset_at)));
        }

        // 4. Subscription burst (spike arrest).
        if auth.spike_arrest_limit > 0
            && !self
                .gates
                .check_burst(&format!("{subscription_key}:burst"), auth.spike_arrest_limit)
        {
            return Some((ThrottleLevel::SubscriptionBurst, None));
        }

        // 5. Subscription level.
        if let Some(reset_at) = self.data.is_throttled(&subscription_key) {
            if auth.stop_on_quota_reach {
                return Some((ThrottleLevel::Subscription, Some(reset_at)));
            }
            tracing::debug!(key = %subscription_key, "quota exceeded but stopOnQuotaReach is off");
        }

        // 6. Application level.
        if let Some(reset_at) = self.data.is_throttled(&app_key) {
            return Some((ThrottleLevel::Application, Some(reset_at)));
        }

        // 7/8. API level wins over resource level when an API tier is set.
        let api_tier = event::effective_api_tier(api);
        let (level, key, tier) = if api_tier.is_unlimited() {
            (ThrottleLevel::Resource, resource_key, ctx.resource.effective_tier())
        } else {
            (ThrottleLevel::Api, api_key, api_tier)
        };
        if !tier.is_unlimited() {
            if let Some(reset_at) = self.data.is_throttled(&key) {
                return Some((level, Some(reset_at)));
            }
        }

        None
    }
}

#[async_trait]
impl Filter for ThrottleFilter {
    fn name(&self) -> &'static str {
        "throttling"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> bool {
        if !self.config.global_publishing_enabled {
            return true;
        }
        if ctx.auth.is_none() {
            // Nothing to key the decision on; the authentication filter
            // denies unauthenticated traffic before this point.
            return true;
        }

        if let Some((level, reset_at)) = self.evaluate(ctx) {
            ctx.properties
                .insert(THROTTLE_OUT_REASON.to_string(), level.reason().to_string());
            if let Some(reset_at) = reset_at {
                let secs = (reset_at - Utc::now().timestamp_millis()).max(0) / 1000 + 1;
                ctx.add_header(RETRY_AFTER, secs.to_string());
            }
            ctx.deny(level.denial());
            return false;
        }

        self.sink.publish(build_event(ctx, &self.config));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ThrottleEvent;
    use palisade_core::context::AuthenticationContext;
    use palisade_core::store::models::{Api, ResourceMeta};
    use palisade_core::types::TierName;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<ThrottleEvent>>,
    }

    impl EventSink for CollectingSink {
        fn publish(&self, event: ThrottleEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn context(api_tier: Option<&str>, resource_tier: Option<&str>) -> RequestContext {
        let api = Arc::new(Api {
            uuid: "api-1".to_string(),
            name: "PetStore".to_string(),
            version: "1.0.0".to_string(),
            context: "/petstore".to_string(),
            tier: api_tier.map(TierName::new),
            lifecycle_state: "PUBLISHED".to_string(),
            organization: String::new(),
            resources: vec![],
        });
        let resource = ResourceMeta {
            path: "/pets".to_string(),
            method: "GET".to_string(),
            tier: resource_tier.map(TierName::new),
            scopes: vec![],
            disable_security: false,
            policies: vec![],
        };
        let mut ctx = RequestContext::new(
            "msg-1".to_string(),
            "GET",
            "/petstore/1.0.0/pets",
            HashMap::new(),
            HashMap::new(),
            "10.0.0.1".to_string(),
            api,
            resource,
        );
        ctx.auth = Some(AuthenticationContext {
            authenticated: true,
            username: "alice".to_string(),
            application_id: "app-1".to_string(),
            application_name: "ShopApp".to_string(),
            application_tier: TierName::new("50PerMin"),
            subscriber: "alice".to_string(),
            subscription_tier: TierName::new("Gold"),
            stop_on_quota_reach: true,
            ..AuthenticationContext::default()
        });
        ctx
    }

    fn filter_with(data: Arc<ThrottleDataHolder>, sink: Arc<CollectingSink>) -> ThrottleFilter {
        ThrottleFilter::new(
            data,
            Arc::new(LocalGates::new(0)),
            sink,
            ThrottleConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_allowed_request_publishes_event() {
        let sink = Arc::new(CollectingSink::default());
        let filter = filter_with(Arc::new(ThrottleDataHolder::new()), Arc::clone(&sink));
        let mut ctx = context(None, Some("Bronze"));

        assert!(filter.handle(&mut ctx).await);
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].app_key, "app-1:alice@carbon.super");
    }

    #[tokio::test]
    async fn test_subscription_throttled_is_429() {
        let data = Arc::new(ThrottleDataHolder::new());
        data.add_decision(
            "app-1:/petstore:1.0.0",
            Utc::now().timestamp_millis() + 30_000,
        );
        let sink = Arc::new(CollectingSink::default());
        let filter = filter_with(data, Arc::clone(&sink));
        let mut ctx = context(None, None);

        assert!(!filter.handle(&mut ctx).await);
        let denial = ctx.denial.as_ref().expect("denial");
        assert_eq!(denial.status, 429);
        assert_eq!(denial.error.as_ref().unwrap().code, 900804);
        assert!(ctx.headers_to_add.iter().any(|(k, _)| k == RETRY_AFTER));
        assert_eq!(
            ctx.properties.get(THROTTLE_OUT_REASON).map(String::as_str),
            Some("SUBSCRIPTION_LIMIT_EXCEEDED")
        );
        // No event is published for a throttled request.
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_on_quota_reach_off_lets_traffic_through() {
        let data = Arc::new(ThrottleDataHolder::new());
        data.add_decision(
            "app-1:/petstore:1.0.0",
            Utc::now().timestamp_millis() + 30_000,
        );
        let sink = Arc::new(CollectingSink::default());
        let filter = filter_with(data, Arc::clone(&sink));
        let mut ctx = context(None, None);
        ctx.auth.as_mut().unwrap().stop_on_quota_reach = false;

        assert!(filter.handle(&mut ctx).await);
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_api_tier_wins_over_resource_tier() {
        let data = Arc::new(ThrottleDataHolder::new());
        // Both level keys are throttled; the API-level decision must win
        // because the API tier is set.
        data.add_decision("/petstore:1.0.0", Utc::now().timestamp_millis() + 30_000);
        data.add_decision(
            "/petstore/1.0.0/pets:GET",
            Utc::now().timestamp_millis() + 30_000,
        );
        let sink = Arc::new(CollectingSink::default());
        let filter = filter_with(data, Arc::clone(&sink));
        let mut ctx = context(Some("Gold"), Some("Bronze"));

        assert!(!filter.handle(&mut ctx).await);
        assert_eq!(ctx.denial.as_ref().unwrap().error.as_ref().unwrap().code, 900800);
    }

    #[tokio::test]
    async fn test_resource_level_when_no_api_tier() {
        let data = Arc::new(ThrottleDataHolder::new());
        data.add_decision(
            "/petstore/1.0.0/pets:GET",
            Utc::now().timestamp_millis() + 30_000,
        );
        let sink = Arc::new(CollectingSink::default());
        let filter = filter_with(data, Arc::clone(&sink));
        let mut ctx = context(None, Some("Bronze"));

        assert!(!filter.handle(&mut ctx).await);
        assert_eq!(ctx.denial.as_ref().unwrap().error.as_ref().unwrap().code, 900802);
    }

    #[tokio::test]
    async fn test_unlimited_resource_tier_skips_decision() {
        let data = Arc::new(ThrottleDataHolder::new());
        data.add_decision(
            "/petstore/1.0.0/pets:GET",
            Utc::now().timestamp_millis() + 30_000,
        );
        let sink = Arc::new(CollectingSink::default());
        let filter = filter_with(data, Arc::clone(&sink));
        let mut ctx = context(None, None);

        assert!(filter.handle(&mut ctx).await);
    }

    #[tokio::test]
    async fn test_blocked_application_is_403_with_priority() {
        let data = Arc::new(ThrottleDataHolder::new());
        data.block_application("alice:ShopApp");
        // Even with a subscription-level decision present, the blocklist
        // wins the priority order.
        data.add_decision(
            "app-1:/petstore:1.0.0",
            Utc::now().timestamp_millis() + 30_000,
        );
        let sink = Arc::new(CollectingSink::default());
        let filter = filter_with(data, Arc::clone(&sink));
        let mut ctx = context(None, None);

        assert!(!filter.handle(&mut ctx).await);
        let denial = ctx.denial.as_ref().unwrap();
        assert_eq!(denial.status, 403);
        assert_eq!(denial.error.as_ref().unwrap().code, 900805);
    }

    #[tokio::test]
    async fn test_custom_policy_template() {
        let data = Arc::new(ThrottleDataHolder::new());
        data.add_key_template("per-user", "$userId");
        data.add_decision(
            "alice@carbon.super",
            Utc::now().timestamp_millis() + 30_000,
        );
        let sink = Arc::new(CollectingSink::default());
        let filter = filter_with(data, Arc::clone(&sink));
        let mut ctx = context(None, None);

        assert!(!filter.handle(&mut ctx).await);
        assert_eq!(ctx.denial.as_ref().unwrap().error.as_ref().unwrap().code, 900806);
    }

    #[tokio::test]
    async fn test_burst_gate_trips() {
        let sink = Arc::new(CollectingSink::default());
        let filter = filter_with(Arc::new(ThrottleDataHolder::new()), Arc::clone(&sink));
        let mut denied = 0;
        for _ in 0..20 {
            let mut ctx = context(None, None);
            ctx.auth.as_mut().unwrap().spike_arrest_limit = 3;
            if !filter.handle(&mut ctx).await {
                assert_eq!(
                    ctx.denial.as_ref().unwrap().error.as_ref().unwrap().code,
                    900807
                );
                denied += 1;
            }
        }
        assert!(denied > 0);
    }

    #[tokio::test]
    async fn test_publishing_disabled_skips_filter() {
        let sink = Arc::new(CollectingSink::default());
        let filter = ThrottleFilter::new(
            Arc::new(ThrottleDataHolder::new()),
            Arc::new(LocalGates::new(0)),
            Arc::clone(&sink),
            ThrottleConfig {
                global_publishing_enabled: false,
                ..ThrottleConfig::default()
            },
        );
        let mut ctx = context(None, None);
        assert!(filter.handle(&mut ctx).await);
        assert!(sink.events.lock().unwrap().is_empty());
    }
}
