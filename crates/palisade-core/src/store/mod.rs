//! In-memory subscription data store.
//!
//! The store is an indexed cache of control-plane entities, fully
//! push-driven: the sync collaborator installs snapshots and deltas, the
//! request path only reads. Entities are installed as `Arc`s and replaced
//! wholesale so a concurrent reader never observes a partially updated
//! entity. The store is a cache, not a system of record.

pub mod models;

use std::sync::Arc;

use dashmap::DashMap;

pub use models::{
    Api, ApiPolicy, Application, ApplicationKeyMapping, ApplicationPolicy, PolicySpec,
    ResourceMeta, Subscription, SubscriptionPolicy,
};

/// Indexed, concurrently readable cache of subscription entities.
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    apis: DashMap<String, Arc<Api>>,
    applications: DashMap<String, Arc<Application>>,
    subscriptions: DashMap<String, Arc<Subscription>>,
    key_mappings: DashMap<String, Arc<ApplicationKeyMapping>>,
    app_policies: DashMap<String, Arc<ApplicationPolicy>>,
    subscription_policies: DashMap<String, Arc<SubscriptionPolicy>>,
    api_policies: DashMap<String, Arc<ApiPolicy>>,
}

impl SubscriptionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Read path (request handling; lock-free map lookups)
    // ------------------------------------------------------------------

    /// Look up an API by its base path and version.
    #[must_use]
    pub fn api_by_context_and_version(&self, context: &str, version: &str) -> Option<Arc<Api>> {
        self.apis
            .get(&models::api_key(context, version))
            .map(|e| Arc::clone(e.value()))
    }

    /// Look up an application by UUID.
    #[must_use]
    pub fn application_by_id(&self, uuid: &str) -> Option<Arc<Application>> {
        self.applications.get(uuid).map(|e| Arc::clone(e.value()))
    }

    /// Look up the subscription binding an application to an API.
    #[must_use]
    pub fn subscription_by_ids(&self, app_uuid: &str, api_uuid: &str) -> Option<Arc<Subscription>> {
        self.subscriptions
            .get(&models::subscription_key(app_uuid, api_uuid))
            .map(|e| Arc::clone(e.value()))
    }

    /// Look up the application a client key is mapped to.
    #[must_use]
    pub fn key_mapping(&self, consumer_key: &str, key_manager: &str) -> Option<Arc<ApplicationKeyMapping>> {
        self.key_mappings
            .get(&models::key_mapping_key(consumer_key, key_manager))
            .map(|e| Arc::clone(e.value()))
    }

    /// Look up an application-level policy by name.
    #[must_use]
    pub fn application_policy_by_name(&self, name: &str) -> Option<Arc<ApplicationPolicy>> {
        self.app_policies.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Look up a subscription-level policy by name.
    #[must_use]
    pub fn subscription_policy_by_name(&self, name: &str) -> Option<Arc<SubscriptionPolicy>> {
        self.subscription_policies.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Look up an API-level policy by name.
    #[must_use]
    pub fn api_policy_by_name(&self, name: &str) -> Option<Arc<ApiPolicy>> {
        self.api_policies.get(name).map(|e| Arc::clone(e.value()))
    }

    // ------------------------------------------------------------------
    // Write path (control-plane sync; atomic entity replacement)
    // ------------------------------------------------------------------

    /// Install or replace one API.
    pub fn upsert_api(&self, api: Api) {
        self.apis.insert(api.context_version_key(), Arc::new(api));
    }

    /// Remove one API.
    pub fn remove_api(&self, context: &str, version: &str) {
        self.apis.remove(&models::api_key(context, version));
    }

    /// Install or replace one application.
    pub fn upsert_application(&self, app: Application) {
        self.applications.insert(app.uuid.clone(), Arc::new(app));
    }

    /// Remove one application by UUID.
    pub fn remove_application(&self, uuid: &str) {
        self.applications.remove(uuid);
    }

    /// Install or replace one subscription.
    pub fn upsert_subscription(&self, sub: Subscription) {
        self.subscriptions.insert(sub.pair_key(), Arc::new(sub));
    }

    /// Remove one subscription by its (application, API) pair.
    pub fn remove_subscription(&self, app_uuid: &str, api_uuid: &str) {
        self.subscriptions.remove(&models::subscription_key(app_uuid, api_uuid));
    }

    /// Install or replace one key mapping.
    pub fn upsert_key_mapping(&self, mapping: ApplicationKeyMapping) {
        self.key_mappings.insert(mapping.lookup_key(), Arc::new(mapping));
    }

    /// Remove one key mapping.
    pub fn remove_key_mapping(&self, consumer_key: &str, key_manager: &str) {
        self.key_mappings.remove(&models::key_mapping_key(consumer_key, key_manager));
    }

    /// Install or replace one application policy.
    pub fn upsert_application_policy(&self, policy: ApplicationPolicy) {
        self.app_policies.insert(policy.name.clone(), Arc::new(policy));
    }

    /// Install or replace one subscription policy.
    pub fn upsert_subscription_policy(&self, policy: SubscriptionPolicy) {
        self.subscription_policies.insert(policy.name.clone(), Arc::new(policy));
    }

    /// Install or replace one API policy.
    pub fn upsert_api_policy(&self, policy: ApiPolicy) {
        self.api_policies.insert(policy.name.clone(), Arc::new(policy));
    }

    // ------------------------------------------------------------------
    // Snapshot loads (replace the whole backing collection per type)
    // ------------------------------------------------------------------

    /// Replace all APIs with the given snapshot.
    pub fn replace_apis(&self, apis: Vec<Api>) {
        self.apis.clear();
        for api in apis {
            self.upsert_api(api);
        }
    }

    /// Replace all applications with the given snapshot.
    pub fn replace_applications(&self, apps: Vec<Application>) {
        self.applications.clear();
        for app in apps {
            self.upsert_application(app);
        }
    }

    /// Replace all subscriptions with the given snapshot.
    pub fn replace_subscriptions(&self, subs: Vec<Subscription>) {
        self.subscriptions.clear();
        for sub in subs {
            self.upsert_subscription(sub);
        }
    }

    /// Replace all key mappings with the given snapshot.
    pub fn replace_key_mappings(&self, mappings: Vec<ApplicationKeyMapping>) {
        self.key_mappings.clear();
        for mapping in mappings {
            self.upsert_key_mapping(mapping);
        }
    }

    /// Replace all application policies with the given snapshot.
    pub fn replace_application_policies(&self, policies: Vec<ApplicationPolicy>) {
        self.app_policies.clear();
        for policy in policies {
            self.upsert_application_policy(policy);
        }
    }

    /// Replace all subscription policies with the given snapshot.
    pub fn replace_subscription_policies(&self, policies: Vec<SubscriptionPolicy>) {
        self.subscription_policies.clear();
        for policy in policies {
            self.upsert_subscription_policy(policy);
        }
    }

    /// Replace all API policies with the given snapshot.
    pub fn replace_api_policies(&self, policies: Vec<ApiPolicy>) {
        self.api_policies.clear();
        for policy in policies {
            self.upsert_api_policy(policy);
        }
    }
}
