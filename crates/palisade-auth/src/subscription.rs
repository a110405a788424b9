//! Subscription validation against the subscription store.

use std::sync::Arc;

use palisade_core::error::AuthErrorKind;
use palisade_core::store::SubscriptionStore;
use palisade_core::store::models::Api;
use palisade_core::types::{KeyType, TierName};

/// Application and tier data resolved for an authorized credential.
#[derive(Debug, Clone)]
pub struct SubscriptionValidation {
    /// UUID of the consuming application.
    pub application_id: String,
    /// Name of the consuming application.
    pub application_name: String,
    /// Application-level tier.
    pub application_tier: TierName,
    /// Subscriber owning the application.
    pub subscriber: String,
    /// Subscription-level tier.
    pub subscription_tier: TierName,
    /// Tenant domain of the subscriber.
    pub tenant_domain: String,
    /// Key environment the mapping was created for.
    pub key_type: KeyType,
    /// Whether traffic stops when the subscription quota is reached.
    pub stop_on_quota_reach: bool,
    /// Burst limit in requests per minute; 0 disables the burst gate.
    pub spike_arrest_limit: u32,
}

/// Resolve the application and subscription for a consumer key.
///
/// # Errors
///
/// Returns the denial kind when the key maps to no application, the
/// subscription is absent or inactive, the API is not published, or the
/// credential was issued for a different key environment.
pub fn validate_subscription(
    store: &SubscriptionStore,
    api: &Api,
    consumer_key: &str,
    key_manager: &str,
    token_key_type: KeyType,
) -> Result<SubscriptionValidation, AuthErrorKind> {
    let mapping = store
        .key_mapping(consumer_key, key_manager)
        .ok_or(AuthErrorKind::SubscriptionInactive)?;

    let mapping_key_type = KeyType::parse(&mapping.key_type);
    if mapping_key_type != token_key_type {
        tracing::debug!(
            consumer_key,
            expected = %mapping_key_type,
            got = %token_key_type,
            "credential key environment mismatch"
        );
        return Err(AuthErrorKind::IncorrectTokenType);
    }

    let application = store
        .application_by_id(&mapping.app_uuid)
        .ok_or(AuthErrorKind::SubscriptionInactive)?;

    if !api.is_published() {
        tracing::debug!(api = %api.name, state = %api.lifecycle_state, "API is not published");
        return Err(AuthErrorKind::IncorrectApiResource);
    }

    let subscription = store
        .subscription_by_ids(&application.uuid, &api.uuid)
        .ok_or(AuthErrorKind::SubscriptionInactive)?;
    if !subscription.is_active() {
        tracing::debug!(
            app = %application.name,
            api = %api.name,
            state = %subscription.state,
            "subscription is not active"
        );
        return Err(AuthErrorKind::SubscriptionInactive);
    }

    Ok(build_validation(store, &application, &subscription.policy, mapping_key_type))
}

fn build_validation(
    store: &SubscriptionStore,
    application: &palisade_core::store::models::Application,
    subscription_policy: &str,
    key_type: KeyType,
) -> SubscriptionValidation {
    // Policy entities refine the tier; a missing entity leaves the name.
    let app_tier = store
        .application_policy_by_name(&application.policy)
        .map_or_else(|| TierName::new(application.policy.clone()), |p| TierName::new(p.name.clone()));

    let (sub_tier, stop_on_quota_reach, spike_arrest_limit) = store
        .subscription_policy_by_name(subscription_policy)
        .map_or(
            (TierName::new(subscription_policy), true, 0),
            |p| (TierName::new(p.name.clone()), p.stop_on_quota_reach, p.rate_limit),
        );

    SubscriptionValidation {
        application_id: application.uuid.clone(),
        application_name: application.name.clone(),
        application_tier: app_tier,
        subscriber: application.owner.clone(),
        subscription_tier: sub_tier,
        tenant_domain: application.tenant_domain.clone(),
        key_type,
        stop_on_quota_reach,
        spike_arrest_limit,
    }
}
