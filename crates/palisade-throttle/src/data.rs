//! Throttle data held per enforcer node.
//!
//! Remote decisions, blocking conditions, and custom-policy key templates
//! are pushed by the control plane; the request path only reads. A decision
//! expires on its own reset timestamp, so a stale entry can never throttle
//! traffic forever.

use std::net::IpAddr;

use chrono::Utc;
use dashmap::DashMap;

/// An IP range used in blocking conditions. IPv4 addresses are compared in
/// their IPv6-mapped form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRange {
    /// Inclusive lower bound.
    pub start: u128,
    /// Inclusive upper bound.
    pub end: u128,
}

impl IpRange {
    /// Range covering a single address.
    #[must_use]
    pub fn single(addr: IpAddr) -> Self {
        let value = ip_to_u128(addr);
        Self { start: value, end: value }
    }

    /// Whether the address falls inside the range.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        let value = ip_to_u128(addr);
        self.start <= value && value <= self.end
    }
}

/// Numeric form of an address, IPv4-mapped when needed.
#[must_use]
pub fn ip_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Per-node throttle state, safe for unsynchronized concurrent reads.
#[derive(Debug, Default)]
pub struct ThrottleDataHolder {
    /// Throttle key -> reset timestamp in epoch milliseconds.
    decisions: DashMap<String, i64>,
    /// Custom-policy key templates, by policy name.
    key_templates: DashMap<String, String>,
    blocked_apis: DashMap<String, ()>,
    blocked_apps: DashMap<String, ()>,
    blocked_users: DashMap<String, ()>,
    blocked_subscriptions: DashMap<String, ()>,
    /// Tenant domain -> blocked IP ranges.
    blocked_ip_ranges: DashMap<String, Vec<IpRange>>,
}

impl ThrottleDataHolder {
    /// Create an empty holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Remote decisions
    // ------------------------------------------------------------------

    /// Install a throttle decision for a key, with its reset timestamp.
    pub fn add_decision(&self, key: impl Into<String>, reset_at_ms: i64) {
        self.decisions.insert(key.into(), reset_at_ms);
    }

    /// Remove a throttle decision.
    pub fn remove_decision(&self, key: &str) {
        self.decisions.remove(key);
    }

    /// Whether the key is currently throttled; returns the reset timestamp.
    ///
    /// Entries past their reset time are removed lazily on lookup.
    #[must_use]
    pub fn is_throttled(&self, key: &str) -> Option<i64> {
        let reset_at = *self.decisions.get(key)?;
        if reset_at <= Utc::now().timestamp_millis() {
            self.decisions.remove(key);
            return None;
        }
        Some(reset_at)
    }

    // ------------------------------------------------------------------
    // Custom-policy key templates
    // ------------------------------------------------------------------

    /// Install a custom-policy key template, e.g. `$userId:$apiContext`.
    pub fn add_key_template(&self, name: impl Into<String>, template: impl Into<String>) {
        self.key_templates.insert(name.into(), template.into());
    }

    /// Remove a custom-policy key template.
    pub fn remove_key_template(&self, name: &str) {
        self.key_templates.remove(name);
    }

    /// Check every key template against the decision map.
    ///
    /// Returns the latest reset timestamp among matched templates.
    #[must_use]
    pub fn custom_policy_hit(&self, vars: &TemplateVars<'_>) -> Option<i64> {
        let mut latest: Option<i64> = None;
        for entry in &self.key_templates {
            let resolved = vars.resolve(entry.value());
            if let Some(reset_at) = self.is_throttled(&resolved) {
                if latest.is_none_or(|current| reset_at > current) {
                    latest = Some(reset_at);
                }
            }
        }
        latest
    }

    // ------------------------------------------------------------------
    // Blocking conditions
    // ------------------------------------------------------------------

    /// Block an API context.
    pub fn block_api(&self, context: impl Into<String>) {
        self.blocked_apis.insert(context.into(), ());
    }

    /// Unblock an API context.
    pub fn unblock_api(&self, context: &str) {
        self.blocked_apis.remove(context);
    }

    /// Block an application (`subscriber:appName`).
    pub fn block_application(&self, key: impl Into<String>) {
        self.blocked_apps.insert(key.into(), ());
    }

    /// Unblock an application.
    pub fn unblock_application(&self, key: &str) {
        self.blocked_apps.remove(key);
    }

    /// Block a user.
    pub fn block_user(&self, user: impl Into<String>) {
        self.blocked_users.insert(user.into(), ());
    }

    /// Unblock a user.
    pub fn unblock_user(&self, user: &str) {
        self.blocked_users.remove(user);
    }

    /// Block a subscription
    /// (`context:version:subscriber-appName:keyType`).
    pub fn block_subscription(&self, key: impl Into<String>) {
        self.blocked_subscriptions.insert(key.into(), ());
    }

    /// Unblock a subscription.
    pub fn unblock_subscription(&self, key: &str) {
        self.blocked_subscriptions.remove(key);
    }

    /// Block an IP range for a tenant.
    pub fn block_ip_range(&self, tenant: impl Into<String>, range: IpRange) {
        self.blocked_ip_ranges.entry(tenant.into()).or_default().push(range);
    }

    /// Drop all IP blocks for a tenant.
    pub fn unblock_ips(&self, tenant: &str) {
        self.blocked_ip_ranges.remove(tenant);
    }

    /// Whether any blocking condition exists at all; lets the filter skip
    /// key construction on the hot path.
    #[must_use]
    pub fn has_blocking_conditions(&self) -> bool {
        !self.blocked_apis.is_empty()
            || !self.blocked_apps.is_empty()
            || !self.blocked_users.is_empty()
            || !self.blocked_subscriptions.is_empty()
            || !self.blocked_ip_ranges.is_empty()
    }

    /// Evaluate all blocking conditions for one request.
    #[must_use]
    pub fn is_request_blocked(
        &self,
        api_context: &str,
        app_block_key: &str,
        user: &str,
        client_ip: &str,
        subscription_block_key: &str,
        tenant: &str,
    ) -> bool {
        if self.blocked_apis.contains_key(api_context)
            || self.blocked_apps.contains_key(app_block_key)
            || self.blocked_users.contains_key(user)
            || self.blocked_subscriptions.contains_key(subscription_block_key)
        {
            return true;
        }
        if let Some(ranges) = self.blocked_ip_ranges.get(tenant) {
            if let Ok(addr) = client_ip.parse::<IpAddr>() {
                return ranges.iter().any(|range| range.contains(addr));
            }
        }
        false
    }
}

/// Values substituted into custom-policy key templates.
#[derive(Debug)]
pub struct TemplateVars<'a> {
    /// `$appKey`.
    pub app_key: &'a str,
    /// `$apiKey`.
    pub api_key: &'a str,
    /// `$subscriptionKey`.
    pub subscription_key: &'a str,
    /// `$resourceKey`.
    pub resource_key: &'a str,
    /// `$userId`.
    pub user_id: &'a str,
    /// `$apiContext`.
    pub api_context: &'a str,
    /// `$apiVersion`.
    pub api_version: &'a str,
    /// `$appTenant`.
    pub app_tenant: &'a str,
    /// `$apiTenant`.
    pub api_tenant: &'a str,
    /// `$clientIp`.
    pub client_ip: &'a str,
}

impl TemplateVars<'_> {
    /// Substitute every known variable into the template.
    #[must_use]
    pub fn resolve(&self, template: &str) -> String {
        // Longer names first so $apiContext is not clobbered by $apiKey.
        template
            .replace("$subscriptionKey", self.subscription_key)
            .replace("$resourceKey", self.resource_key)
            .replace("$apiContext", self.api_context)
            .replace("$apiVersion", self.api_version)
            .replace("$appTenant", self.app_tenant)
            .replace("$apiTenant", self.api_tenant)
            .replace("$clientIp", self.client_ip)
            .replace("$appKey", self.app_key)
            .replace("$apiKey", self.api_key)
            .replace("$userId", self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>() -> TemplateVars<'a> {
        TemplateVars {
            app_key: "app-1:alice@carbon.super",
            api_key: "/petstore:1.0.0",
            subscription_key: "app-1:/petstore:1.0.0",
            resource_key: "/petstore/1.0.0/pets:GET",
            user_id: "alice@carbon.super",
            api_context: "/petstore",
            api_version: "1.0.0",
            app_tenant: "carbon.super",
            api_tenant: "carbon.super",
            client_ip: "10.0.0.1",
        }
    }

    #[test]
    fn test_decision_expires_on_lookup() {
        let holder = ThrottleDataHolder::new();
        let now = Utc::now().timestamp_millis();

        holder.add_decision("live", now + 60_000);
        holder.add_decision("stale", now - 1_000);

        assert!(holder.is_throttled("live").is_some());
        assert!(holder.is_throttled("stale").is_none());
        // The stale entry was removed, not just skipped.
        assert!(holder.is_throttled("stale").is_none());
    }

    #[test]
    fn test_template_resolution() {
        let resolved = vars().resolve("$userId:$apiContext:$apiVersion");
        assert_eq!(resolved, "alice@carbon.super:/petstore:1.0.0");
    }

    #[test]
    fn test_custom_policy_hit_returns_latest_reset() {
        let holder = ThrottleDataHolder::new();
        let now = Utc::now().timestamp_millis();
        holder.add_key_template("p1", "$userId");
        holder.add_key_template("p2", "$clientIp");
        holder.add_decision("alice@carbon.super", now + 10_000);
        holder.add_decision("10.0.0.1", now + 30_000);

        let hit = holder.custom_policy_hit(&vars()).expect("custom policy hit");
        assert_eq!(hit, now + 30_000);
    }

    #[test]
    fn test_blocking_conditions() {
        let holder = ThrottleDataHolder::new();
        assert!(!holder.has_blocking_conditions());

        holder.block_application("alice:ShopApp");
        assert!(holder.has_blocking_conditions());
        assert!(holder.is_request_blocked(
            "/petstore",
            "alice:ShopApp",
            "alice@carbon.super",
            "10.0.0.1",
            "subkey",
            "carbon.super",
        ));
        assert!(!holder.is_request_blocked(
            "/petstore",
            "bob:OtherApp",
            "bob@carbon.super",
            "10.0.0.1",
            "subkey",
            "carbon.super",
        ));

        holder.unblock_application("alice:ShopApp");
        assert!(!holder.has_blocking_conditions());
    }

    #[test]
    fn test_ip_range_blocking() {
        let holder = ThrottleDataHolder::new();
        holder.block_ip_range(
            "carbon.super",
            IpRange {
                start: ip_to_u128("10.0.0.0".parse().unwrap()),
                end: ip_to_u128("10.0.0.255".parse().unwrap()),
            },
        );

        assert!(holder.is_request_blocked("/x", "a", "u", "10.0.0.42", "s", "carbon.super"));
        assert!(!holder.is_request_blocked("/x", "a", "u", "10.0.1.42", "s", "carbon.super"));
        // Conditions are tenant-scoped.
        assert!(!holder.is_request_blocked("/x", "a", "u", "10.0.0.42", "s", "acme.com"));
    }

    #[test]
    fn test_ipv6_range() {
        let range = IpRange::single("2001:db8::1".parse().unwrap());
        assert!(range.contains("2001:db8::1".parse().unwrap()));
        assert!(!range.contains("2001:db8::2".parse().unwrap()));
    }
}
