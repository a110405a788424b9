//! The filter trait and the short-circuiting chain engine.

pub mod cors;
pub mod mediation;

use async_trait::async_trait;

use crate::context::RequestContext;

pub use cors::CorsFilter;
pub use mediation::MediationFilter;

/// One stage of the request-authorization pipeline.
///
/// Filters are stateless with respect to other requests; any shared state
/// they consult (token caches, the subscription store) must be safe for
/// unsynchronized concurrent reads.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Process the request. Returning `false` stops the chain; whatever
    /// denial the filter wrote into the context becomes the verdict.
    async fn handle(&self, ctx: &mut RequestContext) -> bool;
}

/// Ordered, short-circuiting filter chain.
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    /// Build a chain from filters in execution order.
    #[must_use]
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Run the chain. Returns `true` when every filter proceeded (ALLOW).
    ///
    /// On the first `deny` the chain stops immediately and the denial left
    /// in the context is the verdict.
    pub async fn run(&self, ctx: &mut RequestContext) -> bool {
        for filter in &self.filters {
            tracing::debug!(filter = filter.name(), request_id = %ctx.request_id, "running filter");
            if !filter.handle(ctx).await {
                tracing::debug!(
                    filter = filter.name(),
                    request_id = %ctx.request_id,
                    status = ctx.denial.as_ref().map_or(0, |d| d.status),
                    "filter denied request"
                );
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Denial;
    use crate::store::models::{Api, ResourceMeta};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_context() -> RequestContext {
        let api = Arc::new(Api {
            uuid: "api-1".to_string(),
            name: "PetStore".to_string(),
            version: "1.0.0".to_string(),
            context: "/petstore".to_string(),
            tier: None,
            lifecycle_state: "PUBLISHED".to_string(),
            organization: String::new(),
            resources: vec![],
        });
        let resource = ResourceMeta {
            path: "/pets".to_string(),
            method: "GET".to_string(),
            tier: None,
            scopes: vec![],
            disable_security: false,
            policies: vec![],
        };
        RequestContext::new(
            "req-1".to_string(),
            "GET",
            "/petstore/1.0.0/pets",
            HashMap::new(),
            HashMap::new(),
            "10.0.0.1".to_string(),
            api,
            resource,
        )
    }

    struct CountingFilter {
        calls: Arc<AtomicUsize>,
        deny: bool,
    }

    #[async_trait]
    impl Filter for CountingFilter {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, ctx: &mut RequestContext) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.deny {
                ctx.deny(Denial { status: 401, error: None });
                return false;
            }
            true
        }
    }

    #[tokio::test]
    async fn test_all_proceed_is_allow() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = FilterChain::new(vec![
            Box::new(CountingFilter { calls: calls.clone(), deny: false }),
            Box::new(CountingFilter { calls: calls.clone(), deny: false }),
        ]);
        let mut ctx = test_context();
        assert!(chain.run(&mut ctx).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(ctx.denial.is_none());
    }

    #[tokio::test]
    async fn test_deny_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = FilterChain::new(vec![
            Box::new(CountingFilter { calls: calls.clone(), deny: true }),
            Box::new(CountingFilter { calls: calls.clone(), deny: false }),
        ]);
        let mut ctx = test_context();
        assert!(!chain.run(&mut ctx).await);
        // The second filter never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.denial.as_ref().unwrap().status, 401);
    }
}
