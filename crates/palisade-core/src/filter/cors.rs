//! CORS filter.
//!
//! Preflight requests from an allowed origin are answered directly by the
//! enforcer: the chain stops with a 200 denial carrying the CORS response
//! headers and no error body. Simple requests get their response headers
//! recorded and the chain proceeds.

use async_trait::async_trait;

use crate::config::CorsConfig;
use crate::context::{Denial, RequestContext};
use crate::filter::Filter;

const ORIGIN: &str = "origin";
const REQUEST_METHOD: &str = "access-control-request-method";
const ALLOW_ORIGIN: &str = "access-control-allow-origin";
const ALLOW_METHODS: &str = "access-control-allow-methods";
const ALLOW_HEADERS: &str = "access-control-allow-headers";
const EXPOSE_HEADERS: &str = "access-control-expose-headers";
const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";

/// Filter answering CORS preflights and annotating simple requests.
pub struct CorsFilter {
    config: CorsConfig,
}

impl CorsFilter {
    /// Create the filter from its configuration.
    #[must_use]
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn allowed_origin(&self, origin: &str) -> Option<String> {
        if self.config.allow_origins.iter().any(|o| o == "*") {
            // With credentials the wildcard must be echoed as the origin.
            if self.config.allow_credentials {
                return Some(origin.to_string());
            }
            return Some("*".to_string());
        }
        self.config
            .allow_origins
            .iter()
            .find(|o| o.as_str() == origin)
            .cloned()
    }

    fn apply_response_headers(&self, ctx: &mut RequestContext, origin: &str) {
        ctx.add_header(ALLOW_ORIGIN, origin);
        if self.config.allow_credentials {
            ctx.add_header(ALLOW_CREDENTIALS, "true");
        }
        if !self.config.expose_headers.is_empty() {
            ctx.add_header(EXPOSE_HEADERS, self.config.expose_headers.join(", "));
        }
    }
}

#[async_trait]
impl Filter for CorsFilter {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> bool {
        if !self.config.enabled {
            return true;
        }
        let Some(origin) = ctx.header(ORIGIN).map(ToString::to_string) else {
            return true;
        };

        let is_preflight = ctx.method == "OPTIONS" && ctx.header(REQUEST_METHOD).is_some();
        let allowed = self.allowed_origin(&origin);

        if is_preflight {
            // The preflight never reaches the upstream; answer it here.
            if let Some(allowed) = allowed {
                self.apply_response_headers(ctx, &allowed);
                ctx.add_header(ALLOW_METHODS, self.config.allow_methods.join(", "));
                ctx.add_header(ALLOW_HEADERS, self.config.allow_headers.join(", "));
            }
            ctx.deny(Denial { status: 200, error: None });
            return false;
        }

        if let Some(allowed) = allowed {
            self.apply_response_headers(ctx, &allowed);
        }
        true
    }
}
