//! Mediation-policy filter.
//!
//! Applies the declarative per-resource actions in declaration order.
//! Unknown action names and missing parameters fail closed with a
//! configuration error rather than silently forwarding the request.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::context::{Denial, ErrorBody, RequestContext};
use crate::error::AuthErrorKind;
use crate::filter::Filter;
use crate::store::models::PolicySpec;

// Action names as they appear in resource policy declarations.
const SET_HEADER: &str = "SET_HEADER";
const RENAME_HEADER: &str = "RENAME_HEADER";
const REMOVE_HEADER: &str = "REMOVE_HEADER";
const ADD_QUERY: &str = "ADD_QUERY";
const REMOVE_QUERY: &str = "REMOVE_QUERY";
const REWRITE_METHOD: &str = "REWRITE_METHOD";
const CALL_POLICY_ENGINE: &str = "CALL_POLICY_ENGINE";

/// Filter applying declarative mediation actions per resource.
pub struct MediationFilter {
    http: reqwest::Client,
}

impl Default for MediationFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl MediationFilter {
    /// Create the filter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    fn config_error(ctx: &mut RequestContext, description: String) -> bool {
        tracing::error!(request_id = %ctx.request_id, "{description}");
        ctx.deny(Denial {
            status: 500,
            error: Some(ErrorBody {
                code: AuthErrorKind::General.code(),
                message: "Internal Server Error".to_string(),
                description,
            }),
        });
        false
    }

    fn param<'a>(
        spec: &'a PolicySpec,
        name: &str,
    ) -> Result<&'a str, String> {
        spec.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| format!("mediation policy {} is missing parameter {name}", spec.action))
    }

    async fn call_policy_engine(
        &self,
        ctx: &mut RequestContext,
        spec: &PolicySpec,
    ) -> Result<bool, String> {
        let server_url = Self::param(spec, "serverUrl")?;
        let policy = Self::param(spec, "policy")?;
        let rule = spec.params.get("rule").map_or("allow", String::as_str);

        let input = json!({
            "input": {
                "method": ctx.method,
                "path": ctx.path,
                "headers": ctx.headers(),
                "apiContext": ctx.api.context,
                "apiVersion": ctx.api.version,
                "clientIp": ctx.client_ip,
                "authenticationContext": ctx.auth.as_ref().map(|auth| json!({
                    "username": auth.username,
                    "applicationName": auth.application_name,
                    "keyType": auth.key_type.as_str(),
                    "scopes": auth.scopes,
                })),
            }
        });

        let url = format!("{}/v1/data/{policy}/{rule}", server_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&input)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        let body: serde_json::Value = match response {
            Ok(resp) => match resp.json().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(request_id = %ctx.request_id, error = %e, "policy engine returned an unreadable body");
                    ctx.deny(AuthErrorKind::PolicyEngineFailure.denial());
                    return Ok(false);
                }
            },
            Err(e) => {
                tracing::error!(request_id = %ctx.request_id, error = %e, "policy engine call failed");
                ctx.deny(AuthErrorKind::PolicyEngineFailure.denial());
                return Ok(false);
            }
        };

        if body.get("result").and_then(serde_json::Value::as_bool) == Some(true) {
            Ok(true)
        } else {
            tracing::debug!(request_id = %ctx.request_id, policy, "policy engine denied the request");
            ctx.deny(AuthErrorKind::PolicyEngineDenied.denial());
            Ok(false)
        }
    }
}

#[async_trait]
impl Filter for MediationFilter {
    fn name(&self) -> &'static str {
        "mediation"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> bool {
        let policies = ctx.resource.policies.clone();
        for spec in &policies {
            let applied = match spec.action.as_str() {
                SET_HEADER => Self::param(spec, "headerName").and_then(|name| {
                    let value = Self::param(spec, "headerValue")?;
                    ctx.add_header(name.to_string(), value.to_string());
                    Ok(true)
                }),
                RENAME_HEADER => Self::param(spec, "currentHeaderName").and_then(|from| {
                    let to = Self::param(spec, "updatedHeaderName")?;
                    if let Some(value) = ctx.header(from).map(ToString::to_string) {
                        ctx.remove_header(from.to_string());
                        ctx.add_header(to.to_string(), value);
                    }
                    Ok(true)
                }),
                REMOVE_HEADER => Self::param(spec, "headerName").map(|name| {
                    ctx.remove_header(name.to_string());
                    true
                }),
                ADD_QUERY => Self::param(spec, "paramName").and_then(|name| {
                    let value = Self::param(spec, "paramValue")?;
                    ctx.query_to_add.push((name.to_string(), value.to_string()));
                    Ok(true)
                }),
                REMOVE_QUERY => Self::param(spec, "paramName").map(|name| {
                    ctx.query_to_remove.push(name.to_string());
                    true
                }),
                REWRITE_METHOD => Self::param(spec, "updatedMethod").map(|method| {
                    ctx.rewritten_method = Some(method.to_ascii_uppercase());
                    true
                }),
                CALL_POLICY_ENGINE => match self.call_policy_engine(ctx, spec).await {
                    Ok(proceed) => {
                        if !proceed {
                            return false;
                        }
                        Ok(true)
                    }
                    Err(missing) => Err(missing),
                },
                unknown => Err(format!("unknown mediation policy action: {unknown}")),
            };

            if let Err(description) = applied {
                return Self::config_error(ctx, description);
            }
        }
        true
    }
}
