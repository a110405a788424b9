//! Check RPC wire types.
//!
//! The proxy calls `POST /check` once per request; the response is either
//! ALLOW with the accumulated mutations, or DENY with a rendered body and
//! the mapped transport status.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One inbound authorization check from the proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    /// Correlation id; generated when the proxy supplies none.
    #[serde(default)]
    pub request_id: Option<String>,
    /// HTTP method of the proxied request.
    pub method: String,
    /// Request path relative to the listener.
    pub path: String,
    /// Request headers; key case is not significant.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Query parameters.
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    /// Address the connection was accepted from.
    #[serde(default)]
    pub client_address: Option<String>,
    /// Base path of the API the proxy matched.
    pub api_context: String,
    /// Version of the API the proxy matched.
    pub api_version: String,
    /// Raw body reference, present when policy inspection needs it.
    #[serde(default)]
    pub body: Option<String>,
}

/// A header mutation applied before forwarding upstream, or attached to a
/// denial response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderOp {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// The verdict returned to the proxy.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    /// `allow` or `deny`.
    pub result: String,
    /// Mapped transport status name.
    pub status: String,
    /// HTTP status code to respond with (deny) or forward as (allow: 200).
    pub status_code: u16,
    /// Headers to add or overwrite.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers_to_add: Vec<HeaderOp>,
    /// Headers to strip before forwarding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers_to_remove: Vec<String>,
    /// Query parameters to add before forwarding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_to_add: Vec<HeaderOp>,
    /// Query parameters to strip before forwarding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_to_remove: Vec<String>,
    /// Method override requested by a mediation policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_method: Option<String>,
    /// Metadata for downstream telemetry.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Denial body, rendered per content negotiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Content type of the denial body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Map an HTTP status code onto the transport status name.
#[must_use]
pub fn transport_status(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "OK",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        _ => "INTERNAL",
    }
}
