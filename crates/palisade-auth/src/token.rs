//! JWS parsing, separate from verification.
//!
//! Parsing is cheap and cacheable; signature verification is not. The
//! parsed form keeps the raw signing input and the encoded signature so the
//! verifier never has to re-split the credential.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value;

/// Decoded JOSE header fields the enforcer cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenHeader {
    /// Signature algorithm name.
    pub alg: String,
    /// Key id selecting a JWKS entry.
    #[serde(default)]
    pub kid: Option<String>,
}

/// Decoded claim set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Subject (end user).
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiry, seconds since the epoch.
    #[serde(default)]
    pub exp: Option<i64>,
    /// Token id.
    #[serde(default)]
    pub jti: Option<String>,
    /// Authorized party (OAuth consumer key).
    #[serde(default)]
    pub azp: Option<String>,
    /// Alternative consumer key claim.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Key environment claim.
    #[serde(default)]
    pub keytype: Option<String>,
    /// Scope claim: a space-separated string or an array.
    #[serde(default)]
    pub scope: Option<Value>,
    /// Alternative scope claim used by some issuers.
    #[serde(default)]
    pub scp: Option<Value>,
    /// Everything else, kept for claim-condition publishing.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A structurally parsed, not yet verified, JWS credential.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    /// The raw credential as received.
    pub raw: String,
    /// Decoded JOSE header.
    pub header: TokenHeader,
    /// Decoded claim set.
    pub claims: TokenClaims,
    /// The encoded signature segment.
    pub signature: String,
    /// `header.payload`, the input the signature covers.
    pub signing_input: String,
}

impl ParsedToken {
    /// Stable identifier used as the cache key: the `jti` claim when
    /// present, otherwise the signature segment.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match &self.claims.jti {
            Some(jti) if !jti.is_empty() => jti,
            _ => &self.signature,
        }
    }

    /// Consumer key from the `azp` or `client_id` claim.
    #[must_use]
    pub fn consumer_key(&self) -> Option<&str> {
        self.claims
            .azp
            .as_deref()
            .or(self.claims.client_id.as_deref())
    }

    /// Scopes granted by the token, from `scope` or `scp`.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        let claim = self.claims.scope.as_ref().or(self.claims.scp.as_ref());
        match claim {
            Some(Value::String(s)) => s.split_whitespace().map(ToString::to_string).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Token parsing failures.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The credential is not three dot-separated segments.
    #[error("credential is not a JWS compact serialization")]
    Malformed,
    /// A segment is not valid base64url.
    #[error("invalid base64url segment")]
    Encoding(#[from] base64::DecodeError),
    /// A decoded segment is not valid JSON.
    #[error("invalid JSON segment: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a compact JWS without verifying it.
///
/// # Errors
///
/// Returns error when the credential is not three base64url segments of
/// JSON header and claims.
pub fn parse(raw: &str) -> Result<ParsedToken, ParseError> {
    let mut segments = raw.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(ParseError::Malformed);
    };
    if signature.is_empty() {
        return Err(ParseError::Malformed);
    }

    let header: TokenHeader = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64)?)?;
    let claims: TokenClaims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload_b64)?)?;

    Ok(ParsedToken {
        raw: raw.to_string(),
        header,
        claims,
        signature: signature.to_string(),
        signing_input: format!("{header_b64}.{payload_b64}"),
    })
}

/// Mask a credential for logging: the first few characters survive, the
/// rest is elided.
#[must_use]
pub fn masked_token(token: &str) -> String {
    if token.len() > 6 {
        format!("{}xxxxx", &token[..6])
    } else {
        "xxxxx".to_string()
    }
}
