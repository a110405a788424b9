//! Error taxonomy: stable numeric error codes, transport status codes, and
//! the programming-error class that aborts a request fail-closed.

use thiserror::Error;

use crate::context::{Denial, ErrorBody};

/// Authentication and authorization failure kinds.
///
/// Each kind carries a stable numeric error code so clients can branch on
/// the code rather than parsing text. The transport status code is derived
/// from the kind, not the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Unclassified authentication failure.
    General,
    /// Credentials were provided but are not valid.
    InvalidCredentials,
    /// No credentials were provided.
    MissingCredentials,
    /// The access token's expiry claim is in the past.
    TokenExpired,
    /// The token was issued for a different key environment.
    IncorrectTokenType,
    /// No matching resource in the API, or the API is not published.
    IncorrectApiResource,
    /// The subscription to the API is temporarily blocked.
    SubscriptionBlocked,
    /// The caller is not authorized to access the resource.
    Forbidden,
    /// No active subscription binds the application to the API.
    SubscriptionInactive,
    /// The token's granted scopes do not cover the resource.
    InvalidScope,
    /// The external policy engine denied the request.
    PolicyEngineDenied,
    /// The external policy engine call failed.
    PolicyEngineFailure,
}

impl AuthErrorKind {
    /// Stable numeric error code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::General => 900900,
            Self::InvalidCredentials => 900901,
            Self::MissingCredentials => 900902,
            Self::TokenExpired => 900903,
            Self::IncorrectTokenType => 900905,
            Self::IncorrectApiResource => 900906,
            Self::SubscriptionBlocked => 900907,
            Self::Forbidden => 900908,
            Self::SubscriptionInactive => 900909,
            Self::InvalidScope => 900910,
            Self::PolicyEngineDenied => 901101,
            Self::PolicyEngineFailure => 901102,
        }
    }

    /// HTTP status code for the denial.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::General
            | Self::InvalidCredentials
            | Self::MissingCredentials
            | Self::TokenExpired
            | Self::IncorrectTokenType => 401,
            Self::IncorrectApiResource => 404,
            Self::SubscriptionBlocked
            | Self::Forbidden
            | Self::SubscriptionInactive
            | Self::InvalidScope
            | Self::PolicyEngineDenied => 403,
            Self::PolicyEngineFailure => 500,
        }
    }

    /// Human-readable error message.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::General => "Unclassified Authentication Failure",
            Self::InvalidCredentials => "Invalid Credentials",
            Self::MissingCredentials => "Missing Credentials",
            Self::TokenExpired => "Access Token Expired",
            Self::IncorrectTokenType => "Incorrect Access Token Type is provided",
            Self::IncorrectApiResource => {
                "No matching resource found in the API for the given request"
            }
            Self::SubscriptionBlocked => "The requested API is temporarily blocked",
            Self::Forbidden => "Resource forbidden",
            Self::SubscriptionInactive => "The subscription to the API is inactive",
            Self::InvalidScope => {
                "The access token does not allow you to access the requested resource"
            }
            Self::PolicyEngineDenied => "Forbidden",
            Self::PolicyEngineFailure => "Internal Server Error",
        }
    }

    /// Longer description attached to the denial body.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::General => "Access failure for API: check the gateway logs for details",
            Self::InvalidCredentials => {
                "Make sure you have provided the correct security credentials"
            }
            Self::MissingCredentials => {
                "Make sure your API invocation call has a header: \"authorization\""
            }
            Self::TokenExpired => "Renew the access token and try again",
            Self::IncorrectTokenType => {
                "Check the environment the access token was issued for"
            }
            Self::IncorrectApiResource => {
                "Check the API documentation and add a proper REST resource path to the invocation URL"
            }
            Self::SubscriptionBlocked => "API subscription is blocked",
            Self::Forbidden => "User is NOT authorized to access the resource",
            Self::SubscriptionInactive => {
                "Subscribe to the API or reactivate the existing subscription"
            }
            Self::InvalidScope => "Obtain a token with the scopes required for the resource",
            Self::PolicyEngineDenied => "The external authorization policy denied the request",
            Self::PolicyEngineFailure => "The external authorization policy could not be evaluated",
        }
    }

    /// Build the typed denial for this failure.
    #[must_use]
    pub fn denial(self) -> Denial {
        Denial {
            status: self.status(),
            error: Some(ErrorBody {
                code: self.code(),
                message: self.message().to_string(),
                description: self.description().to_string(),
            }),
        }
    }
}

/// Throttling levels, in the fixed priority order they are checked.
///
/// When multiple levels are simultaneously violated, the first one in this
/// order supplies the verdict and the error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleLevel {
    /// A blocking condition matched (API, application, user, or IP).
    Blocked,
    /// The deployment-level hard limit was exceeded.
    HardLimit,
    /// A custom policy key template matched a throttled key.
    CustomPolicy,
    /// The subscription's burst (spike-arrest) gate tripped.
    SubscriptionBurst,
    /// The subscription-level quota was exceeded.
    Subscription,
    /// The application-level quota was exceeded.
    Application,
    /// The API-level quota was exceeded.
    Api,
    /// The resource-level quota was exceeded.
    Resource,
}

impl ThrottleLevel {
    /// Stable numeric error code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Api => 900800,
            Self::HardLimit => 900801,
            Self::Resource => 900802,
            Self::Application => 900803,
            Self::Subscription => 900804,
            Self::Blocked => 900805,
            Self::CustomPolicy => 900806,
            Self::SubscriptionBurst => 900807,
        }
    }

    /// HTTP status code: blocked requests are forbidden, the rest are 429.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::Blocked => 403,
            _ => 429,
        }
    }

    /// Human-readable error message.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Blocked => "Message blocked",
            _ => "Message throttled out",
        }
    }

    /// Longer description attached to the denial body.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Blocked => "You have been blocked from accessing the resource",
            _ => "You have exceeded your quota",
        }
    }

    /// Throttle-out reason published in request metadata.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Blocked => "REQUEST_BLOCKED",
            Self::HardLimit => "HARD_LIMIT_EXCEEDED",
            Self::CustomPolicy => "CUSTOM_POLICY_LIMIT_EXCEED",
            Self::SubscriptionBurst => "SUBSCRIPTION_BURST_LIMIT_EXCEEDED",
            Self::Subscription => "SUBSCRIPTION_LIMIT_EXCEEDED",
            Self::Application => "APPLICATION_LIMIT_EXCEEDED",
            Self::Api => "API_LIMIT_EXCEEDED",
            Self::Resource => "RESOURCE_LIMIT_EXCEEDED",
        }
    }

    /// Build the typed denial for this level.
    #[must_use]
    pub fn denial(self) -> Denial {
        Denial {
            status: self.status(),
            error: Some(ErrorBody {
                code: self.code(),
                message: self.message().to_string(),
                description: self.description().to_string(),
            }),
        }
    }
}

/// Programming-error-class failures that abort a request fail-closed.
///
/// Expected conditions (bad credentials, exceeded quotas) never surface
/// through this type; they become verdict data on the request context.
#[derive(Debug, Error)]
pub enum EnforcerError {
    /// Invalid or missing configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_codes_are_distinct() {
        let kinds = [
            AuthErrorKind::General,
            AuthErrorKind::InvalidCredentials,
            AuthErrorKind::MissingCredentials,
            AuthErrorKind::TokenExpired,
            AuthErrorKind::IncorrectTokenType,
            AuthErrorKind::IncorrectApiResource,
            AuthErrorKind::SubscriptionBlocked,
            AuthErrorKind::Forbidden,
            AuthErrorKind::SubscriptionInactive,
            AuthErrorKind::InvalidScope,
        ];
        let mut codes: Vec<u32> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_invalid_scope_is_forbidden_not_unauthenticated() {
        assert_eq!(AuthErrorKind::InvalidScope.status(), 403);
        assert_eq!(AuthErrorKind::InvalidCredentials.status(), 401);
    }

    #[test]
    fn test_throttle_blocked_is_forbidden() {
        assert_eq!(ThrottleLevel::Blocked.status(), 403);
        assert_eq!(ThrottleLevel::Api.status(), 429);
        assert_eq!(ThrottleLevel::SubscriptionBurst.status(), 429);
    }

    #[test]
    fn test_denial_carries_code_and_text() {
        let denial = AuthErrorKind::TokenExpired.denial();
        assert_eq!(denial.status, 401);
        let body = denial.error.expect("denial body");
        assert_eq!(body.code, 900903);
        assert_eq!(body.message, "Access Token Expired");
    }
}
