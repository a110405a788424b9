//! # Palisade Auth
//!
//! Token authentication for the Palisade enforcer.
//!
//! This crate provides:
//! - JWS parsing separate from verification, so parsed tokens can be cached
//! - The four bounded, time-expiring token caches
//! - Issuer trust (PEM certificates or JWKS endpoints, asymmetric only)
//! - Signature and expiry validation
//! - Revoked-token tracking
//! - Subscription and scope validation against the subscription store
//! - The authentication filter for the chain

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authenticator;
pub mod cache;
pub mod filter;
pub mod internal_key;
pub mod issuer;
pub mod revocation;
pub mod subscription;
pub mod token;
pub mod validator;

pub use authenticator::JwtAuthenticator;
pub use cache::TokenCaches;
pub use filter::AuthFilter;
pub use internal_key::InternalKeyAuthenticator;
pub use issuer::{IssuerRegistry, TrustedIssuer};
pub use revocation::RevocationStore;
pub use token::{ParsedToken, masked_token};
pub use validator::{TokenValidation, TokenValidator};
