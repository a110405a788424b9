//! # Palisade Core
//!
//! Core building blocks of the Palisade enforcer.
//!
//! This crate provides:
//! - The per-request context and authentication context models
//! - The filter trait and the short-circuiting filter chain engine
//! - The in-memory subscription store fed by control-plane sync
//! - The CORS and mediation-policy filters
//! - Configuration structures (JSON5 format) and the error taxonomy

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod store;
pub mod types;

pub use config::{ConfigError, EnforcerConfig};
pub use context::{AuthenticationContext, Denial, ErrorBody, RequestContext};
pub use error::{AuthErrorKind, EnforcerError, ThrottleLevel};
pub use filter::{Filter, FilterChain};
pub use store::SubscriptionStore;
pub use types::{KeyType, TierName};
