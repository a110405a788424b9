//! # Palisade Gateway
//!
//! The check RPC front of the Palisade enforcer: request/verdict wire
//! types, protocol-aware denial formatting, the dependency-injected
//! enforcer context, and the HTTP listener.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Check RPC wire types.
pub mod check;
/// The enforcer context and its builder.
pub mod context;
/// Denial formatting.
pub mod deny;
mod server;

pub use check::{CheckRequest, CheckResponse, HeaderOp};
pub use context::{EnforcerContext, EnforcerContextBuilder};
pub use deny::DenyFormat;
pub use server::EnforcerServer;

use std::sync::Arc;

use palisade_core::config::EnforcerConfig;

/// Build the context and serve until the process stops.
///
/// # Errors
///
/// Returns error if the context cannot be built or the server fails.
pub async fn start(config: EnforcerConfig) -> Result<(), GatewayError> {
    let context = EnforcerContext::builder(config)
        .build()
        .map_err(|e| GatewayError::Config(e.to_string()))?;
    EnforcerServer::new(Arc::new(context)).run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
