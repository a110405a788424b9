//! The check service listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use palisade_core::config::EnforcerConfig;

use crate::GatewayError;
use crate::check::{CheckRequest, CheckResponse};
use crate::context::EnforcerContext;

/// The HTTP front serving `/check` and `/health`.
pub struct EnforcerServer {
    config: EnforcerConfig,
    context: Arc<EnforcerContext>,
}

impl EnforcerServer {
    /// Create the server around an existing context.
    #[must_use]
    pub fn new(context: Arc<EnforcerContext>) -> Self {
        Self {
            config: context.config().clone(),
            context,
        }
    }

    /// The router, exposed for in-process testing.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/check", post(check_handler))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(Duration::from_secs(30)))
            .with_state(Arc::clone(&self.context))
    }

    /// Bind the listener and serve until the process stops.
    ///
    /// # Errors
    ///
    /// Returns error when the address is invalid or the bind fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr: SocketAddr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        )
        .parse()
        .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        tracing::info!("Enforcer check service listening on http://{addr}");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .await
            .map_err(|e| GatewayError::Server(e.to_string()))
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn check_handler(
    State(context): State<Arc<EnforcerContext>>,
    Json(request): Json<CheckRequest>,
) -> Json<CheckResponse> {
    Json(context.check(request).await)
}
