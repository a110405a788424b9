//! Configuration loading and validation.
//!
//! Supports JSON5 format. The enforcer is configured once at startup; there
//! is no hot reload. Control-plane driven state (APIs, subscriptions,
//! throttle decisions) arrives through the sync interfaces, not through
//! this file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main enforcer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcerConfig {
    /// Check service listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// CORS filter configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Throttling and publisher configuration.
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Denial formatting configuration.
    #[serde(default)]
    pub deny: DenialConfig,
}

impl EnforcerConfig {
    /// Load configuration from a path.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or fails
    /// validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns error when an issuer carries neither a certificate nor a
    /// JWKS endpoint, or a publisher endpoint is malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for issuer in &self.auth.issuers {
            if issuer.certificate.is_none() && issuer.jwks_url.is_none() {
                return Err(ConfigError::Validation(format!(
                    "issuer {} has neither a certificate nor a JWKS endpoint",
                    issuer.issuer
                )));
            }
        }
        for endpoint in &self.throttle.publisher.endpoints {
            if !endpoint.receiver_url.starts_with("tcp://")
                && !endpoint.receiver_url.starts_with("ssl://")
            {
                return Err(ConfigError::Validation(format!(
                    "publisher receiver URL must be tcp:// or ssl://: {}",
                    endpoint.receiver_url
                )));
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("PALISADE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if std::env::var("PALISADE_AUTH_DISABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            self.auth.enabled = false;
        }
        if std::env::var("PALISADE_SOAP_ERRORS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            self.deny.soap_enabled = true;
        }
        self
    }
}

/// Check service listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_port() -> u16 {
    18700
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Whether authentication is enforced.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Header carrying the bearer credential.
    #[serde(default = "default_auth_header")]
    pub header_name: String,

    /// Header carrying an internal (test) key.
    #[serde(default = "default_internal_key_header")]
    pub internal_key_header: String,

    /// Trusted token issuers.
    #[serde(default)]
    pub issuers: Vec<IssuerConfig>,

    /// Token cache sizing and TTLs.
    #[serde(default)]
    pub token_cache: TokenCacheConfig,

    /// Clock skew tolerated when checking the expiry claim, in seconds.
    #[serde(default = "default_timestamp_skew")]
    pub timestamp_skew_secs: u64,

    /// JWKS refresh TTL in seconds.
    #[serde(default = "default_jwks_ttl")]
    pub jwks_ttl_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_auth_header() -> String {
    "authorization".to_string()
}

fn default_internal_key_header() -> String {
    "internal-key".to_string()
}

fn default_timestamp_skew() -> u64 {
    5
}

fn default_jwks_ttl() -> u64 {
    3600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            header_name: default_auth_header(),
            internal_key_header: default_internal_key_header(),
            issuers: Vec::new(),
            token_cache: TokenCacheConfig::default(),
            timestamp_skew_secs: default_timestamp_skew(),
            jwks_ttl_secs: default_jwks_ttl(),
        }
    }
}

/// One trusted token issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerConfig {
    /// Display name of the key manager.
    #[serde(default = "default_key_manager")]
    pub name: String,

    /// Expected `iss` claim value.
    pub issuer: String,

    /// PEM-encoded public key or certificate for signature verification.
    #[serde(default)]
    pub certificate: Option<String>,

    /// JWKS endpoint to fetch key material from.
    #[serde(default)]
    pub jwks_url: Option<String>,

    /// Allowed signature algorithm names. Only asymmetric families are
    /// honored; symmetric entries are rejected at registry build time.
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,

    /// Whether tokens from this issuer require a subscription.
    #[serde(default = "default_true")]
    pub validate_subscriptions: bool,

    /// Whether this issuer signs internal (test) keys.
    #[serde(default)]
    pub internal: bool,
}

fn default_key_manager() -> String {
    "Resident Key Manager".to_string()
}

fn default_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

/// Token cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCacheConfig {
    /// Whether the token caches are consulted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum entries in the parsed/validation/positive caches.
    #[serde(default = "default_max_valid_keys")]
    pub max_valid_entries: u64,

    /// Maximum entries in the negative cache.
    #[serde(default = "default_max_invalid_keys")]
    pub max_invalid_entries: u64,

    /// Idle TTL in seconds before an entry is evicted.
    #[serde(default = "default_cache_ttl")]
    pub idle_ttl_secs: u64,
}

fn default_max_valid_keys() -> u64 {
    250
}

fn default_max_invalid_keys() -> u64 {
    100
}

fn default_cache_ttl() -> u64 {
    900
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_valid_entries: default_max_valid_keys(),
            max_invalid_entries: default_max_invalid_keys(),
            idle_ttl_secs: default_cache_ttl(),
        }
    }
}

/// CORS filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsConfig {
    /// Whether the CORS filter runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed origins; `*` allows any.
    #[serde(default = "default_origins")]
    pub allow_origins: Vec<String>,

    /// Allowed methods for preflight responses.
    #[serde(default = "default_methods")]
    pub allow_methods: Vec<String>,

    /// Allowed headers for preflight responses.
    #[serde(default = "default_allow_headers")]
    pub allow_headers: Vec<String>,

    /// Headers exposed to the browser.
    #[serde(default)]
    pub expose_headers: Vec<String>,

    /// Whether credentials are allowed.
    #[serde(default)]
    pub allow_credentials: bool,
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_allow_headers() -> Vec<String> {
    vec!["authorization".to_string(), "content-type".to_string()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            allow_origins: default_origins(),
            allow_methods: default_methods(),
            allow_headers: default_allow_headers(),
            expose_headers: Vec::new(),
            allow_credentials: false,
        }
    }
}

/// Throttling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleConfig {
    /// Whether throttle decisions are made and events published at all.
    #[serde(default = "default_true")]
    pub global_publishing_enabled: bool,

    /// Include request headers in the event properties blob.
    #[serde(default)]
    pub header_conditions_enabled: bool,

    /// Include query parameters in the event properties blob.
    #[serde(default)]
    pub query_conditions_enabled: bool,

    /// Include JWT claims in the event properties blob.
    #[serde(default)]
    pub jwt_claim_conditions_enabled: bool,

    /// Deployment-level hard limit in requests per minute per API;
    /// 0 disables the gate.
    #[serde(default)]
    pub hard_limit_per_min: u32,

    /// Usage event publisher.
    #[serde(default)]
    pub publisher: PublisherConfig,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_publishing_enabled: default_true(),
            header_conditions_enabled: false,
            query_conditions_enabled: false,
            jwt_claim_conditions_enabled: false,
            hard_limit_per_min: 0,
            publisher: PublisherConfig::default(),
        }
    }
}

/// Usage event publisher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherConfig {
    /// Remote counting-service targets.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Publishing workers draining the event queue.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Bound of the in-process event queue; publishes beyond it are dropped.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Maximum idle plaintext connections kept per endpoint.
    #[serde(default = "default_plain_max_idle")]
    pub plain_max_idle: usize,

    /// Maximum TLS connections per endpoint (bounded backpressure).
    #[serde(default = "default_tls_max_size")]
    pub tls_max_size: usize,

    /// How long a worker waits for a TLS connection before giving up, in
    /// milliseconds.
    #[serde(default = "default_borrow_timeout")]
    pub borrow_timeout_ms: u64,

    /// Socket timeout for outbound publish connections, in milliseconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_ms: u64,

    /// Idle connections older than this are evicted, in seconds.
    #[serde(default = "default_idle_eviction")]
    pub max_idle_age_secs: u64,

    /// Transport batch size tuning knob; events are still flushed
    /// individually from the engine's perspective.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_size() -> usize {
    2048
}

fn default_plain_max_idle() -> usize {
    16
}

fn default_tls_max_size() -> usize {
    10
}

fn default_borrow_timeout() -> u64 {
    5000
}

fn default_socket_timeout() -> u64 {
    5000
}

fn default_idle_eviction() -> u64 {
    300
}

fn default_batch_size() -> usize {
    200
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            worker_count: default_worker_count(),
            queue_size: default_queue_size(),
            plain_max_idle: default_plain_max_idle(),
            tls_max_size: default_tls_max_size(),
            borrow_timeout_ms: default_borrow_timeout(),
            socket_timeout_ms: default_socket_timeout(),
            max_idle_age_secs: default_idle_eviction(),
            batch_size: default_batch_size(),
        }
    }
}

/// One remote counting-service target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Receiver URL, `tcp://host:port` or `ssl://host:port`.
    pub receiver_url: String,
    /// Session authentication URL.
    #[serde(default)]
    pub auth_url: String,
    /// Session username.
    pub username: String,
    /// Session password.
    pub password: String,
}

impl EndpointConfig {
    /// Whether the endpoint requires TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.receiver_url.starts_with("ssl://")
    }

    /// `host:port` part of the receiver URL.
    #[must_use]
    pub fn host_port(&self) -> &str {
        self.receiver_url
            .trim_start_matches("tcp://")
            .trim_start_matches("ssl://")
    }

    /// Pool key identifying this (receiver, credentials) pair.
    #[must_use]
    pub fn pool_key(&self) -> String {
        format!("{}|{}", self.receiver_url, self.username)
    }
}

/// Denial formatting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialConfig {
    /// Whether SOAP fault envelopes are rendered for SOAP-shaped requests.
    /// When disabled, all denials are JSON.
    #[serde(default)]
    pub soap_enabled: bool,
}
