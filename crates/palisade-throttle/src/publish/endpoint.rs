//! Remote counting-service endpoints.
//!
//! One `DataEndpoint` per distinct (receiver, credentials) pair, created
//! lazily on first use and kept for the process lifetime. Each endpoint
//! owns its connection pool; the session handshake runs once per
//! connection and is reused until the connection is dropped.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use palisade_core::config::{EndpointConfig, PublisherConfig};

use crate::event::ThrottleEvent;
use crate::publish::pool::{ConnectionPool, PlainConnector, TlsConnector};
use crate::publish::wire;

/// One remote counting-service target with its connection pool.
pub struct DataEndpoint {
    config: EndpointConfig,
    pool: ConnectionPool,
    socket_timeout: Duration,
}

impl DataEndpoint {
    /// Build the endpoint with the pool policy its scheme calls for:
    /// plaintext pools grow, TLS pools bound and block.
    #[must_use]
    pub fn from_config(config: EndpointConfig, publisher: &PublisherConfig) -> Self {
        let socket_timeout = Duration::from_millis(publisher.socket_timeout_ms);
        let max_idle_age = Duration::from_secs(publisher.max_idle_age_secs);
        let pool = if config.is_tls() {
            ConnectionPool::bounded(
                config.host_port(),
                Box::new(TlsConnector::new(socket_timeout)),
                publisher.tls_max_size,
                Duration::from_millis(publisher.borrow_timeout_ms),
                max_idle_age,
            )
        } else {
            ConnectionPool::grow(
                config.host_port(),
                Box::new(PlainConnector::new(socket_timeout)),
                publisher.plain_max_idle,
                max_idle_age,
            )
        };
        Self::new(config, pool, socket_timeout)
    }

    /// Build the endpoint over an explicit pool.
    #[must_use]
    pub fn new(config: EndpointConfig, pool: ConnectionPool, socket_timeout: Duration) -> Self {
        Self {
            config,
            pool,
            socket_timeout,
        }
    }

    /// Publish one event, establishing the session when the borrowed
    /// connection has none yet.
    ///
    /// # Errors
    ///
    /// Returns error on pool exhaustion, connect/handshake failure, or a
    /// rejected frame. The failed connection is discarded, not returned.
    pub async fn publish(&self, event: &ThrottleEvent) -> io::Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let mut conn = self.pool.acquire().await?;

        let result = tokio::time::timeout(self.socket_timeout, async {
            if conn.session.is_none() {
                wire::write_login(&mut conn.stream, &self.config.username, &self.config.password)
                    .await?;
                let session = wire::read_login_ack(&mut conn.stream).await?;
                conn.session = Some(session);
            }
            let session = conn.session.clone().unwrap_or_default();
            wire::write_event(&mut conn.stream, &session, &payload).await?;
            wire::read_event_ack(&mut conn.stream).await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "publish timed out"))
        .and_then(|inner| inner);

        match result {
            Ok(()) => {
                self.pool.release(conn);
                Ok(())
            }
            Err(e) => {
                // The connection state is unknown after a failure; drop it.
                drop(conn);
                Err(e)
            }
        }
    }

    /// Drop idle connections older than the configured age.
    pub fn evict_idle(&self) {
        self.pool.evict_idle();
    }

    /// The pool backing this endpoint.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl std::fmt::Debug for DataEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEndpoint")
            .field("receiver", &self.config.receiver_url)
            .finish_non_exhaustive()
    }
}

/// Lazily created endpoints by (receiver, credentials) key; entries live
/// for the process lifetime.
#[derive(Debug)]
pub struct EndpointRegistry {
    publisher: PublisherConfig,
    endpoints: DashMap<String, Arc<DataEndpoint>>,
}

impl EndpointRegistry {
    /// Create the registry.
    #[must_use]
    pub fn new(publisher: PublisherConfig) -> Self {
        Self {
            publisher,
            endpoints: DashMap::new(),
        }
    }

    /// The endpoint for a target, created on first use.
    #[must_use]
    pub fn endpoint_for(&self, config: &EndpointConfig) -> Arc<DataEndpoint> {
        self.endpoints
            .entry(config.pool_key())
            .or_insert_with(|| {
                Arc::new(DataEndpoint::from_config(config.clone(), &self.publisher))
            })
            .clone()
    }

    /// Evict idle connections across every endpoint.
    pub fn evict_idle(&self) {
        for entry in &self.endpoints {
            entry.value().evict_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::pool::PlainConnector;
    use crate::publish::testsupport::{mock_receiver, sample_event};

    fn endpoint_config(addr: &str) -> EndpointConfig {
        EndpointConfig {
            receiver_url: format!("tcp://{addr}"),
            auth_url: String::new(),
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_establishes_session_once() {
        let (addr, state, server) = mock_receiver().await;
        let endpoint = DataEndpoint::from_config(
            endpoint_config(&addr),
            &PublisherConfig::default(),
        );

        for _ in 0..5 {
            endpoint.publish(&sample_event()).await.unwrap();
        }

        assert_eq!(state.events(), 5);
        // A single pooled connection handled every publish with one login.
        assert_eq!(state.logins(), 1);
        assert_eq!(endpoint.pool().created_count(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn test_bounded_pool_completes_large_concurrent_load() {
        let (addr, state, server) = mock_receiver().await;
        // A bounded pool of ten, as the TLS policy configures, but over a
        // plain transport so the test needs no certificates.
        let pool = ConnectionPool::bounded(
            &addr,
            Box::new(PlainConnector::new(Duration::from_secs(2))),
            10,
            Duration::from_secs(10),
            Duration::from_secs(60),
        );
        let endpoint = Arc::new(DataEndpoint::new(
            endpoint_config(&addr),
            pool,
            Duration::from_secs(5),
        ));

        let mut tasks = Vec::new();
        for _ in 0..1000 {
            let endpoint = Arc::clone(&endpoint);
            tasks.push(tokio::spawn(async move {
                endpoint.publish(&sample_event()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().expect("publish under backpressure");
        }

        assert_eq!(state.events(), 1000);
        assert!(endpoint.pool().created_count() <= 10);

        server.abort();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error_not_a_panic() {
        let endpoint = DataEndpoint::from_config(
            endpoint_config("127.0.0.1:1"),
            &PublisherConfig::default(),
        );
        assert!(endpoint.publish(&sample_event()).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_reuses_endpoints() {
        let registry = EndpointRegistry::new(PublisherConfig::default());
        let config = endpoint_config("127.0.0.1:9611");

        let first = registry.endpoint_for(&config);
        let second = registry.endpoint_for(&config);
        assert!(Arc::ptr_eq(&first, &second));
    }
}
