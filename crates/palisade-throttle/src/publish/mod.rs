//! Asynchronous usage-event publishing.
//!
//! The request path hands immutable event values to a bounded queue and
//! moves on; a small worker pool drains the queue and ships events over
//! pooled connections. A full queue drops the event with a counter bump —
//! throttling accuracy is eventually consistent and best-effort by design,
//! and the verdict never depends on publish success.

pub mod endpoint;
pub mod pool;
pub mod wire;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use palisade_core::config::PublisherConfig;

use crate::event::ThrottleEvent;

pub use endpoint::{DataEndpoint, EndpointRegistry};

/// Where the throttle filter hands allowed-request events.
pub trait EventSink: Send + Sync {
    /// Accept one event; must never block the caller.
    fn publish(&self, event: ThrottleEvent);
}

/// Counters exposed for health reporting.
#[derive(Debug, Default)]
pub struct PublisherStats {
    published: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl PublisherStats {
    /// Events shipped successfully.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Events that failed on every endpoint and were absorbed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Events dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The publisher: a bounded queue drained by a worker pool.
pub struct Publisher {
    tx: mpsc::Sender<ThrottleEvent>,
    stats: Arc<PublisherStats>,
}

impl Publisher {
    /// Start the workers and the idle-eviction task.
    ///
    /// Must run inside a tokio runtime.
    #[must_use]
    pub fn start(config: &PublisherConfig) -> Self {
        let (tx, rx) = mpsc::channel::<ThrottleEvent>(config.queue_size.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(PublisherStats::default());
        let registry = Arc::new(EndpointRegistry::new(config.clone()));
        let endpoints = config.endpoints.clone();

        for worker in 0..config.worker_count.max(1) {
            let rx = Arc::clone(&rx);
            let stats = Arc::clone(&stats);
            let registry = Arc::clone(&registry);
            let endpoints = endpoints.clone();
            tokio::spawn(async move {
                loop {
                    let event = { rx.lock().await.recv().await };
                    let Some(event) = event else {
                        break;
                    };
                    ship(&registry, &endpoints, &stats, &event).await;
                }
                tracing::debug!(worker, "publisher worker stopped");
            });
        }

        // Idle connections age out in the background.
        let eviction_interval = Duration::from_secs(config.max_idle_age_secs.max(1));
        let registry_for_eviction = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(eviction_interval);
            loop {
                ticker.tick().await;
                registry_for_eviction.evict_idle();
            }
        });

        Self { tx, stats }
    }

    /// Publisher statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<PublisherStats> {
        &self.stats
    }
}

impl EventSink for Publisher {
    fn publish(&self, event: ThrottleEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(message_id = %event.message_id, "publish queue full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(message_id = %event.message_id, "publisher is stopped, event dropped");
            }
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("published", &self.stats.published())
            .field("failed", &self.stats.failed())
            .field("dropped", &self.stats.dropped())
            .finish_non_exhaustive()
    }
}

/// Ship one event: first endpoint that accepts it wins; total failure is
/// absorbed and counted.
async fn ship(
    registry: &EndpointRegistry,
    endpoints: &[palisade_core::config::EndpointConfig],
    stats: &PublisherStats,
    event: &ThrottleEvent,
) {
    if endpoints.is_empty() {
        tracing::debug!(message_id = %event.message_id, "no counting-service endpoints configured");
        stats.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    }
    for endpoint_cfg in endpoints {
        let endpoint = registry.endpoint_for(endpoint_cfg);
        match endpoint.publish(event).await {
            Ok(()) => {
                stats.published.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                tracing::error!(
                    receiver = %endpoint_cfg.receiver_url,
                    message_id = %event.message_id,
                    error = %e,
                    "failed to publish throttle event"
                );
            }
        }
    }
    stats.failed.fetch_add(1, Ordering::Relaxed);
}
