//! Keyed connection pools for the publisher.
//!
//! Two exhaustion policies: the plaintext pool grows under load so the
//! publish path never blocks on it, while the TLS pool bounds the total
//! connection count and makes the borrowing worker wait, because handshake
//! cost makes unbounded growth the worse failure mode. Both evict idle
//! connections by age.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

/// A plaintext or TLS stream to one counting-service target.
pub enum TransportStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("TransportStream::Plain"),
            Self::Tls(_) => f.write_str("TransportStream::Tls"),
        }
    }
}

/// Opens transport streams to one target.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a stream to `host:port`.
    async fn connect(&self, host_port: &str) -> io::Result<TransportStream>;
}

/// Plain TCP connector.
#[derive(Debug)]
pub struct PlainConnector {
    connect_timeout: Duration,
}

impl PlainConnector {
    /// Create the connector with a connect timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for PlainConnector {
    async fn connect(&self, host_port: &str) -> io::Result<TransportStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(host_port))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(TransportStream::Plain(stream))
    }
}

/// TLS connector over the rustls stack.
pub struct TlsConnector {
    connect_timeout: Duration,
    config: Arc<ClientConfig>,
}

impl TlsConnector {
    /// Create the connector with the webpki root store.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            connect_timeout,
            config: Arc::new(config),
        }
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self, host_port: &str) -> io::Result<TransportStream> {
        let host = host_port.split(':').next().unwrap_or(host_port).to_string();
        let server_name = ServerName::try_from(host)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let connector = tokio_rustls::TlsConnector::from(Arc::clone(&self.config));
        let stream = tokio::time::timeout(self.connect_timeout, async {
            let tcp = TcpStream::connect(host_port).await?;
            tcp.set_nodelay(true)?;
            connector.connect(server_name, tcp).await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS connect timed out"))??;
        Ok(TransportStream::Tls(Box::new(stream)))
    }
}

/// One borrowed connection, with its session state.
pub struct PooledConnection {
    /// The transport stream.
    pub stream: TransportStream,
    /// Session id established on this connection, if any.
    pub session: Option<String>,
    last_used: Instant,
    // Held for the connection's whole lifetime in a bounded pool, so the
    // semaphore bounds total connections, idle ones included.
    _permit: Option<OwnedSemaphorePermit>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("stream", &self.stream)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// A connection pool for one target, with a grow or bounded policy.
pub struct ConnectionPool {
    host_port: String,
    connector: Box<dyn Connector>,
    limit: Option<(Arc<Semaphore>, Duration)>,
    idle: Mutex<Vec<PooledConnection>>,
    created: AtomicUsize,
    max_idle: usize,
    max_idle_age: Duration,
}

impl ConnectionPool {
    /// A pool that grows under load and never blocks the borrower.
    #[must_use]
    pub fn grow(
        host_port: impl Into<String>,
        connector: Box<dyn Connector>,
        max_idle: usize,
        max_idle_age: Duration,
    ) -> Self {
        Self {
            host_port: host_port.into(),
            connector,
            limit: None,
            idle: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            max_idle,
            max_idle_age,
        }
    }

    /// A pool bounded at `max_size` connections; borrowers wait up to
    /// `borrow_timeout` for capacity.
    #[must_use]
    pub fn bounded(
        host_port: impl Into<String>,
        connector: Box<dyn Connector>,
        max_size: usize,
        borrow_timeout: Duration,
        max_idle_age: Duration,
    ) -> Self {
        Self {
            host_port: host_port.into(),
            connector,
            limit: Some((Arc::new(Semaphore::new(max_size)), borrow_timeout)),
            idle: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            max_idle: max_size,
            max_idle_age,
        }
    }

    /// Borrow a connection, reusing an idle one when possible.
    ///
    /// # Errors
    ///
    /// Returns error when the bounded pool stays exhausted past the borrow
    /// timeout or the connect fails.
    pub async fn acquire(&self) -> io::Result<PooledConnection> {
        if let Some(conn) = self.pop_idle() {
            return Ok(conn);
        }

        let permit = match &self.limit {
            Some((semaphore, borrow_timeout)) => {
                let permit =
                    tokio::time::timeout(*borrow_timeout, Arc::clone(semaphore).acquire_owned())
                        .await
                        .map_err(|_| {
                            io::Error::new(io::ErrorKind::TimedOut, "connection pool exhausted")
                        })?
                        .map_err(|_| io::Error::other("connection pool closed"))?;
                // Capacity may have been freed by a release; prefer reuse.
                if let Some(mut conn) = self.pop_idle() {
                    conn._permit = Some(permit);
                    return Ok(conn);
                }
                Some(permit)
            }
            None => None,
        };

        let stream = self.connector.connect(&self.host_port).await?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            stream,
            session: None,
            last_used: Instant::now(),
            _permit: permit,
        })
    }

    /// Return a healthy connection to the idle set.
    pub fn release(&self, mut conn: PooledConnection) {
        conn.last_used = Instant::now();
        let mut idle = self.idle.lock().expect("pool lock");
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
        // Beyond max_idle the connection is simply dropped, releasing its
        // permit with it.
    }

    /// Drop idle connections older than the configured age.
    pub fn evict_idle(&self) {
        let mut idle = self.idle.lock().expect("pool lock");
        let before = idle.len();
        idle.retain(|conn| conn.last_used.elapsed() < self.max_idle_age);
        let evicted = before - idle.len();
        if evicted > 0 {
            tracing::debug!(target = %self.host_port, evicted, "evicted idle publisher connections");
        }
    }

    /// Total connections ever created by this pool.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Currently idle connections.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("pool lock").len()
    }

    fn pop_idle(&self) -> Option<PooledConnection> {
        let mut idle = self.idle.lock().expect("pool lock");
        while let Some(conn) = idle.pop() {
            if conn.last_used.elapsed() < self.max_idle_age {
                return Some(conn);
            }
            // Stale; drop and keep looking.
        }
        None
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("host_port", &self.host_port)
            .field("bounded", &self.limit.is_some())
            .field("created", &self.created_count())
            .finish_non_exhaustive()
    }
}
