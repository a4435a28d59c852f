//! WebSocket server feeding a [`Multiplexer`].
//!
//! The server owns the accept loop and one task per physical connection.
//! Each task emits the connection lifecycle into the multiplexer:
//!
//! 1. `Server::bind` - Bind to localhost with random port
//! 2. Peer connects, WebSocket upgrade
//! 3. `Multiplexer::on_connection` - Registry entry opened
//! 4. Event loop - every frame goes to `Multiplexer::on_data`
//! 5. `Multiplexer::on_disconnection` - Memberships released
//! 6. `Server::shutdown` - Connections closed, `Multiplexer::close`
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Server                    │
//! │            (single port)                │
//! │  ┌─────────────────────────────────┐    │
//! │  │ ConnectionId=1 → Connection 1   │    │
//! │  │ ConnectionId=2 → Connection 2   │    │
//! │  └─────────────────────────────────┘    │
//! │                  │                      │
//! │             Multiplexer                 │
//! │      "chat"  "news"  "presence"         │
//! └─────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::error::Result;
use crate::identifiers::ConnectionId;
use crate::multiplex::Multiplexer;

use super::connection::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address for the WebSocket server (localhost).
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Server
// ============================================================================

/// WebSocket server multiplexing channels over each accepted connection.
///
/// # Example
///
/// ```no_run
/// use channel_multiplex::{Multiplexer, Server};
///
/// # async fn example() -> channel_multiplex::Result<()> {
/// let server = Server::bind(Multiplexer::new()).await?;
/// let chat = server.channel("chat");
/// println!("listening on {}", server.ws_url());
///
/// chat.write(serde_json::json!("welcome"));
/// server.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    /// Shared state, also held by the accept loop.
    inner: Arc<ServerInner>,
}

/// State shared between the server handle and its tasks.
struct ServerInner {
    /// Bound address.
    addr: SocketAddr,

    /// Routing engine.
    multiplexer: Multiplexer,

    /// Live connections.
    connections: RwLock<FxHashMap<ConnectionId, Connection>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.inner.addr)
            .field("connection_count", &self.connection_count())
            .field("multiplexer", &self.inner.multiplexer)
            .finish()
    }
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Binds to `localhost:0` (random available port) and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn bind(multiplexer: Multiplexer) -> Result<Self> {
        Self::with_ip_port(multiplexer, DEFAULT_BIND_IP, 0).await
    }

    /// Binds to a specific localhost port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn with_port(multiplexer: Multiplexer, port: u16) -> Result<Self> {
        Self::with_ip_port(multiplexer, DEFAULT_BIND_IP, port).await
    }

    /// Binds to a specific IP and port.
    ///
    /// # Arguments
    ///
    /// * `multiplexer` - Engine that receives the connection lifecycle
    /// * `ip` - IP address to bind to
    /// * `port` - Port to bind to (0 for random)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn with_ip_port(multiplexer: Multiplexer, ip: IpAddr, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let addr = listener.local_addr()?;

        let inner = Arc::new(ServerInner {
            addr,
            multiplexer,
            connections: RwLock::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&inner).accept_loop(listener));

        info!(%addr, "Multiplex server started");

        Ok(Self { inner })
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.inner.addr)
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.addr.port()
    }

    /// Returns the bound socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Returns the routing engine.
    #[inline]
    #[must_use]
    pub fn multiplexer(&self) -> &Multiplexer {
        &self.inner.multiplexer
    }

    /// Returns the channel called `name`, creating it on first use.
    #[inline]
    pub fn channel(&self, name: &str) -> Channel {
        self.inner.multiplexer.channel(name)
    }

    /// Stops accepting, closes every connection and closes the multiplexer.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Multiplex server shutting down");

        let connections: Vec<Connection> = {
            let mut map = self.inner.connections.write();
            map.drain().map(|(_, connection)| connection).collect()
        };

        for connection in connections {
            connection.shutdown();
            self.inner.multiplexer.on_disconnection(connection.id());
            debug!(connection = %connection.id(), "Connection closed during shutdown");
        }

        self.inner.multiplexer.close();

        info!("Multiplex server shutdown complete");
    }
}

// ============================================================================
// Server - Accept Loop
// ============================================================================

impl ServerInner {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Runs one connection from upgrade to disconnection.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "New TCP connection");

        let ws_stream = tokio_tungstenite::accept_async(stream).await?;

        let (connection, command_rx) = Connection::channel(Some(addr));
        let id = connection.id();

        if !self.admit(&connection) {
            debug!(?addr, "Connection refused during shutdown");
            return Ok(());
        }

        info!(connection = %id, ?addr, "WebSocket connection established");

        connection
            .run_event_loop(ws_stream, command_rx, &self.multiplexer)
            .await;

        self.connections.write().remove(&id);
        self.multiplexer.on_disconnection(id);

        info!(connection = %id, ?addr, "WebSocket connection closed");

        Ok(())
    }

    /// Registers a connection unless shutdown has begun.
    ///
    /// The flag is checked under the connection table lock, so a connection
    /// is either refused here or drained by [`Server::shutdown`].
    fn admit(&self, connection: &Connection) -> bool {
        let mut connections = self.connections.write();
        if self.shutdown.load(Ordering::SeqCst) {
            return false;
        }

        connections.insert(connection.id(), connection.clone());
        self.multiplexer.on_connection(connection);
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
