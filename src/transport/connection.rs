//! Physical connection handle and WebSocket event loop.
//!
//! A [`Connection`] is a cheap, cloneable handle onto one physical
//! connection. Writes go through an unbounded command queue drained by the
//! connection's event loop, so they never block the routing engine.
//!
//! # Event Loop
//!
//! The loop runs inside the task that accepted the connection and handles:
//!
//! - Incoming frames from the peer, decoded as JSON and handed to the
//!   [`Multiplexer`] as packets
//! - Outgoing packets queued by virtual connections
//! - Shutdown requests
//!
//! Connections that are not backed by a socket can be created with
//! [`Connection::in_memory`]; the caller then owns the outbound queue.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, from_slice, from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::multiplex::Multiplexer;
use crate::protocol::Packet;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Commands queued for a connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionCommand {
    /// Send an encoded packet to the peer.
    Send(Value),
    /// Close the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle onto one physical connection.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; all clones share the
/// same outbound queue.
#[derive(Clone)]
pub struct Connection {
    /// Identifier used by the membership registry.
    id: ConnectionId,
    /// Peer address, if the connection is socket-backed.
    addr: Option<SocketAddr>,
    /// Queue drained by the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Creates a connection that is not backed by a socket.
    ///
    /// Everything written to the connection arrives on the returned
    /// receiver. Dropping the receiver makes the connection report closed.
    #[must_use]
    pub fn in_memory() -> (Self, mpsc::UnboundedReceiver<ConnectionCommand>) {
        Self::channel(None)
    }

    /// Creates a handle and its outbound queue.
    pub(crate) fn channel(
        addr: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: ConnectionId::next(),
            addr,
            command_tx,
        };
        (connection, command_rx)
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the peer address, if any.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Returns `true` once the event loop has stopped draining the queue.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Queues a packet for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection is gone.
    pub fn send(&self, packet: &Packet) -> Result<()> {
        self.command_tx
            .send(ConnectionCommand::Send(packet.to_value()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Asks the event loop to close the connection.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

impl Connection {
    /// Runs the WebSocket I/O loop until either side closes.
    ///
    /// Inbound frames are routed through `multiplexer`. Lifecycle events
    /// (connection, disconnection) are the caller's responsibility.
    pub(crate) async fn run_event_loop(
        &self,
        ws_stream: WebSocketStream<TcpStream>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        multiplexer: &Multiplexer,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming(from_str(text.as_str()).map_err(Error::from), multiplexer);
                        }

                        Some(Ok(Message::Binary(data))) => {
                            self.handle_incoming(from_slice(&data).map_err(Error::from), multiplexer);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(connection = %self.id, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(connection = %self.id, error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!(connection = %self.id, "WebSocket stream ended");
                            break;
                        }

                        // Ignore Ping, Pong, Frame
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(packet)) => {
                            let json = match to_string(&packet) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(connection = %self.id, error = %e, "Failed to encode packet");
                                    continue;
                                }
                            };

                            if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                warn!(connection = %self.id, error = %e, "Failed to send packet");
                                break;
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!(connection = %self.id, "Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!(connection = %self.id, "Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        // Stop accepting writes so virtual connections see the close.
        command_rx.close();

        debug!(connection = %self.id, "Event loop terminated");
    }

    /// Hands a decoded frame to the multiplexer, dropping undecodable ones.
    fn handle_incoming(&self, decoded: Result<Value>, multiplexer: &Multiplexer) {
        match decoded {
            Ok(data) => multiplexer.on_data(self, data),
            Err(e) => trace!(connection = %self.id, error = %e, "Dropping non-JSON frame"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::identifiers::MembershipId;
    use crate::protocol::PacketType;

    #[test]
    fn test_in_memory_ids_are_unique() {
        let (a, _rx_a) = Connection::in_memory();
        let (b, _rx_b) = Connection::in_memory();
        assert_ne!(a.id(), b.id());
        assert!(a.addr().is_none());
    }

    #[test]
    fn test_send_queues_encoded_packet() {
        let (connection, mut rx) = Connection::in_memory();
        let packet = Packet::new(
            PacketType::Message,
            MembershipId::new("x1"),
            "chat",
            json!("hi"),
        );

        connection.send(&packet).expect("queue open");

        assert_eq!(
            rx.try_recv().ok(),
            Some(ConnectionCommand::Send(json!([0, "x1", "chat", "hi"])))
        );
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (connection, rx) = Connection::in_memory();
        drop(rx);

        assert!(connection.is_closed());
        let packet = Packet::new(
            PacketType::Message,
            MembershipId::new("x1"),
            "chat",
            Value::Null,
        );
        assert!(matches!(
            connection.send(&packet),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_undecodable_frame_is_dropped() {
        let multiplexer = Multiplexer::new();
        let chat = multiplexer.channel("chat");
        let (connection, _rx) = Connection::in_memory();
        multiplexer.on_connection(&connection);

        let garbage: Result<Value> = from_str("not json").map_err(Error::from);
        assert!(garbage.as_ref().is_err_and(Error::is_protocol_error));
        connection.handle_incoming(garbage, &multiplexer);
        assert_eq!(chat.connection_count(), 0);

        connection.handle_incoming(
            from_slice(br#"[1, "x1", "chat", null]"#).map_err(Error::from),
            &multiplexer,
        );
        assert_eq!(chat.connection_count(), 1);
    }

    #[test]
    fn test_shutdown_queues_command() {
        let (connection, mut rx) = Connection::in_memory();
        connection.shutdown();
        assert_eq!(rx.try_recv().ok(), Some(ConnectionCommand::Shutdown));
    }
}
