//! Channel Multiplex - many pub/sub channels over one connection.
//!
//! This library routes packets from shared, persistent connections to named
//! channels and tracks, per physical connection, which channels and which
//! memberships it holds so everything unwinds cleanly on disconnect.
//!
//! # Architecture
//!
//! Three tables are kept consistent:
//!
//! - **Channel table** (in [`Multiplexer`]): channel name → [`Channel`]
//! - **Subscriber table** (in each [`Channel`]): membership id →
//!   [`VirtualConnection`]
//! - **Membership registry**: connection → channel → membership ids
//!
//! Packets are JSON arrays `[type, id, name, payload]` with type codes
//! `0` (message), `1` (subscribe) and `2` (unsubscribe).
//!
//! # Quick Start
//!
//! ```no_run
//! use channel_multiplex::{ChannelEvent, Multiplexer, Result, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Server::bind(Multiplexer::new()).await?;
//!
//!     // Echo every message back to the membership that sent it
//!     server.channel("chat").set_event_handler(|event| {
//!         if let ChannelEvent::Data { connection, payload } = event {
//!             let _ = connection.write(payload);
//!         }
//!     });
//!
//!     println!("listening on {}", server.ws_url());
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | [`Channel`], [`VirtualConnection`], [`ChannelEvent`] |
//! | [`multiplex`] | [`Multiplexer`], builder, options, registry |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Packet types |
//! | [`transport`] | WebSocket server and connections |

// ============================================================================
// Modules
// ============================================================================

/// Channels and memberships.
pub mod channel;

/// Error types and result aliases.
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers keep connection ids, membership ids and channel keys
/// from being mixed up.
pub mod identifiers;

/// Packet routing engine.
pub mod multiplex;

/// Multiplex packet types.
pub mod protocol;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::{Channel, ChannelEvent, ChannelEventHandler, VirtualConnection};

// Multiplexer types
pub use multiplex::{
    ChannelExtension, ConnectionRegistry, DuplicatePolicy, Memberships, MultiplexOptions,
    Multiplexer, MultiplexerBuilder,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ChannelKey, ConnectionId, MembershipId};

// Protocol types
pub use protocol::{Packet, PacketType};

// Transport types
pub use transport::{Connection, ConnectionCommand, Server};
