//! WebSocket transport layer.
//!
//! Accepts physical connections and feeds their lifecycle into the
//! [`Multiplexer`](crate::Multiplexer).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Peer           │                              │  Server (Rust)  │
//! │                 │         WebSocket            │                 │
//! │  "chat"  x1 ────┼──────────────────────────────┼──► Connection   │
//! │  "chat"  x2 ────┤   [type, id, name, payload]  │       │         │
//! │  "news"  n7 ────┘                              │   Multiplexer   │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Connection handle and event loop |
//! | `server` | Accept loop and connection lifecycle |

// ============================================================================
// Submodules
// ============================================================================

/// Connection handle and WebSocket event loop.
pub mod connection;

/// WebSocket server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionCommand};
pub use server::Server;
