//! Multiplex wire protocol.
//!
//! Every frame on the shared connection carries one packet addressed to a
//! channel and a membership inside it.
//!
//! # Packet Types
//!
//! | Code | Type | Direction | Purpose |
//! |------|------|-----------|---------|
//! | 0 | `Message` | both | Payload for a membership |
//! | 1 | `Subscribe` | peer → server | Join a channel |
//! | 2 | `Unsubscribe` | both | Leave a channel / membership ended |

// ============================================================================
// Submodules
// ============================================================================

/// Packet decoding and encoding.
pub mod packet;

// ============================================================================
// Re-exports
// ============================================================================

pub use packet::{Packet, PacketType};
