//! Channel events delivered to the host.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

use super::VirtualConnection;

// ============================================================================
// Types
// ============================================================================

/// Channel event callback.
///
/// Invoked without any channel lock held, so it may call back into the
/// channel.
pub type ChannelEventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

// ============================================================================
// ChannelEvent
// ============================================================================

/// Something that happened to a channel's membership.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A peer subscribed.
    Connection(VirtualConnection),

    /// A peer sent a message to one of its memberships.
    Data {
        /// Receiving membership.
        connection: VirtualConnection,
        /// Message body.
        payload: Value,
    },

    /// A membership ended (unsubscribe, disconnect, replacement or destroy).
    Disconnection(VirtualConnection),
}

impl ChannelEvent {
    /// Returns the membership the event is about.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &VirtualConnection {
        match self {
            Self::Connection(connection)
            | Self::Data { connection, .. }
            | Self::Disconnection(connection) => connection,
        }
    }
}
