//! Membership handle inside a channel.
//!
//! A [`VirtualConnection`] is what a peer gets when it subscribes to a
//! channel under a membership id. Several virtual connections, in one or many
//! channels, can share a single physical [`Connection`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::{ChannelKey, ConnectionId, MembershipId};
use crate::protocol::{Packet, PacketType};
use crate::transport::Connection;

use super::core::{Channel, ChannelInner};

// ============================================================================
// Types
// ============================================================================

/// Shared state of a virtual connection.
struct VirtualConnectionInner {
    /// Membership id inside the channel.
    id: MembershipId,
    /// Channel name, as given to `Multiplexer::channel`.
    name: String,
    /// Canonical channel key.
    key: ChannelKey,
    /// Physical connection carrying this membership.
    connection: Connection,
    /// Owning channel. Weak so channels and memberships never form a cycle.
    channel: Weak<ChannelInner>,
    /// Set once by whichever path ends the membership first.
    closed: AtomicBool,
}

// ============================================================================
// VirtualConnection
// ============================================================================

/// One peer's membership in one channel.
///
/// Cheap to clone; clones refer to the same membership.
#[derive(Clone)]
pub struct VirtualConnection {
    inner: Arc<VirtualConnectionInner>,
}

impl fmt::Debug for VirtualConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualConnection")
            .field("id", &self.inner.id)
            .field("channel", &self.inner.name)
            .field("connection", &self.inner.connection.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl VirtualConnection {
    /// Creates an open membership bound to `channel`.
    pub(crate) fn new(id: MembershipId, channel: &Channel, connection: Connection) -> Self {
        Self {
            inner: Arc::new(VirtualConnectionInner {
                id,
                name: channel.name().to_owned(),
                key: channel.key().clone(),
                connection,
                channel: Arc::downgrade(&channel.inner),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the membership id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &MembershipId {
        &self.inner.id
    }

    /// Returns the channel name.
    #[inline]
    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the canonical channel key.
    #[inline]
    #[must_use]
    pub fn channel_key(&self) -> &ChannelKey {
        &self.inner.key
    }

    /// Returns the id of the physical connection carrying this membership.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection.id()
    }

    /// Returns the physical connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns `true` once the membership has ended.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns `true` if both handles refer to the same membership.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sends a MESSAGE packet to the peer.
    ///
    /// # Errors
    ///
    /// - [`Error::MembershipClosed`] if the membership has ended
    /// - [`Error::ConnectionClosed`] if the physical connection is gone
    pub fn write(&self, payload: Value) -> Result<()> {
        if self.is_closed() {
            return Err(Error::membership_closed(self.inner.id.clone()));
        }
        self.inner.connection.send(&self.packet(PacketType::Message, payload))
    }

    /// Ends the membership.
    ///
    /// Removes it from its channel, prunes the connection's registry entry,
    /// emits a disconnection event and, unless disabled in the options,
    /// tells the peer with an UNSUBSCRIBE packet. Calling `end` again is a
    /// no-op.
    pub fn end(&self) {
        match self.inner.channel.upgrade() {
            Some(inner) => Channel::from_inner(inner).release(self),
            None => {
                self.mark_closed();
            }
        }
    }

    /// Marks the membership closed. Returns `false` if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::AcqRel)
    }

    /// Best-effort UNSUBSCRIBE notification to the peer.
    pub(crate) fn notify_peer(&self) {
        let packet = self.packet(PacketType::Unsubscribe, Value::Null);
        if self.inner.connection.send(&packet).is_err() {
            trace!(id = %self.inner.id, channel = %self.inner.name, "Peer already gone");
        }
    }

    fn packet(&self, packet_type: PacketType, payload: Value) -> Packet {
        Packet::new(packet_type, self.inner.id.clone(), self.inner.name.clone(), payload)
    }
}

// ============================================================================
// Tests
// ============================================================================
