//! Multiplexer: channel table, packet routing and membership teardown.
//!
//! The [`Multiplexer`] is driven by four lifecycle calls from the transport:
//!
//! | Call | When | Effect |
//! |------|------|--------|
//! | [`on_connection`](Multiplexer::on_connection) | Connection accepted | Opens its registry entry |
//! | [`on_data`](Multiplexer::on_data) | Packet received | Routes it to the named channel |
//! | [`on_disconnection`](Multiplexer::on_disconnection) | Connection gone | Closes every membership it held |
//! | [`close`](Multiplexer::close) | Server shutdown | Destroys every channel |
//!
//! None of them fail or block. Malformed and unroutable packets are dropped,
//! so one bad frame never disturbs the other channels sharing a connection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::channel::Channel;
use crate::identifiers::{ChannelKey, ConnectionId};
use crate::protocol::{Packet, PacketType};
use crate::transport::Connection;

use super::builder::MultiplexerBuilder;
use super::extension::ChannelExtension;
use super::options::MultiplexOptions;
use super::registry::{ConnectionRegistry, Memberships};

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the multiplexer.
pub(crate) struct MultiplexerInner {
    /// Options handed to every channel.
    options: MultiplexOptions,

    /// Channel table. Entries are only removed by `close`.
    channels: RwLock<FxHashMap<ChannelKey, Channel>>,

    /// Memberships per physical connection. Channels hold it weakly.
    registry: Arc<ConnectionRegistry>,

    /// Hooks run for each new channel.
    extensions: Vec<Arc<dyn ChannelExtension>>,
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Routes packets from shared connections to named channels.
///
/// Cheap to clone; clones share the same channel table.
///
/// # Example
///
/// ```
/// use channel_multiplex::{Connection, Multiplexer};
/// use serde_json::json;
///
/// let multiplexer = Multiplexer::new();
/// let chat = multiplexer.channel("chat");
///
/// let (connection, _outbound) = Connection::in_memory();
/// multiplexer.on_connection(&connection);
/// multiplexer.on_data(&connection, json!([1, "x1", "chat", null]));
/// assert_eq!(chat.connection_count(), 1);
///
/// multiplexer.on_disconnection(connection.id());
/// assert_eq!(chat.connection_count(), 0);
/// ```
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MultiplexerInner>,
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("options", &self.inner.options)
            .field("channel_count", &self.channel_count())
            .field("connection_count", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Multiplexer - Constructor
// ============================================================================

impl Multiplexer {
    /// Creates a multiplexer with default options and no extensions.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(MultiplexOptions::default(), Vec::new())
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> MultiplexerBuilder {
        MultiplexerBuilder::new()
    }

    pub(crate) fn from_parts(
        options: MultiplexOptions,
        extensions: Vec<Arc<dyn ChannelExtension>>,
    ) -> Self {
        Self {
            inner: Arc::new(MultiplexerInner {
                options,
                channels: RwLock::new(FxHashMap::default()),
                registry: Arc::new(ConnectionRegistry::new()),
                extensions,
            }),
        }
    }
}

// ============================================================================
// Multiplexer - Channel Table
// ============================================================================

impl Multiplexer {
    /// Returns the channel called `name`, creating it on first use.
    ///
    /// Every call with the same name returns the same channel until
    /// [`close`](Self::close) clears the table.
    pub fn channel(&self, name: &str) -> Channel {
        let key = ChannelKey::new(name);

        if let Some(channel) = self.inner.channels.read().get(&key) {
            return channel.clone();
        }

        let mut channels = self.inner.channels.write();
        channels
            .entry(key)
            .or_insert_with(|| self.create_channel(name))
            .clone()
    }

    /// Returns the channel called `name` without creating it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Channel> {
        self.lookup(&ChannelKey::new(name))
    }

    /// Returns the number of channels.
    #[inline]
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channels.read().len()
    }

    /// Returns the names of all channels.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.inner
            .channels
            .read()
            .values()
            .map(|channel| channel.name().to_owned())
            .collect()
    }

    /// Returns the options shared by every channel.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &MultiplexOptions {
        &self.inner.options
    }

    fn lookup(&self, key: &ChannelKey) -> Option<Channel> {
        self.inner.channels.read().get(key).cloned()
    }

    fn create_channel(&self, name: &str) -> Channel {
        let channel = Channel::new(
            name,
            self.inner.options,
            Arc::downgrade(&self.inner.registry),
        );

        for extension in &self.inner.extensions {
            extension.instrument(&channel, &self.inner.options);
        }

        debug!(channel = name, key = %channel.key(), "Channel created");
        channel
    }
}

// ============================================================================
// Multiplexer - Membership Registry
// ============================================================================

impl Multiplexer {
    /// Returns the number of connections with an open registry entry.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns a snapshot of the channels and ids a connection holds.
    ///
    /// `None` if the connection is unknown or already disconnected.
    #[must_use]
    pub fn memberships(&self, connection: ConnectionId) -> Option<Memberships> {
        self.inner.registry.memberships(connection)
    }
}

// ============================================================================
// Multiplexer - Lifecycle
// ============================================================================

impl Multiplexer {
    /// Registers a newly accepted connection.
    pub fn on_connection(&self, connection: &Connection) {
        if self.inner.registry.open(connection.id()) {
            debug!(connection = %connection.id(), addr = ?connection.addr(), "Connection attached");
        } else {
            debug!(connection = %connection.id(), "Connection already attached");
        }
    }

    /// Routes one inbound packet from `connection`.
    ///
    /// Non-array values, malformed fields, unknown packet types and unknown
    /// channels are dropped. Packets never create channels.
    pub fn on_data(&self, connection: &Connection, data: Value) {
        match Packet::parse(&data) {
            Ok(packet) => self.dispatch(connection, packet),
            Err(e) => {
                trace!(connection = %connection.id(), error = %e, "Dropping malformed packet");
            }
        }
    }

    /// Releases every membership held by a disconnected connection.
    ///
    /// Channels that no longer exist and ids that were already removed are
    /// skipped. Calling this again for the same connection is a no-op.
    pub fn on_disconnection(&self, connection: ConnectionId) {
        let Some(memberships) = self.inner.registry.take(connection) else {
            trace!(%connection, "Disconnection for unknown connection");
            return;
        };

        let mut closed = 0usize;
        for (key, ids) in memberships {
            let Some(channel) = self.lookup(&key) else {
                trace!(%connection, channel = %key, "Channel gone before disconnection");
                continue;
            };

            closed += ids
                .iter()
                .filter(|id| channel.close_member(id, connection))
                .count();
        }

        debug!(%connection, closed, "Connection detached");
    }

    /// Destroys every channel and clears the table.
    ///
    /// Each channel is destroyed exactly once; calling `close` again with no
    /// new channels does nothing.
    pub fn close(&self) {
        let channels: Vec<Channel> = {
            let mut map = self.inner.channels.write();
            map.drain().map(|(_, channel)| channel).collect()
        };

        if channels.is_empty() {
            return;
        }

        info!(count = channels.len(), "Closing multiplexer channels");

        for channel in channels {
            channel.destroy();
        }
    }
}

// ============================================================================
// Multiplexer - Dispatch
// ============================================================================

impl Multiplexer {
    fn dispatch(&self, connection: &Connection, packet: Packet) {
        let Some(channel) = self.lookup(&packet.key()) else {
            trace!(
                connection = %connection.id(),
                channel = %packet.name,
                "Packet for unknown channel dropped"
            );
            return;
        };

        match packet.packet_type {
            PacketType::Message => {
                channel.message(&packet.id, packet.payload);
            }
            PacketType::Subscribe => {
                channel.subscribe(connection, packet.id);
            }
            PacketType::Unsubscribe => {
                channel.unsubscribe(&packet.id);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::identifiers::MembershipId;

    fn attach(multiplexer: &Multiplexer) -> Connection {
        let (connection, _outbound) = Connection::in_memory();
        multiplexer.on_connection(&connection);
        connection
    }

    #[test]
    fn test_channel_is_idempotent() {
        let multiplexer = Multiplexer::new();
        let a = multiplexer.channel("chat");
        let b = multiplexer.channel("chat");

        assert!(a.ptr_eq(&b));
        assert_eq!(multiplexer.channel_count(), 1);
    }

    #[test]
    fn test_channel_names_are_escaped_consistently() {
        let multiplexer = Multiplexer::new();
        let channel = multiplexer.channel("room/1 lobby");

        assert!(multiplexer.get("room/1 lobby").is_some_and(|c| c.ptr_eq(&channel)));
        assert!(multiplexer.get("room%2F1%20lobby").is_none());
        assert_eq!(multiplexer.channel_names(), vec!["room/1 lobby".to_owned()]);
    }

    #[test]
    fn test_extension_runs_once_per_channel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let multiplexer = Multiplexer::builder()
            .extension(move |_: &Channel, _: &MultiplexOptions| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        multiplexer.channel("a");
        multiplexer.channel("a");
        multiplexer.channel("b");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_packets_never_create_channels() {
        let multiplexer = Multiplexer::new();
        let connection = attach(&multiplexer);

        multiplexer.on_data(&connection, json!([1, "x", "ghost", null]));
        multiplexer.on_data(&connection, json!([0, "x", "ghost", "payload"]));

        assert_eq!(multiplexer.channel_count(), 0);
        let memberships = multiplexer.memberships(connection.id()).expect("attached");
        assert!(memberships.is_empty());
    }

    #[test]
    fn test_malformed_packets_are_ignored() {
        let multiplexer = Multiplexer::new();
        let channel = multiplexer.channel("chat");
        let connection = attach(&multiplexer);

        multiplexer.on_data(&connection, json!({ "type": 1 }));
        multiplexer.on_data(&connection, json!("garbage"));
        multiplexer.on_data(&connection, json!([1]));
        multiplexer.on_data(&connection, json!([7, "x1", "chat", null]));

        assert_eq!(channel.connection_count(), 0);
    }

    #[test]
    fn test_subscribe_and_unsubscribe_keep_registry_in_step() {
        let multiplexer = Multiplexer::new();
        let channel = multiplexer.channel("chat");
        let connection = attach(&multiplexer);

        multiplexer.on_data(&connection, json!([1, "x1", "chat", null]));
        multiplexer.on_data(&connection, json!([1, "x2", "chat", null]));
        let memberships = multiplexer.memberships(connection.id()).expect("attached");
        assert_eq!(
            memberships.get(channel.key()),
            Some(&vec![MembershipId::new("x1"), MembershipId::new("x2")])
        );

        multiplexer.on_data(&connection, json!([2, "x1", "chat", null]));
        let memberships = multiplexer.memberships(connection.id()).expect("attached");
        assert_eq!(
            memberships.get(channel.key()),
            Some(&vec![MembershipId::new("x2")])
        );
        assert_eq!(channel.ids(), vec![MembershipId::new("x2")]);
    }

    #[test]
    fn test_disconnection_is_idempotent() {
        let multiplexer = Multiplexer::new();
        let channel = multiplexer.channel("chat");
        let connection = attach(&multiplexer);
        multiplexer.on_data(&connection, json!([1, "x1", "chat", null]));

        multiplexer.on_disconnection(connection.id());
        multiplexer.on_disconnection(connection.id());

        assert_eq!(channel.connection_count(), 0);
        assert!(multiplexer.memberships(connection.id()).is_none());
        assert_eq!(multiplexer.connection_count(), 0);
    }

    #[test]
    fn test_disconnection_skips_ids_reused_by_other_connections() {
        let multiplexer = Multiplexer::new();
        let channel = multiplexer.channel("chat");
        let a = attach(&multiplexer);
        let b = attach(&multiplexer);

        multiplexer.on_data(&a, json!([1, "x1", "chat", null]));
        multiplexer.on_data(&b, json!([2, "x1", "chat", null]));
        multiplexer.on_data(&b, json!([1, "x1", "chat", null]));

        multiplexer.on_disconnection(a.id());

        let holder = channel.get(&MembershipId::new("x1")).expect("b still holds x1");
        assert_eq!(holder.connection_id(), b.id());
    }

    #[test]
    fn test_disconnection_after_close_tolerates_missing_channels() {
        let multiplexer = Multiplexer::new();
        multiplexer.channel("chat");
        let connection = attach(&multiplexer);
        multiplexer.on_data(&connection, json!([1, "x1", "chat", null]));

        multiplexer.close();
        multiplexer.on_disconnection(connection.id());

        assert_eq!(multiplexer.channel_count(), 0);
        assert!(multiplexer.memberships(connection.id()).is_none());
    }

    #[test]
    fn test_close_destroys_each_channel() {
        let multiplexer = Multiplexer::new();
        let a = multiplexer.channel("a");
        let b = multiplexer.channel("b");

        multiplexer.close();
        multiplexer.close();

        assert!(a.is_destroyed());
        assert!(b.is_destroyed());
        assert_eq!(multiplexer.channel_count(), 0);

        let fresh = multiplexer.channel("a");
        assert!(!fresh.ptr_eq(&a));
        assert!(!fresh.is_destroyed());
    }
}
