//! Channel subscriber table.
//!
//! A [`Channel`] owns the memberships of one channel name. It keeps its
//! subscriber table and the owning connections' registry entries in step:
//! every membership it inserts is recorded in the registry, and every
//! membership it removes is pruned from it.
//!
//! # Lock Order
//!
//! The registry lock is innermost: it may be taken while the subscriber
//! table lock is held, never the other way round. No lock is held while
//! invoking the event handler.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::identifiers::{ChannelKey, ConnectionId, MembershipId};
use crate::multiplex::options::{DuplicatePolicy, MultiplexOptions};
use crate::multiplex::registry::ConnectionRegistry;
use crate::transport::Connection;

use super::event::{ChannelEvent, ChannelEventHandler};
use super::virtual_connection::VirtualConnection;

// ============================================================================
// Types
// ============================================================================

/// Mutable channel state, guarded by one lock.
#[derive(Default)]
struct ChannelState {
    /// Current subscribers.
    connections: FxHashMap<MembershipId, VirtualConnection>,
    /// Set by `destroy`; the channel ignores every operation afterwards.
    destroyed: bool,
}

/// Shared channel internals.
pub(crate) struct ChannelInner {
    /// Name as given by the host.
    name: String,
    /// Canonical key of `name`.
    key: ChannelKey,
    /// Multiplexer-wide behaviour.
    options: MultiplexOptions,
    /// Membership registry of the owning multiplexer.
    registry: Weak<ConnectionRegistry>,
    /// Subscriber table.
    state: Mutex<ChannelState>,
    /// Host callback.
    handler: Mutex<Option<ChannelEventHandler>>,
}

// ============================================================================
// Channel
// ============================================================================

/// A named pub/sub group multiplexed over shared connections.
///
/// Obtained from [`Multiplexer::channel`](crate::Multiplexer::channel).
/// Cheap to clone; clones refer to the same channel.
///
/// # Example
///
/// ```
/// use channel_multiplex::{ChannelEvent, Multiplexer};
///
/// let multiplexer = Multiplexer::new();
/// let chat = multiplexer.channel("chat");
///
/// chat.set_event_handler(|event| {
///     if let ChannelEvent::Data { connection, payload } = event {
///         let _ = connection.write(payload);
///     }
/// });
/// ```
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Arc<ChannelInner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("connection_count", &self.connection_count())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Channel - Constructor
// ============================================================================

impl Channel {
    /// Creates an empty channel bound to a multiplexer's registry.
    pub(crate) fn new(
        name: &str,
        options: MultiplexOptions,
        registry: Weak<ConnectionRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.to_owned(),
                key: ChannelKey::new(name),
                options,
                registry,
                state: Mutex::new(ChannelState::default()),
                handler: Mutex::new(None),
            }),
        }
    }

    pub(super) fn from_inner(inner: Arc<ChannelInner>) -> Self {
        Self { inner }
    }
}

// ============================================================================
// Channel - Accessors
// ============================================================================

impl Channel {
    /// Returns the channel name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the canonical key of the channel name.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &ChannelKey {
        &self.inner.key
    }

    /// Returns the number of current subscribers.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Returns the membership ids of current subscribers.
    #[must_use]
    pub fn ids(&self) -> Vec<MembershipId> {
        self.inner.state.lock().connections.keys().cloned().collect()
    }

    /// Returns the subscriber holding `id`.
    #[must_use]
    pub fn get(&self, id: &MembershipId) -> Option<VirtualConnection> {
        self.inner.state.lock().connections.get(id).cloned()
    }

    /// Returns `true` once [`destroy`](Self::destroy) has run.
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Returns `true` if both handles refer to the same channel.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// Channel - Event Handler
// ============================================================================

impl Channel {
    /// Sets the event callback, replacing any previous one.
    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        *self.inner.handler.lock() = Some(Arc::new(handler));
    }

    /// Removes the event callback.
    pub fn clear_event_handler(&self) {
        *self.inner.handler.lock() = None;
    }

    fn emit(&self, event: ChannelEvent) {
        let handler = self.inner.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

// ============================================================================
// Channel - Membership Operations
// ============================================================================

impl Channel {
    /// Delivers a peer message to the membership `id`.
    ///
    /// Returns `false` if no such membership exists or the channel was
    /// destroyed; the message is dropped in that case.
    pub fn message(&self, id: &MembershipId, payload: Value) -> bool {
        let target = {
            let state = self.inner.state.lock();
            if state.destroyed {
                return false;
            }
            state.connections.get(id).cloned()
        };

        let Some(connection) = target else {
            trace!(channel = %self.inner.name, %id, "Message for unknown membership dropped");
            return false;
        };

        self.emit(ChannelEvent::Data {
            connection,
            payload,
        });
        true
    }

    /// Subscribes `connection` under membership `id`.
    ///
    /// The membership is recorded in the connection's registry entry before
    /// it enters the subscriber table, so a refused subscribe never disturbs
    /// the current holder of `id`. Returns `None` when the channel was
    /// destroyed, the id is taken and the policy is
    /// [`DuplicatePolicy::Reject`], or the connection is not registered with
    /// the multiplexer.
    pub fn subscribe(&self, connection: &Connection, id: MembershipId) -> Option<VirtualConnection> {
        let owner = connection.id();

        if !self.admits(&id) {
            return None;
        }

        let registry = self.inner.registry.upgrade()?;
        if !registry.record(owner, &self.inner.key, &id) {
            debug!(
                channel = %self.inner.name,
                %id,
                connection = %owner,
                "Subscribe from unregistered connection ignored"
            );
            return None;
        }

        let virtual_connection = VirtualConnection::new(id.clone(), self, connection.clone());

        let replaced = {
            let mut state = self.inner.state.lock();
            let holder = state.connections.get(&id).map(VirtualConnection::connection_id);
            let reject = self.inner.options.duplicate_policy == DuplicatePolicy::Reject;

            // Another path won the id or destroyed the channel meanwhile.
            if state.destroyed || (holder.is_some() && reject) {
                if holder != Some(owner) {
                    registry.forget(owner, &self.inner.key, &id);
                }
                return None;
            }

            state.connections.insert(id.clone(), virtual_connection.clone())
        };

        if let Some(previous) = replaced {
            self.retire(&previous, self.inner.options.notify_peer);
        }

        // Retired by a concurrent destroy or unsubscribe.
        if virtual_connection.is_closed() {
            return None;
        }

        // The connection disconnected between record and insert.
        if !registry.holds(owner, &self.inner.key, &id) {
            if self.remove_exact(&virtual_connection) {
                virtual_connection.mark_closed();
            }
            return None;
        }

        debug!(
            channel = %self.inner.name,
            %id,
            connection = %owner,
            "Subscribed"
        );
        self.emit(ChannelEvent::Connection(virtual_connection.clone()));
        Some(virtual_connection)
    }

    /// Checks destroy state and the duplicate policy before any registry
    /// bookkeeping happens.
    fn admits(&self, id: &MembershipId) -> bool {
        let state = self.inner.state.lock();
        if state.destroyed {
            debug!(channel = %self.inner.name, %id, "Subscribe on destroyed channel ignored");
            return false;
        }

        let Some(existing) = state.connections.get(id) else {
            return true;
        };

        match self.inner.options.duplicate_policy {
            DuplicatePolicy::Reject => {
                warn!(
                    channel = %self.inner.name,
                    %id,
                    holder = %existing.connection_id(),
                    "Duplicate subscribe rejected"
                );
                false
            }
            DuplicatePolicy::Replace => {
                warn!(
                    channel = %self.inner.name,
                    %id,
                    holder = %existing.connection_id(),
                    "Duplicate subscribe replaces existing membership"
                );
                true
            }
        }
    }

    /// Removes the membership `id` at the peer's request.
    ///
    /// The peer is not notified, since it asked. Returns the removed
    /// membership, or `None` if there was none.
    pub fn unsubscribe(&self, id: &MembershipId) -> Option<VirtualConnection> {
        let removed = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return None;
            }
            state.connections.remove(id)
        };

        let Some(virtual_connection) = removed else {
            trace!(channel = %self.inner.name, %id, "Unsubscribe for unknown membership");
            return None;
        };

        self.retire(&virtual_connection, false);
        Some(virtual_connection)
    }

    /// Sends a MESSAGE packet to every subscriber.
    ///
    /// Returns the number of memberships the payload was queued for.
    pub fn write(&self, payload: Value) -> usize {
        let targets: Vec<VirtualConnection> = {
            let state = self.inner.state.lock();
            if state.destroyed {
                return 0;
            }
            state.connections.values().cloned().collect()
        };

        targets
            .iter()
            .filter(|target| target.write(payload.clone()).is_ok())
            .count()
    }

    /// Ends every membership and makes the channel inert.
    ///
    /// Runs at most once; later calls and later operations are no-ops.
    pub fn destroy(&self) {
        let drained: Vec<VirtualConnection> = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.connections.drain().map(|(_, vc)| vc).collect()
        };

        let count = drained.len();
        for virtual_connection in &drained {
            self.retire(virtual_connection, self.inner.options.notify_peer);
        }

        self.clear_event_handler();

        debug!(channel = %self.inner.name, count, "Channel destroyed");
    }
}

// ============================================================================
// Channel - Internal
// ============================================================================

impl Channel {
    /// Force-closes `id` if it is still held by `owner`.
    ///
    /// Used on disconnection, so the peer is not notified.
    pub(crate) fn close_member(&self, id: &MembershipId, owner: ConnectionId) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            match state.connections.get(id) {
                Some(current) if current.connection_id() == owner => state.connections.remove(id),
                _ => None,
            }
        };

        match removed {
            Some(virtual_connection) => self.retire(&virtual_connection, false),
            None => false,
        }
    }

    /// Removes and retires a membership ended through its own handle.
    pub(crate) fn release(&self, virtual_connection: &VirtualConnection) {
        self.remove_exact(virtual_connection);
        self.retire(virtual_connection, self.inner.options.notify_peer);
    }

    /// Removes `virtual_connection` only if it is the current holder of its id.
    fn remove_exact(&self, virtual_connection: &VirtualConnection) -> bool {
        let mut state = self.inner.state.lock();
        match state.connections.get(virtual_connection.id()) {
            Some(current) if current.ptr_eq(virtual_connection) => {
                state.connections.remove(virtual_connection.id());
                true
            }
            _ => false,
        }
    }

    /// Closes a membership already removed from the table.
    ///
    /// Returns `false` if another path closed it first.
    fn retire(&self, virtual_connection: &VirtualConnection, notify_peer: bool) -> bool {
        if !virtual_connection.mark_closed() {
            return false;
        }

        self.forget(virtual_connection);

        if notify_peer {
            virtual_connection.notify_peer();
        }

        debug!(
            channel = %self.inner.name,
            id = %virtual_connection.id(),
            connection = %virtual_connection.connection_id(),
            "Membership ended"
        );
        self.emit(ChannelEvent::Disconnection(virtual_connection.clone()));
        true
    }

    /// Prunes a retired membership from its owner's registry entry.
    ///
    /// Skipped while the table holds a newer membership of the same
    /// connection under the same id, which shares the entry.
    fn forget(&self, virtual_connection: &VirtualConnection) {
        let Some(registry) = self.inner.registry.upgrade() else {
            return;
        };
        let owner = virtual_connection.connection_id();

        let state = self.inner.state.lock();
        let superseded = state
            .connections
            .get(virtual_connection.id())
            .is_some_and(|current| {
                !current.ptr_eq(virtual_connection) && current.connection_id() == owner
            });

        if !superseded {
            registry.forget(owner, &self.inner.key, virtual_connection.id());
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
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::transport::ConnectionCommand;

    type Events = Arc<Mutex<Vec<ChannelEvent>>>;

    fn setup(options: MultiplexOptions) -> (Arc<ConnectionRegistry>, Channel) {
        let registry = Arc::new(ConnectionRegistry::new());
        let channel = Channel::new("chat", options, Arc::downgrade(&registry));
        (registry, channel)
    }

    fn connect(registry: &ConnectionRegistry) -> (Connection, UnboundedReceiver<ConnectionCommand>) {
        let (connection, rx) = Connection::in_memory();
        registry.open(connection.id());
        (connection, rx)
    }

    fn record_events(channel: &Channel) -> Events {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        channel.set_event_handler(move |event| sink.lock().push(event));
        events
    }

    fn id(raw: &str) -> MembershipId {
        MembershipId::new(raw)
    }

    #[test]
    fn test_subscribe_records_membership() {
        let (registry, channel) = setup(MultiplexOptions::default());
        let (conn, _rx) = connect(&registry);
        let events = record_events(&channel);

        let vc = channel.subscribe(&conn, id("x1")).expect("subscribed");

        assert_eq!(vc.id(), &id("x1"));
        assert_eq!(vc.connection_id(), conn.id());
        assert_eq!(channel.connection_count(), 1);

        let memberships = registry.memberships(conn.id()).expect("registered");
        assert_eq!(memberships.get(channel.key()), Some(&vec![id("x1")]));

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChannelEvent::Connection(v) if v.ptr_eq(&vc)));
    }

    #[test]
    fn test_subscribe_from_unregistered_connection_is_rolled_back() {
        let (_registry, channel) = setup(MultiplexOptions::default());
        let (conn, _rx) = Connection::in_memory();
        let events = record_events(&channel);

        assert!(channel.subscribe(&conn, id("x1")).is_none());
        assert_eq!(channel.connection_count(), 0);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_duplicate_subscribe_rejected_by_default() {
        let (registry, channel) = setup(MultiplexOptions::default());
        let (a, _rx_a) = connect(&registry);
        let (b, _rx_b) = connect(&registry);

        let first = channel.subscribe(&a, id("x1")).expect("subscribed");
        assert!(channel.subscribe(&b, id("x1")).is_none());

        let holder = channel.get(&id("x1")).expect("still held");
        assert!(holder.ptr_eq(&first));
        assert!(!first.is_closed());
        assert!(registry.memberships(b.id()).expect("registered").is_empty());
    }

    #[test]
    fn test_duplicate_subscribe_replace_policy() {
        let options = MultiplexOptions::new().with_duplicate_policy(DuplicatePolicy::Replace);
        let (registry, channel) = setup(options);
        let (a, mut rx_a) = connect(&registry);
        let (b, _rx_b) = connect(&registry);

        let first = channel.subscribe(&a, id("x1")).expect("subscribed");
        let second = channel.subscribe(&b, id("x1")).expect("replaced");

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(channel.get(&id("x1")).expect("held").ptr_eq(&second));

        assert!(registry.memberships(a.id()).expect("registered").is_empty());
        assert_eq!(
            registry.memberships(b.id()).expect("registered").get(channel.key()),
            Some(&vec![id("x1")])
        );

        assert_eq!(
            rx_a.try_recv().ok(),
            Some(ConnectionCommand::Send(json!([2, "x1", "chat", null])))
        );
    }

    #[test]
    fn test_replace_from_unregistered_connection_keeps_holder() {
        let options = MultiplexOptions::new().with_duplicate_policy(DuplicatePolicy::Replace);
        let (registry, channel) = setup(options);
        let (a, mut rx_a) = connect(&registry);
        let (stray, _rx_stray) = Connection::in_memory();

        let holder = channel.subscribe(&a, id("x1")).expect("subscribed");
        let events = record_events(&channel);

        assert!(channel.subscribe(&stray, id("x1")).is_none());

        assert_eq!(channel.connection_count(), 1);
        assert!(channel.get(&id("x1")).expect("held").ptr_eq(&holder));
        assert!(!holder.is_closed());
        assert_eq!(
            registry.memberships(a.id()).expect("registered").get(channel.key()),
            Some(&vec![id("x1")])
        );
        assert!(rx_a.try_recv().is_err());
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_replace_by_same_connection_keeps_registry_entry() {
        let options = MultiplexOptions::new().with_duplicate_policy(DuplicatePolicy::Replace);
        let (registry, channel) = setup(options);
        let (conn, _rx) = connect(&registry);

        let first = channel.subscribe(&conn, id("x1")).expect("subscribed");
        let second = channel.subscribe(&conn, id("x1")).expect("replaced");

        assert!(first.is_closed());
        assert!(channel.get(&id("x1")).expect("held").ptr_eq(&second));
        assert_eq!(
            registry.memberships(conn.id()).expect("registered").get(channel.key()),
            Some(&vec![id("x1")])
        );
    }

    #[test]
    fn test_message_routes_to_membership() {
        let (registry, channel) = setup(MultiplexOptions::default());
        let (conn, _rx) = connect(&registry);
        channel.subscribe(&conn, id("x1")).expect("subscribed");
        let events = record_events(&channel);

        assert!(channel.message(&id("x1"), json!("hello")));
        assert!(!channel.message(&id("missing"), json!("lost")));

        let events = events.lock();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChannelEvent::Data {
                connection,
                payload,
            } => {
                assert_eq!(connection.id(), &id("x1"));
                assert_eq!(payload, &json!("hello"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unsubscribe_prunes_registry_without_echo() {
        let (registry, channel) = setup(MultiplexOptions::default());
        let (conn, mut rx) = connect(&registry);
        let vc = channel.subscribe(&conn, id("x1")).expect("subscribed");

        let removed = channel.unsubscribe(&id("x1")).expect("removed");

        assert!(removed.ptr_eq(&vc));
        assert!(vc.is_closed());
        assert_eq!(channel.connection_count(), 0);
        assert!(registry.memberships(conn.id()).expect("registered").is_empty());
        assert!(rx.try_recv().is_err());
        assert!(channel.unsubscribe(&id("x1")).is_none());
    }

    #[test]
    fn test_end_notifies_peer_once() {
        let (registry, channel) = setup(MultiplexOptions::default());
        let (conn, mut rx) = connect(&registry);
        let vc = channel.subscribe(&conn, id("x1")).expect("subscribed");
        let events = record_events(&channel);

        vc.end();
        vc.end();

        assert!(vc.is_closed());
        assert_eq!(channel.connection_count(), 0);
        assert!(registry.memberships(conn.id()).expect("registered").is_empty());
        assert_eq!(
            rx.try_recv().ok(),
            Some(ConnectionCommand::Send(json!([2, "x1", "chat", null])))
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_write_after_end_fails() {
        let (registry, channel) = setup(MultiplexOptions::default());
        let (conn, mut rx) = connect(&registry);
        let vc = channel.subscribe(&conn, id("x1")).expect("subscribed");

        vc.write(json!({ "n": 1 })).expect("open membership");
        assert_eq!(
            rx.try_recv().ok(),
            Some(ConnectionCommand::Send(json!([0, "x1", "chat", { "n": 1 }])))
        );

        vc.end();
        let err = vc.write(json!(2)).unwrap_err();
        assert!(matches!(err, crate::Error::MembershipClosed { .. }));
    }

    #[test]
    fn test_broadcast_write() {
        let (registry, channel) = setup(MultiplexOptions::default());
        let (a, mut rx_a) = connect(&registry);
        let (b, rx_b) = connect(&registry);
        channel.subscribe(&a, id("1")).expect("subscribed");
        channel.subscribe(&b, id("2")).expect("subscribed");
        drop(rx_b);

        assert_eq!(channel.write(json!("all")), 1);
        assert_eq!(
            rx_a.try_recv().ok(),
            Some(ConnectionCommand::Send(json!([0, "1", "chat", "all"])))
        );
    }

    #[test]
    fn test_close_member_checks_owner() {
        let (registry, channel) = setup(MultiplexOptions::default());
        let (a, _rx_a) = connect(&registry);
        let (b, _rx_b) = connect(&registry);
        let vc = channel.subscribe(&a, id("x1")).expect("subscribed");

        assert!(!channel.close_member(&id("x1"), b.id()));
        assert!(!vc.is_closed());

        assert!(channel.close_member(&id("x1"), a.id()));
        assert!(vc.is_closed());
        assert!(!channel.close_member(&id("x1"), a.id()));
    }

    #[test]
    fn test_destroy_is_final() {
        let (registry, channel) = setup(MultiplexOptions::default());
        let (conn, _rx) = connect(&registry);
        let vc = channel.subscribe(&conn, id("x1")).expect("subscribed");
        let events = record_events(&channel);

        channel.destroy();
        channel.destroy();

        assert!(channel.is_destroyed());
        assert!(vc.is_closed());
        assert_eq!(events.lock().len(), 1);
        assert!(registry.memberships(conn.id()).expect("registered").is_empty());

        assert!(channel.subscribe(&conn, id("x2")).is_none());
        assert!(!channel.message(&id("x1"), json!(1)));
        assert!(channel.unsubscribe(&id("x1")).is_none());
        assert_eq!(channel.write(json!(1)), 0);
    }
}
