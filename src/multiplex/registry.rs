//! Per-connection membership registry.
//!
//! For every live physical connection the registry records which channels it
//! joined and which membership ids it holds in each. Entries reference
//! memberships by id only; the virtual connections themselves live in the
//! channels' subscriber tables.
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │           ConnectionRegistry              │
//! │  ConnectionId=1 → { "chat" → [x1, x2],    │
//! │                     "news" → [n7] }       │
//! │  ConnectionId=2 → { }                     │
//! └───────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::identifiers::{ChannelKey, ConnectionId, MembershipId};

// ============================================================================
// Types
// ============================================================================

/// Channels joined by one connection, with the ids held in each, in
/// subscription order.
pub type Memberships = FxHashMap<ChannelKey, Vec<MembershipId>>;

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Membership table keyed by physical connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Mutex<FxHashMap<ConnectionId, Memberships>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an empty entry for a connection.
    ///
    /// Returns `false` and leaves the entry untouched if it already exists.
    pub(crate) fn open(&self, connection: ConnectionId) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&connection) {
            return false;
        }
        entries.insert(connection, Memberships::default());
        true
    }

    /// Records that `connection` holds `id` in channel `key`.
    ///
    /// Returns `false` if the connection has no entry (never opened or
    /// already disconnected).
    pub(crate) fn record(&self, connection: ConnectionId, key: &ChannelKey, id: &MembershipId) -> bool {
        let mut entries = self.entries.lock();
        let Some(memberships) = entries.get_mut(&connection) else {
            return false;
        };

        let ids = memberships.entry(key.clone()).or_default();
        if !ids.contains(id) {
            ids.push(id.clone());
        }
        true
    }

    /// Removes `id` from the connection's entry for `key`.
    ///
    /// Drops the channel from the entry once its last id is gone. Returns
    /// `true` if something was removed.
    pub(crate) fn forget(&self, connection: ConnectionId, key: &ChannelKey, id: &MembershipId) -> bool {
        let mut entries = self.entries.lock();
        let Some(memberships) = entries.get_mut(&connection) else {
            return false;
        };
        let Some(ids) = memberships.get_mut(key) else {
            return false;
        };

        let before = ids.len();
        ids.retain(|held| held != id);
        let removed = ids.len() != before;

        if ids.is_empty() {
            memberships.remove(key);
        }
        removed
    }

    /// Returns `true` if the connection's entry lists `id` under `key`.
    pub(crate) fn holds(&self, connection: ConnectionId, key: &ChannelKey, id: &MembershipId) -> bool {
        self.entries
            .lock()
            .get(&connection)
            .and_then(|memberships| memberships.get(key))
            .is_some_and(|ids| ids.contains(id))
    }

    /// Removes and returns a connection's entry.
    pub(crate) fn take(&self, connection: ConnectionId) -> Option<Memberships> {
        self.entries.lock().remove(&connection)
    }

    /// Returns `true` if the connection has an open entry.
    #[inline]
    #[must_use]
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.entries.lock().contains_key(&connection)
    }

    /// Returns a snapshot of a connection's memberships.
    #[must_use]
    pub fn memberships(&self, connection: ConnectionId) -> Option<Memberships> {
        self.entries.lock().get(&connection).cloned()
    }

    /// Returns the number of tracked connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no connection is tracked.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ChannelKey {
        ChannelKey::new(name)
    }

    fn id(raw: &str) -> MembershipId {
        MembershipId::new(raw)
    }

    #[test]
    fn test_open_is_not_destructive() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::next();

        assert!(registry.open(conn));
        assert!(registry.record(conn, &key("chat"), &id("x1")));
        assert!(!registry.open(conn));

        let memberships = registry.memberships(conn).expect("entry exists");
        assert_eq!(memberships.get(&key("chat")), Some(&vec![id("x1")]));
    }

    #[test]
    fn test_record_requires_open_entry() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::next();

        assert!(!registry.record(conn, &key("chat"), &id("x1")));
        assert!(!registry.contains(conn));
    }

    #[test]
    fn test_record_keeps_order_without_duplicates() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::next();
        registry.open(conn);

        registry.record(conn, &key("a"), &id("2"));
        registry.record(conn, &key("a"), &id("1"));
        registry.record(conn, &key("a"), &id("2"));

        let memberships = registry.memberships(conn).expect("entry exists");
        assert_eq!(memberships.get(&key("a")), Some(&vec![id("2"), id("1")]));
    }

    #[test]
    fn test_forget_prunes_empty_channel() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::next();
        registry.open(conn);
        registry.record(conn, &key("a"), &id("1"));

        assert!(registry.forget(conn, &key("a"), &id("1")));
        assert!(!registry.forget(conn, &key("a"), &id("1")));

        let memberships = registry.memberships(conn).expect("entry exists");
        assert!(memberships.is_empty());
    }

    #[test]
    fn test_holds_tracks_record_and_take() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::next();
        registry.open(conn);
        registry.record(conn, &key("a"), &id("1"));

        assert!(registry.holds(conn, &key("a"), &id("1")));
        assert!(!registry.holds(conn, &key("a"), &id("2")));
        assert!(!registry.holds(conn, &key("b"), &id("1")));

        registry.take(conn);
        assert!(!registry.holds(conn, &key("a"), &id("1")));
    }

    #[test]
    fn test_take_discards_entry() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::next();
        registry.open(conn);
        registry.record(conn, &key("a"), &id("1"));

        let taken = registry.take(conn).expect("entry exists");
        assert_eq!(taken.len(), 1);
        assert!(registry.take(conn).is_none());
        assert!(registry.is_empty());
    }
}
