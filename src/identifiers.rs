//! Type-safe identifiers for connections, memberships and channels.
//!
//! | Type | Wraps | Source |
//! |------|-------|--------|
//! | [`ConnectionId`] | `u64` | Allocated per accepted physical connection |
//! | [`MembershipId`] | `String` + wire `Value` | Caller-supplied id inside a packet |
//! | [`ChannelKey`] | `String` | Escaped channel name used as table key |

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::cmp;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::result::Result as StdResult;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;

// ============================================================================
// ConnectionId
// ============================================================================

/// Counter for connection ids. Starts at 1 so 0 is never handed out.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next process-unique connection id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a connection id from a raw value.
    ///
    /// Returns `None` for 0.
    #[inline]
    #[must_use]
    pub const fn from_u64(value: u64) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// MembershipId
// ============================================================================

/// Caller-supplied id of a virtual connection inside a channel.
///
/// Packets may carry the id as a string or a number. Identity is the decimal
/// text form, so `1` and `"1"` address the same membership, but outbound
/// packets echo the id exactly as the peer sent it.
#[derive(Debug, Clone)]
pub struct MembershipId {
    /// Canonical text; equality, hashing and ordering use only this.
    text: String,
    /// Form written back to the peer.
    wire: Value,
}

impl MembershipId {
    /// Creates a membership id from a string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let text = id.into();
        Self {
            wire: Value::String(text.clone()),
            text,
        }
    }

    /// Extracts a membership id from a packet field.
    ///
    /// Only strings and numbers are accepted.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(Self {
            text,
            wire: value.clone(),
        })
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the id as the peer sent it, for outbound packets.
    #[inline]
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.wire.clone()
    }
}

impl PartialEq for MembershipId {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for MembershipId {}

impl Hash for MembershipId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialOrd for MembershipId {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MembershipId {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.text.cmp(&other.text)
    }
}

impl Serialize for MembershipId {
    fn serialize<S: Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        self.wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MembershipId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> StdResult<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| <D::Error as de::Error>::custom("membership id must be a string or a number"))
    }
}

impl fmt::Display for MembershipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for MembershipId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MembershipId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// ChannelKey
// ============================================================================

/// Canonical table key for a channel name.
///
/// The name is percent-encoded, which is reversible, so any name (including
/// empty strings, separators and non-ASCII text) maps to exactly one key.
/// Every lookup site must go through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Canonicalises a channel name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(urlencoding::encode(name).into_owned())
    }

    /// Returns the escaped form.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the original channel name.
    #[must_use]
    pub fn name(&self) -> Cow<'_, str> {
        // Keys are only ever built from valid UTF-8 names.
        urlencoding::decode(&self.0).unwrap_or(Cow::Borrowed(&self.0))
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
