//! Multiplexer configuration.
//!
//! # Example
//!
//! ```
//! use channel_multiplex::{DuplicatePolicy, MultiplexOptions};
//!
//! let options = MultiplexOptions::new()
//!     .with_duplicate_policy(DuplicatePolicy::Replace)
//!     .with_notify_peer(false);
//!
//! assert_eq!(options.duplicate_policy, DuplicatePolicy::Replace);
//! ```
//!
//! Options also load from JSON config; missing fields keep their defaults:
//!
//! ```
//! use channel_multiplex::{DuplicatePolicy, MultiplexOptions};
//!
//! let options: MultiplexOptions =
//!     serde_json::from_str(r#"{ "duplicate_policy": "replace" }"#).unwrap();
//!
//! assert_eq!(options.duplicate_policy, DuplicatePolicy::Replace);
//! assert!(options.notify_peer);
//! ```

use serde::{Deserialize, Serialize};

// ============================================================================
// DuplicatePolicy
// ============================================================================

/// What a channel does when a subscribe reuses a live membership id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the existing membership and ignore the new subscribe.
    #[default]
    Reject,
    /// End the existing membership and install the new one.
    Replace,
}

// ============================================================================
// MultiplexOptions
// ============================================================================

/// Behaviour shared by every channel of a multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexOptions {
    /// Duplicate subscribe handling.
    pub duplicate_policy: DuplicatePolicy,

    /// Send an UNSUBSCRIBE packet to the peer when the server ends a
    /// membership (host `end()`, replacement, channel destroy).
    pub notify_peer: bool,
}

impl Default for MultiplexOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiplexOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Reject,
            notify_peer: true,
        }
    }

    /// Sets the duplicate subscribe policy.
    #[inline]
    #[must_use]
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Enables or disables peer notification on server-side ends.
    #[inline]
    #[must_use]
    pub fn with_notify_peer(mut self, notify: bool) -> Self {
        self.notify_peer = notify;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
