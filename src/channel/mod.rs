//! Channels and their memberships.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Channel`] | Subscriber table for one channel name |
//! | [`VirtualConnection`] | One peer's membership in a channel |
//! | [`ChannelEvent`] | Notifications delivered to the host |

// ============================================================================
// Submodules
// ============================================================================

/// Channel subscriber table.
pub mod core;

/// Host-facing channel events.
pub mod event;

/// Membership handle.
pub mod virtual_connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Channel;
pub use event::{ChannelEvent, ChannelEventHandler};
pub use virtual_connection::VirtualConnection;
