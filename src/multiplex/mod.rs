//! Channel multiplexer.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Multiplexer`] | Channel table, packet routing, teardown |
//! | [`MultiplexerBuilder`] | Fluent configuration builder |
//! | [`MultiplexOptions`] | Behaviour shared by all channels |
//! | [`ConnectionRegistry`] | Memberships per physical connection |
//! | [`ChannelExtension`] | Hook run for each new channel |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for multiplexer configuration.
pub mod builder;

/// Multiplexer implementation.
pub mod core;

/// Channel creation hooks.
pub mod extension;

/// Multiplexer options.
pub mod options;

/// Per-connection membership registry.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Multiplexer;
pub use builder::MultiplexerBuilder;
pub use extension::ChannelExtension;
pub use options::{DuplicatePolicy, MultiplexOptions};
pub use registry::{ConnectionRegistry, Memberships};
