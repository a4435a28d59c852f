//! Builder pattern for multiplexer configuration.
//!
//! # Example
//!
//! ```
//! use channel_multiplex::{DuplicatePolicy, Multiplexer};
//!
//! let multiplexer = Multiplexer::builder()
//!     .duplicate_policy(DuplicatePolicy::Replace)
//!     .extension(|channel: &channel_multiplex::Channel, _: &channel_multiplex::MultiplexOptions| {
//!         tracing::debug!(channel = channel.name(), "channel created");
//!     })
//!     .build();
//!
//! assert_eq!(multiplexer.channel_count(), 0);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use super::core::Multiplexer;
use super::extension::ChannelExtension;
use super::options::{DuplicatePolicy, MultiplexOptions};

// ============================================================================
// MultiplexerBuilder
// ============================================================================

/// Builder for configuring a [`Multiplexer`].
///
/// Use [`Multiplexer::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct MultiplexerBuilder {
    /// Options shared by every channel.
    options: MultiplexOptions,
    /// Hooks run for each new channel, in registration order.
    extensions: Vec<Arc<dyn ChannelExtension>>,
}

impl fmt::Debug for MultiplexerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexerBuilder")
            .field("options", &self.options)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

// ============================================================================
// MultiplexerBuilder Implementation
// ============================================================================

impl MultiplexerBuilder {
    /// Creates a builder with default options and no extensions.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: MultiplexOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the duplicate subscribe policy.
    #[inline]
    #[must_use]
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.options.duplicate_policy = policy;
        self
    }

    /// Enables or disables UNSUBSCRIBE notifications on server-side ends.
    #[inline]
    #[must_use]
    pub fn notify_peer(mut self, notify: bool) -> Self {
        self.options.notify_peer = notify;
        self
    }

    /// Adds a channel extension.
    #[must_use]
    pub fn extension(mut self, extension: impl ChannelExtension + 'static) -> Self {
        self.extensions.push(Arc::new(extension));
        self
    }

    /// Builds the multiplexer.
    #[must_use]
    pub fn build(self) -> Multiplexer {
        Multiplexer::from_parts(self.options, self.extensions)
    }
}

// ============================================================================
// Tests
// ============================================================================
