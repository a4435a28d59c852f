//! Channel extensions.
//!
//! An extension is handed every channel the moment it is created, before any
//! packet can reach it. Grouping layers (rooms, presence, metrics) use this
//! to install their own handlers or bookkeeping.
//!
//! Extensions are passed to
//! [`MultiplexerBuilder::extension`](super::MultiplexerBuilder::extension)
//! at construction time; there is no global plugin namespace.

// ============================================================================
// Imports
// ============================================================================

use crate::channel::Channel;

use super::options::MultiplexOptions;

// ============================================================================
// ChannelExtension
// ============================================================================

/// Hook run once for every newly created channel.
///
/// Called while the multiplexer's channel table is locked for writing, so an
/// implementation must not call back into the multiplexer's table
/// (`channel`, `get`, `close`). Operating on the given channel is fine.
pub trait ChannelExtension: Send + Sync {
    /// Instruments a freshly created channel.
    fn instrument(&self, channel: &Channel, options: &MultiplexOptions);
}

impl<F> ChannelExtension for F
where
    F: Fn(&Channel, &MultiplexOptions) + Send + Sync,
{
    fn instrument(&self, channel: &Channel, options: &MultiplexOptions) {
        self(channel, options);
    }
}
