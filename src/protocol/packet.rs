//! Multiplex packet types.
//!
//! A packet is a JSON array consumed positionally:
//!
//! ```json
//! [type, id, name, payload]
//! ```
//!
//! | Field | JSON type | Meaning |
//! |-------|-----------|---------|
//! | `type` | integer | [`PacketType`] code |
//! | `id` | string or number | [`MembershipId`] inside the channel |
//! | `name` | string | Channel name |
//! | `payload` | any | Message body (optional, defaults to `null`) |
//!
//! Elements past the fourth are ignored.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{ChannelKey, MembershipId};

// ============================================================================
// PacketType
// ============================================================================

/// Operation carried by a packet.
///
/// Codes must match the peer exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Message for a membership.
    Message = 0,
    /// Join a channel under a membership id.
    Subscribe = 1,
    /// Leave a channel.
    Unsubscribe = 2,
}

impl PacketType {
    /// Returns the wire code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u64> for PacketType {
    type Error = Error;

    fn try_from(code: u64) -> Result<Self> {
        match code {
            0 => Ok(Self::Message),
            1 => Ok(Self::Subscribe),
            2 => Ok(Self::Unsubscribe),
            other => Err(Error::protocol(format!("unknown packet type {other}"))),
        }
    }
}

// ============================================================================
// Packet
// ============================================================================

/// A decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Operation.
    pub packet_type: PacketType,
    /// Target membership.
    pub id: MembershipId,
    /// Channel name as sent by the peer.
    pub name: String,
    /// Message body.
    pub payload: Value,
}

impl Packet {
    /// Creates a packet.
    #[inline]
    #[must_use]
    pub fn new(
        packet_type: PacketType,
        id: MembershipId,
        name: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            packet_type,
            id,
            name: name.into(),
            payload,
        }
    }

    /// Decodes a packet from a raw JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the value is not an array, a required
    /// field is missing or has the wrong type, or the type code is unknown.
    pub fn parse(raw: &Value) -> Result<Self> {
        let fields = raw
            .as_array()
            .ok_or_else(|| Error::protocol("packet is not an array"))?;

        let code = fields
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::protocol("missing or non-integer packet type"))?;
        let packet_type = PacketType::try_from(code)?;

        let id = fields
            .get(1)
            .and_then(MembershipId::from_value)
            .ok_or_else(|| Error::protocol("missing or invalid membership id"))?;

        let name = fields
            .get(2)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("missing or non-string channel name"))?;

        let payload = fields.get(3).cloned().unwrap_or(Value::Null);

        Ok(Self::new(packet_type, id, name, payload))
    }

    /// Returns the canonical key of the target channel.
    #[inline]
    #[must_use]
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(&self.name)
    }

    /// Encodes the packet as a JSON array.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.packet_type.code()),
            self.id.to_value(),
            Value::String(self.name.clone()),
            self.payload.clone(),
        ])
    }
}

// ============================================================================
// Tests
// ============================================================================
