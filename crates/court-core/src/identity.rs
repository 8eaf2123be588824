//! # Identity Newtypes
//!
//! Domain-primitive newtypes identifying the arbitrated channel and its
//! in-flight contracts. The channel identity is immutable for the whole
//! arbitrator lifetime; durable records key off it across restarts.

use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Contract identity
// ---------------------------------------------------------------------------

/// A unique identifier for one value-bearing contract attached to a
/// closed channel (an HTLC output or a breach output) and the resolver
/// driving it to settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractId(Uuid);

impl ContractId {
    /// Create a new random contract identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a contract identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContractId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ContractId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "contract:{}", self.0)
    }
}

impl std::str::FromStr for ContractId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Channel identity
// ---------------------------------------------------------------------------

/// A short channel identifier packing the funding confirmation
/// coordinates (block height, transaction index, output index) into a
/// single `u64`, as gossiped between peers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ShortChannelId(u64);

impl ShortChannelId {
    /// Build from packed wire representation.
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Build from funding confirmation coordinates. `block_height` and
    /// `tx_index` are truncated to their 24-bit wire width.
    pub fn from_parts(block_height: u32, tx_index: u32, output_index: u16) -> Self {
        let block = u64::from(block_height & 0x00ff_ffff) << 40;
        let tx = u64::from(tx_index & 0x00ff_ffff) << 16;
        Self(block | tx | u64::from(output_index))
    }

    /// Packed wire representation.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Height of the block confirming the funding transaction.
    pub fn block_height(&self) -> u32 {
        ((self.0 >> 40) & 0x00ff_ffff) as u32
    }

    /// Index of the funding transaction within its block.
    pub fn tx_index(&self) -> u32 {
        ((self.0 >> 16) & 0x00ff_ffff) as u32
    }

    /// Index of the funding output within its transaction.
    pub fn output_index(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl std::fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.block_height(),
            self.tx_index(),
            self.output_index()
        )
    }
}

/// Immutable identity of an arbitrated channel: the funding outpoint on
/// chain plus the gossiped short identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// The funding outpoint the channel's life revolves around.
    pub channel_point: OutPoint,
    /// The packed short identifier of the confirmed funding output.
    pub short_channel_id: ShortChannelId,
}

impl ChannelDescriptor {
    /// Create a descriptor for a confirmed channel.
    pub fn new(channel_point: OutPoint, short_channel_id: ShortChannelId) -> Self {
        Self {
            channel_point,
            short_channel_id,
        }
    }
}

impl std::fmt::Display for ChannelDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.channel_point, self.short_channel_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
