//! # court-core — Arbitration Domain Primitives
//!
//! Shared vocabulary for the per-channel arbitration engine:
//!
//! - **Identity** ([`identity`]): Channel and contract identity newtypes.
//!   Each identifier is a distinct type — you cannot pass a
//!   [`ContractId`] where a [`ShortChannelId`] is expected.
//!
//! - **State** ([`state`]): The monotonic arbitrator lifecycle enum and
//!   its transition validator. States are persisted and reloaded across
//!   restarts, so the machine is a validated enum rather than typestate.
//!
//! - **Close** ([`close`]): How a channel left the chain — close kinds
//!   and the close summary handed to the embedding channel manager.
//!
//! - **Action** ([`action`]): The recorded chain-action decision: which
//!   contracts get claimed now, which wait, which need nothing.

pub mod action;
pub mod close;
pub mod identity;
pub mod state;

// Re-export primary types for ergonomic imports.

pub use action::{ChainAction, ChainActionMap};
pub use close::{ChannelCloseSummary, CloseKind};
pub use identity::{ChannelDescriptor, ContractId, ShortChannelId};
pub use state::{validate_transition, ArbitratorState, StateError};
