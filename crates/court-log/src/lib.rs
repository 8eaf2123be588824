//! # court-log — Durable Arbitration Log
//!
//! The storage contract the channel arbitrator persists through, and the
//! records it writes:
//!
//! - **Log** ([`log`]): The [`ArbitratorLog`] trait — state read/write,
//!   the unresolved-contract set, the write-once closure-outcome record,
//!   and the chain-action decision snapshot. Every operation is
//!   replay-tolerant; a write failure aborts the transition that
//!   attempted it.
//!
//! - **Records** ([`records`]): What gets persisted — resolver
//!   snapshots with opaque payloads, HTLC/breach resolution seeds, and
//!   the immutable [`ContractResolutions`] record.
//!
//! - **Memory** ([`memory`]): [`MemoryLog`], an in-process
//!   implementation of the contract for tests and embedders that manage
//!   durability elsewhere.

pub mod log;
pub mod memory;
pub mod records;

// Re-export primary types for ergonomic imports.

pub use log::{ArbitratorLog, LogError};
pub use memory::MemoryLog;
pub use records::{
    BreachResolutionSeed, ContractResolutions, HtlcResolutionSeed, ResolverKind, ResolverSnapshot,
};
