//! # Arbitrator Lifecycle
//!
//! The per-channel arbitration lifecycle:
//! `Default → BroadcastCommit → CommitmentBroadcasted → ContractClosed →
//! FullyResolved`, with the cooperative/remote shortcut
//! `Default → ContractClosed` when no local broadcast was ever needed.
//!
//! ## Design Choice: Validated Enum over Typestate
//!
//! The state is written to and reloaded from a durable log at arbitrary
//! points in the lifecycle, so it is never known at compile time. A
//! validated enum serializes directly via serde and is checked at the
//! single transition point, [`validate_transition`]. Re-committing the
//! current state is a no-op by contract — crash replays re-apply
//! transitions idempotently — so only *backward* movement is an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// State enum
// ---------------------------------------------------------------------------

/// The lifecycle state of a channel arbitrator.
///
/// Variant order is meaningful: the derived `Ord` is the lifecycle
/// order, and the machine only ever moves to a strictly greater state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ArbitratorState {
    /// The channel is open and operating off-chain; no closure has been
    /// requested or observed.
    #[default]
    Default,

    /// A local force close was accepted and persisted; the commitment
    /// transaction is about to be published.
    BroadcastCommit,

    /// The publish attempt completed — successfully or losing the race
    /// to a conflicting commitment. Either way some valid commitment
    /// will confirm.
    CommitmentBroadcasted,

    /// A closing transaction of some kind confirmed on-chain. The origin
    /// (cooperative, local, remote, breach) is recorded in the
    /// resolution record but no longer distinguishes transitions.
    ContractClosed,

    /// Terminal: every in-flight contract has been resolved.
    FullyResolved,
}

impl ArbitratorState {
    /// Whether this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArbitratorState::FullyResolved)
    }

    /// Whether a chain closure event is meaningful in this state. Once
    /// the contract has closed, the closure observation already fired
    /// (a channel closes exactly one way on-chain).
    pub fn accepts_closure(&self) -> bool {
        matches!(
            self,
            ArbitratorState::Default
                | ArbitratorState::BroadcastCommit
                | ArbitratorState::CommitmentBroadcasted
        )
    }
}

impl std::fmt::Display for ArbitratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArbitratorState::Default => "default",
            ArbitratorState::BroadcastCommit => "broadcast_commit",
            ArbitratorState::CommitmentBroadcasted => "commitment_broadcasted",
            ArbitratorState::ContractClosed => "contract_closed",
            ArbitratorState::FullyResolved => "fully_resolved",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Transition validation
// ---------------------------------------------------------------------------

/// Invalid lifecycle movement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The lifecycle only moves forward; a committed state is never
    /// walked back.
    #[error("state regression: {from} -> {to}")]
    Regression {
        from: ArbitratorState,
        to: ArbitratorState,
    },
}

/// Validate a lifecycle movement.
///
/// `from == to` is accepted: a crash replay may re-commit the state the
/// log already holds, and that must not fail. Any backward movement is
/// a [`StateError::Regression`].
pub fn validate_transition(from: ArbitratorState, to: ArbitratorState) -> Result<(), StateError> {
    if to < from {
        return Err(StateError::Regression { from, to });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
