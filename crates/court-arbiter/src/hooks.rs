//! # External Collaborator Hooks
//!
//! The arbitrator never builds, signs, or stores transactions itself;
//! it drives the collaborators behind this trait. Hooks are invoked from
//! the decision loop only, one at a time, after the transition that
//! triggers them has been persisted — and each invocation is raced
//! against the shutdown signal, so a blocking hook cannot wedge
//! teardown.

use async_trait::async_trait;
use bitcoin::Transaction;
use thiserror::Error;

use court_core::ChannelCloseSummary;
use court_log::HtlcResolutionSeed;

/// Outcome of handing a transaction to the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    /// A conflicting transaction already spent the funding output. This
    /// is the expected race: the peer's commitment reached the network
    /// first, and some valid commitment will confirm regardless.
    #[error("output already spent by a conflicting transaction")]
    AlreadySpent,

    /// The broadcast failed outright.
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Failure of a lifecycle marker or producer callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Wrap a failure reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// What the force-close producer hands back: the signed commitment to
/// publish plus the artifacts resolvers will need if that commitment is
/// the one that confirms.
#[derive(Debug, Clone)]
pub struct LocalForceCloseSummary {
    /// Our latest commitment transaction, ready to broadcast.
    pub close_tx: Transaction,
    /// Per-HTLC resolution artifacts for the local commitment.
    pub htlc_seeds: Vec<HtlcResolutionSeed>,
}

/// The external surface the arbitrator drives.
#[async_trait]
pub trait ChannelHooks: Send + Sync {
    /// Publish a transaction to the network.
    async fn broadcast(&self, tx: &Transaction) -> Result<(), BroadcastError>;

    /// Produce the local force-close package for this channel.
    async fn build_force_close(&self) -> Result<LocalForceCloseSummary, HookError>;

    /// Record that our commitment has been handed to the network. Must
    /// be idempotent: recovery into `CommitmentBroadcasted` replays it,
    /// since a crash may have landed between the commit and the call.
    async fn mark_commitment_broadcasted(&self) -> Result<(), HookError>;

    /// Record that a closing transaction confirmed on-chain. Must be
    /// idempotent: recovery into `ContractClosed` replays it from the
    /// durable resolution record.
    async fn mark_channel_closed(&self, summary: &ChannelCloseSummary) -> Result<(), HookError>;

    /// Record that every contract attached to the channel has been
    /// resolved. Must be idempotent: a crash between this call and the
    /// terminal state commit replays it on recovery.
    async fn mark_channel_resolved(&self) -> Result<(), HookError>;
}
