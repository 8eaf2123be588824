//! # Chain Closure Events
//!
//! The chain watcher delivers closure observations over four typed
//! channels, one per way a channel can leave the chain. The outcomes are
//! mutually exclusive: at most one observation fires per channel
//! lifetime, so the arbitrator folds all four receivers into a single
//! [`ClosureObservation`] at its wait point.

use bitcoin::{Amount, Txid};
use tokio::sync::mpsc;

use court_core::CloseKind;
use court_log::{BreachResolutionSeed, HtlcResolutionSeed};

/// A cooperative closing transaction confirmed.
#[derive(Debug, Clone)]
pub struct CooperativeCloseObserved {
    /// The mutually signed closing transaction.
    pub closing_txid: Txid,
    /// Our balance settled directly by the closing transaction.
    pub settled_balance: Amount,
}

/// A commitment transaction confirmed unilaterally — ours or the
/// peer's, depending on which channel delivered it.
#[derive(Debug, Clone)]
pub struct UnilateralCloseObserved {
    /// The commitment transaction that spent the funding output.
    pub closing_txid: Txid,
    /// Our balance settled directly by the commitment.
    pub settled_balance: Amount,
    /// Resolution artifacts for each HTLC output on the confirmed
    /// commitment.
    pub htlc_seeds: Vec<HtlcResolutionSeed>,
}

/// A revoked commitment confirmed; everything is claimable through the
/// justice path.
#[derive(Debug, Clone)]
pub struct BreachObserved {
    /// Our balance settled directly, if any.
    pub settled_balance: Amount,
    /// The justice claim artifact.
    pub breach_seed: BreachResolutionSeed,
}

/// A closure observation folded down from whichever typed channel fired.
#[derive(Debug, Clone)]
pub enum ClosureObservation {
    /// Negotiated cooperative close confirmed.
    Cooperative(CooperativeCloseObserved),
    /// Our own commitment confirmed.
    LocalUnilateral(UnilateralCloseObserved),
    /// The peer's commitment confirmed.
    RemoteUnilateral(UnilateralCloseObserved),
    /// A revoked commitment confirmed.
    Breach(BreachObserved),
}

impl ClosureObservation {
    /// The close kind this observation records.
    pub fn close_kind(&self) -> CloseKind {
        match self {
            ClosureObservation::Cooperative(_) => CloseKind::Cooperative,
            ClosureObservation::LocalUnilateral(_) => CloseKind::LocalForce,
            ClosureObservation::RemoteUnilateral(_) => CloseKind::RemoteForce,
            ClosureObservation::Breach(_) => CloseKind::Breach,
        }
    }
}

/// Sender half handed to the chain watcher.
#[derive(Debug, Clone)]
pub struct ChainEventPublisher {
    /// Cooperative closure confirmations.
    pub cooperative: mpsc::Sender<CooperativeCloseObserved>,
    /// Local unilateral closure confirmations.
    pub local_unilateral: mpsc::Sender<UnilateralCloseObserved>,
    /// Remote unilateral closure confirmations.
    pub remote_unilateral: mpsc::Sender<UnilateralCloseObserved>,
    /// Breach confirmations.
    pub breach: mpsc::Sender<BreachObserved>,
}

/// Receiver half owned by the arbitrator's decision loop.
#[derive(Debug)]
pub struct ChainEventStream {
    /// Cooperative closure confirmations.
    pub cooperative: mpsc::Receiver<CooperativeCloseObserved>,
    /// Local unilateral closure confirmations.
    pub local_unilateral: mpsc::Receiver<UnilateralCloseObserved>,
    /// Remote unilateral closure confirmations.
    pub remote_unilateral: mpsc::Receiver<UnilateralCloseObserved>,
    /// Breach confirmations.
    pub breach: mpsc::Receiver<BreachObserved>,
}

impl ChainEventStream {
    /// Wait for whichever closure observation fires first. Returns
    /// `None` once every publisher has been dropped without an
    /// observation.
    pub async fn next(&mut self) -> Option<ClosureObservation> {
        tokio::select! {
            Some(coop) = self.cooperative.recv() => {
                Some(ClosureObservation::Cooperative(coop))
            }
            Some(local) = self.local_unilateral.recv() => {
                Some(ClosureObservation::LocalUnilateral(local))
            }
            Some(remote) = self.remote_unilateral.recv() => {
                Some(ClosureObservation::RemoteUnilateral(remote))
            }
            Some(breach) = self.breach.recv() => {
                Some(ClosureObservation::Breach(breach))
            }
            else => None,
        }
    }
}

/// Build a connected publisher/stream pair. The buffers hold a single
/// observation: each channel fires at most once.
pub fn chain_event_channel() -> (ChainEventPublisher, ChainEventStream) {
    let (coop_tx, coop_rx) = mpsc::channel(1);
    let (local_tx, local_rx) = mpsc::channel(1);
    let (remote_tx, remote_rx) = mpsc::channel(1);
    let (breach_tx, breach_rx) = mpsc::channel(1);

    (
        ChainEventPublisher {
            cooperative: coop_tx,
            local_unilateral: local_tx,
            remote_unilateral: remote_tx,
            breach: breach_tx,
        },
        ChainEventStream {
            cooperative: coop_rx,
            local_unilateral: local_rx,
            remote_unilateral: remote_rx,
            breach: breach_rx,
        },
    )
}
