//! # Persisted Records
//!
//! Everything the arbitrator writes beyond the bare state value. The
//! resolution record and chain-action map are decisions captured at the
//! moment of closure; recovery reads them back verbatim instead of
//! re-deriving them from a chain that may have moved on.

use bitcoin::{Amount, Txid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use court_core::{ChannelDescriptor, CloseKind, ContractId};

// ---------------------------------------------------------------------------
// Resolver snapshots
// ---------------------------------------------------------------------------

/// The variant of resolver a snapshot re-materializes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    /// Generic HTLC resolver; refines to timeout or success once the
    /// claim path is known.
    Htlc,
    /// HTLC claimed via the timeout path after its deadline height.
    HtlcTimeout,
    /// HTLC claimed via the success path with a known preimage.
    HtlcSuccess,
    /// Breach output claimed through a justice transaction.
    Breach,
}

impl std::fmt::Display for ResolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResolverKind::Htlc => "htlc",
            ResolverKind::HtlcTimeout => "htlc_timeout",
            ResolverKind::HtlcSuccess => "htlc_success",
            ResolverKind::Breach => "breach",
        };
        f.write_str(name)
    }
}

/// The durable form of one unresolved contract resolver. The payload is
/// opaque to the log — the arbitrator's resolver factory decodes it when
/// re-materializing the resolver on recovery or after a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverSnapshot {
    /// Identity preserved across refinement swaps.
    pub contract_id: ContractId,
    /// Which resolver variant to materialize.
    pub kind: ResolverKind,
    /// Variant-specific resolution data.
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Resolution seeds
// ---------------------------------------------------------------------------

/// Per-HTLC artifacts captured from a close observation or from the
/// force-close producer; everything an HTLC resolver needs to drive its
/// output to settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcResolutionSeed {
    /// Identity of the contract this seed resolves.
    pub contract_id: ContractId,
    /// Index of the HTLC output on the commitment transaction.
    pub output_index: u32,
    /// Value locked in the output.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
    /// Whether the payment preimage is already known, selecting the
    /// success claim path over the timeout path.
    pub preimage_known: bool,
    /// Absolute height after which the timeout path becomes claimable.
    pub deadline_height: u32,
}

impl HtlcResolutionSeed {
    /// Snapshot this seed as a generic HTLC resolver.
    pub fn snapshot(&self) -> ResolverSnapshot {
        ResolverSnapshot {
            contract_id: self.contract_id,
            kind: ResolverKind::Htlc,
            payload: serde_json::to_value(self).expect("seed serializes"),
        }
    }
}

/// Artifacts for claiming every output of a revoked commitment via a
/// justice transaction. Construction of the justice transaction itself
/// happens outside the arbitrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachResolutionSeed {
    /// Identity of the breach contract.
    pub contract_id: ContractId,
    /// The revoked commitment that was broadcast.
    pub breach_txid: Txid,
    /// Total value claimable through the justice path.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub claimable: Amount,
}

impl BreachResolutionSeed {
    /// Snapshot this seed as a breach resolver.
    pub fn snapshot(&self) -> ResolverSnapshot {
        ResolverSnapshot {
            contract_id: self.contract_id,
            kind: ResolverKind::Breach,
            payload: serde_json::to_value(self).expect("seed serializes"),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract resolutions
// ---------------------------------------------------------------------------

/// The immutable record of how the channel actually closed on-chain.
/// Written exactly once when the closure is observed; read on crash
/// recovery so the decision is never re-derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractResolutions {
    /// Identity of the closed channel.
    pub descriptor: ChannelDescriptor,
    /// How the closing transaction reached the chain.
    pub close_kind: CloseKind,
    /// The confirmed closing transaction.
    pub commitment_txid: Txid,
    /// Balance settled directly by the closing transaction. Kept here so
    /// recovery can replay the mark-channel-closed callback without the
    /// original observation.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub settled_balance: Amount,
    /// Seeds for every HTLC output needing active resolution.
    pub htlc_seeds: Vec<HtlcResolutionSeed>,
    /// Present only for a breach closure.
    pub breach_seed: Option<BreachResolutionSeed>,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

impl ContractResolutions {
    /// Initial resolver snapshots implied by this record.
    pub fn resolver_snapshots(&self) -> Vec<ResolverSnapshot> {
        let mut snapshots: Vec<ResolverSnapshot> =
            self.htlc_seeds.iter().map(HtlcResolutionSeed::snapshot).collect();
        if let Some(breach) = &self.breach_seed {
            snapshots.push(breach.snapshot());
        }
        snapshots
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
