//! # Close Summaries
//!
//! How a channel actually left the chain. The close kind is recorded in
//! the durable resolution record and reported to the embedding channel
//! manager through the mark-channel-closed callback; it does not affect
//! lifecycle transitions past `ContractClosed`.

use bitcoin::{Amount, Txid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::ChannelDescriptor;

/// The way a channel's closing transaction reached the chain. Exactly
/// one of these is observed per channel lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    /// A mutually signed closing transaction negotiated off-chain.
    Cooperative,
    /// Our own commitment transaction confirmed.
    LocalForce,
    /// The remote party's commitment transaction confirmed.
    RemoteForce,
    /// The remote party broadcast a revoked commitment.
    Breach,
}

impl std::fmt::Display for CloseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CloseKind::Cooperative => "cooperative",
            CloseKind::LocalForce => "local_force",
            CloseKind::RemoteForce => "remote_force",
            CloseKind::Breach => "breach",
        };
        f.write_str(name)
    }
}

/// Summary of a confirmed channel closure, handed to the embedding
/// channel manager when the arbitrator marks the channel closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCloseSummary {
    /// Identity of the channel that closed.
    pub descriptor: ChannelDescriptor,
    /// How the closing transaction reached the chain.
    pub close_kind: CloseKind,
    /// The transaction that spent the funding output.
    pub closing_txid: Txid,
    /// Our balance settled directly by the closing transaction,
    /// excluding outputs still under contract resolution.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub settled_balance: Amount,
    /// When the arbitrator observed the closure.
    pub closed_at: DateTime<Utc>,
}
