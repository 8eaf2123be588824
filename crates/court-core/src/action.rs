//! # Chain-Action Decisions
//!
//! Once the closing transaction's type is known, every remaining output
//! gets a decided treatment. The decision is *recorded*, not live: it is
//! persisted on entering `ContractClosed` and reloaded verbatim on crash
//! recovery. Recomputing it against a chain that has since moved could
//! yield a different — and unsafe — answer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::ContractId;

/// The decided treatment for a contract output.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChainAction {
    /// Claim the output as soon as possible (e.g. the preimage is known,
    /// or a breach output is claimable immediately).
    ClaimNow,
    /// Wait for a height or event before the output can be claimed.
    Wait,
    /// Nothing to do for this output. The built-in decision never emits
    /// this — closure observations only seed outputs that need work —
    /// but the recorded vocabulary keeps it so a map can state that an
    /// output was examined and dismissed.
    NoAction,
}

impl std::fmt::Display for ChainAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChainAction::ClaimNow => "claim_now",
            ChainAction::Wait => "wait",
            ChainAction::NoAction => "no_action",
        };
        f.write_str(name)
    }
}

/// The recorded decision: action kind to the contracts requiring it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainActionMap(pub BTreeMap<ChainAction, Vec<ContractId>>);

impl ChainActionMap {
    /// An empty decision (a closure with no outstanding contracts).
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `contract` under `action`.
    pub fn record(&mut self, action: ChainAction, contract: ContractId) {
        self.0.entry(action).or_default().push(contract);
    }

    /// The contracts recorded under `action`.
    pub fn contracts_for(&self, action: ChainAction) -> &[ContractId] {
        self.0.get(&action).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of recorded contracts across all actions.
    pub fn contract_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Whether no contract requires any action.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }
}
