//! # The Arbitrator Log Contract
//!
//! Pure storage: no decision logic lives here. The arbitrator persists
//! every transition through this trait *before* performing the
//! transition's externally visible effects, so a write failure must
//! surface — the machine halts the transition rather than advancing
//! with durability silently lost.

use async_trait::async_trait;
use thiserror::Error;

use court_core::{ArbitratorState, ChainActionMap, ContractId};

use crate::records::{ContractResolutions, ResolverSnapshot};

/// Failures of the durable log. All are fatal to the in-progress
/// transition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// The committed lifecycle only moves forward.
    #[error("state regression: {from} -> {to}")]
    StateRegression {
        from: ArbitratorState,
        to: ArbitratorState,
    },

    /// An operation referenced a contract not in the unresolved set.
    #[error("unknown contract: {0}")]
    UnknownContract(ContractId),

    /// The closure-outcome record is write-once.
    #[error("contract resolutions already recorded")]
    ResolutionsExist,

    /// Underlying storage failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Durable record of a single channel's arbitration. Implementations
/// must make every write durable before returning, and every operation
/// safe to call repeatedly: crash replays re-apply transitions.
#[async_trait]
pub trait ArbitratorLog: Send + Sync {
    /// The currently committed lifecycle state.
    async fn current_state(&self) -> Result<ArbitratorState, LogError>;

    /// Durably commit a lifecycle state. Committing the state already
    /// held is a no-op; committing backward is [`LogError::StateRegression`].
    async fn commit_state(&self, state: ArbitratorState) -> Result<(), LogError>;

    /// The snapshots of every contract still awaiting resolution.
    async fn fetch_unresolved_contracts(&self) -> Result<Vec<ResolverSnapshot>, LogError>;

    /// Add contracts to the unresolved set.
    async fn insert_unresolved_contracts(
        &self,
        snapshots: &[ResolverSnapshot],
    ) -> Result<(), LogError>;

    /// Atomically replace one unresolved contract with a refined
    /// variant, preserving its membership in the set.
    async fn swap_contract(
        &self,
        old: ContractId,
        new: ResolverSnapshot,
    ) -> Result<(), LogError>;

    /// Permanently remove a contract from the unresolved set.
    async fn resolve_contract(&self, id: ContractId) -> Result<(), LogError>;

    /// Write the immutable closure-outcome record. At most one write
    /// per channel lifetime; a second is [`LogError::ResolutionsExist`].
    async fn log_contract_resolutions(
        &self,
        resolutions: &ContractResolutions,
    ) -> Result<(), LogError>;

    /// Read the closure-outcome record, if one was written.
    async fn fetch_contract_resolutions(&self)
        -> Result<Option<ContractResolutions>, LogError>;

    /// Write the chain-action decision snapshot.
    async fn log_chain_actions(&self, actions: &ChainActionMap) -> Result<(), LogError>;

    /// Read the chain-action decision snapshot, if one was written.
    async fn fetch_chain_actions(&self) -> Result<Option<ChainActionMap>, LogError>;

    /// Erase every record held for the channel. Reset tooling only.
    async fn wipe_history(&self) -> Result<(), LogError>;
}
