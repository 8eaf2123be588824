//! # In-Memory Log
//!
//! Reference implementation of [`ArbitratorLog`] backed by a
//! `parking_lot::Mutex`. Used by the test suites and by embedders that
//! handle durability at a different layer. Honors the full contract:
//! monotonic state commits, write-once resolutions, atomic swaps.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use court_core::{validate_transition, ArbitratorState, ChainActionMap, ContractId};

use crate::log::{ArbitratorLog, LogError};
use crate::records::{ContractResolutions, ResolverSnapshot};

#[derive(Debug, Default)]
struct MemoryLogInner {
    state: ArbitratorState,
    unresolved: BTreeMap<ContractId, ResolverSnapshot>,
    resolutions: Option<ContractResolutions>,
    chain_actions: Option<ChainActionMap>,
}

/// In-process [`ArbitratorLog`].
#[derive(Debug, Default)]
pub struct MemoryLog {
    inner: Mutex<MemoryLogInner>,
}

impl MemoryLog {
    /// An empty log for a channel with no arbitration history.
    pub fn new() -> Self {
        Self::default()
    }

    /// A log hydrated to a given state, as left behind by a previous
    /// process lifetime. Test and recovery tooling.
    pub fn hydrated(
        state: ArbitratorState,
        unresolved: Vec<ResolverSnapshot>,
        resolutions: Option<ContractResolutions>,
        chain_actions: Option<ChainActionMap>,
    ) -> Self {
        let unresolved = unresolved
            .into_iter()
            .map(|snapshot| (snapshot.contract_id, snapshot))
            .collect();
        Self {
            inner: Mutex::new(MemoryLogInner {
                state,
                unresolved,
                resolutions,
                chain_actions,
            }),
        }
    }
}

#[async_trait]
impl ArbitratorLog for MemoryLog {
    async fn current_state(&self) -> Result<ArbitratorState, LogError> {
        Ok(self.inner.lock().state)
    }

    async fn commit_state(&self, state: ArbitratorState) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        validate_transition(inner.state, state).map_err(|_| LogError::StateRegression {
            from: inner.state,
            to: state,
        })?;
        inner.state = state;
        Ok(())
    }

    async fn fetch_unresolved_contracts(&self) -> Result<Vec<ResolverSnapshot>, LogError> {
        Ok(self.inner.lock().unresolved.values().cloned().collect())
    }

    async fn insert_unresolved_contracts(
        &self,
        snapshots: &[ResolverSnapshot],
    ) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        for snapshot in snapshots {
            inner
                .unresolved
                .insert(snapshot.contract_id, snapshot.clone());
        }
        Ok(())
    }

    async fn swap_contract(
        &self,
        old: ContractId,
        new: ResolverSnapshot,
    ) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        if inner.unresolved.remove(&old).is_none() {
            return Err(LogError::UnknownContract(old));
        }
        inner.unresolved.insert(new.contract_id, new);
        Ok(())
    }

    async fn resolve_contract(&self, id: ContractId) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        if inner.unresolved.remove(&id).is_none() {
            return Err(LogError::UnknownContract(id));
        }
        Ok(())
    }

    async fn log_contract_resolutions(
        &self,
        resolutions: &ContractResolutions,
    ) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        if inner.resolutions.is_some() {
            return Err(LogError::ResolutionsExist);
        }
        inner.resolutions = Some(resolutions.clone());
        Ok(())
    }

    async fn fetch_contract_resolutions(
        &self,
    ) -> Result<Option<ContractResolutions>, LogError> {
        Ok(self.inner.lock().resolutions.clone())
    }

    async fn log_chain_actions(&self, actions: &ChainActionMap) -> Result<(), LogError> {
        self.inner.lock().chain_actions = Some(actions.clone());
        Ok(())
    }

    async fn fetch_chain_actions(&self) -> Result<Option<ChainActionMap>, LogError> {
        Ok(self.inner.lock().chain_actions.clone())
    }

    async fn wipe_history(&self) -> Result<(), LogError> {
        let mut inner = self.inner.lock();
        *inner = MemoryLogInner::default();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
