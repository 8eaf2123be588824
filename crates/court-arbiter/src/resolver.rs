//! # Contract Resolvers
//!
//! One resolver per value-bearing output left behind by a closed
//! channel. The arbitrator sees only the uniform surface here: an
//! identity, a durable snapshot, and an `advance` call that either
//! settles the contract or replaces the resolver with a more specific
//! variant as chain information refines. The actual claim construction
//! (sweeps, justice transactions) happens behind the hooks and is out of
//! scope for this crate.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use court_core::ContractId;
use court_log::{BreachResolutionSeed, HtlcResolutionSeed, ResolverKind, ResolverSnapshot};

use crate::error::ArbiterError;

/// A resolver's report after one unit of progress.
pub enum Resolution {
    /// The contract reached final settlement; remove it from the
    /// unresolved set.
    Settled,
    /// Chain information refined what this output requires; the
    /// replacement keeps the same contract identity.
    Replaced(Box<dyn ContractResolver>),
}

/// Failure inside a resolver. The contract stays unresolved, which
/// blocks the channel from ever reporting full resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resolver failure: {0}")]
pub struct ResolverFailure(pub String);

/// The uniform surface the arbitrator supervises.
#[async_trait]
pub trait ContractResolver: Send {
    /// Identity, preserved across refinement swaps.
    fn contract_id(&self) -> ContractId;

    /// The variant this resolver materializes from.
    fn kind(&self) -> ResolverKind;

    /// Durable form for the arbitrator log.
    fn snapshot(&self) -> ResolverSnapshot;

    /// Drive the contract forward. Blocks on the height feed when the
    /// claim is time-gated; resolves exactly once per call with either
    /// settlement or a refinement.
    async fn advance(
        &mut self,
        heights: &mut watch::Receiver<u32>,
    ) -> Result<Resolution, ResolverFailure>;
}

/// Re-materializes persisted snapshots into live resolvers, on recovery
/// and after refinement swaps.
pub type ResolverFactory =
    Arc<dyn Fn(&ResolverSnapshot) -> Result<Box<dyn ContractResolver>, ArbiterError> + Send + Sync>;

/// The factory for the built-in resolver set.
pub fn default_resolver_factory() -> ResolverFactory {
    Arc::new(materialize_resolver)
}

/// Decode a snapshot into the matching built-in resolver.
pub fn materialize_resolver(
    snapshot: &ResolverSnapshot,
) -> Result<Box<dyn ContractResolver>, ArbiterError> {
    match snapshot.kind {
        ResolverKind::Htlc => Ok(Box::new(HtlcResolver {
            seed: decode(snapshot)?,
        })),
        ResolverKind::HtlcTimeout => Ok(Box::new(HtlcTimeoutResolver {
            seed: decode(snapshot)?,
        })),
        ResolverKind::HtlcSuccess => Ok(Box::new(HtlcSuccessResolver {
            seed: decode(snapshot)?,
        })),
        ResolverKind::Breach => Ok(Box::new(BreachResolver {
            seed: decode(snapshot)?,
        })),
    }
}

fn decode<T: serde::de::DeserializeOwned>(snapshot: &ResolverSnapshot) -> Result<T, ArbiterError> {
    serde_json::from_value(snapshot.payload.clone()).map_err(|err| {
        ArbiterError::MalformedSnapshot {
            contract_id: snapshot.contract_id,
            reason: err.to_string(),
        }
    })
}

fn htlc_snapshot(seed: &HtlcResolutionSeed, kind: ResolverKind) -> ResolverSnapshot {
    ResolverSnapshot {
        contract_id: seed.contract_id,
        kind,
        payload: serde_json::to_value(seed).expect("seed serializes"),
    }
}

// ---------------------------------------------------------------------------
// Built-in resolvers
// ---------------------------------------------------------------------------

/// Generic HTLC resolver: refines itself into the timeout or success
/// variant once the claim path is known from the seed.
pub struct HtlcResolver {
    seed: HtlcResolutionSeed,
}

impl HtlcResolver {
    /// Resolver for a fresh HTLC seed.
    pub fn new(seed: HtlcResolutionSeed) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl ContractResolver for HtlcResolver {
    fn contract_id(&self) -> ContractId {
        self.seed.contract_id
    }

    fn kind(&self) -> ResolverKind {
        ResolverKind::Htlc
    }

    fn snapshot(&self) -> ResolverSnapshot {
        htlc_snapshot(&self.seed, ResolverKind::Htlc)
    }

    async fn advance(
        &mut self,
        _heights: &mut watch::Receiver<u32>,
    ) -> Result<Resolution, ResolverFailure> {
        let seed = self.seed.clone();
        if seed.preimage_known {
            Ok(Resolution::Replaced(Box::new(HtlcSuccessResolver { seed })))
        } else {
            Ok(Resolution::Replaced(Box::new(HtlcTimeoutResolver { seed })))
        }
    }
}

/// Claims an HTLC through the timeout path once the deadline height is
/// reached.
pub struct HtlcTimeoutResolver {
    seed: HtlcResolutionSeed,
}

impl HtlcTimeoutResolver {
    /// Resolver for the timeout claim path.
    pub fn new(seed: HtlcResolutionSeed) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl ContractResolver for HtlcTimeoutResolver {
    fn contract_id(&self) -> ContractId {
        self.seed.contract_id
    }

    fn kind(&self) -> ResolverKind {
        ResolverKind::HtlcTimeout
    }

    fn snapshot(&self) -> ResolverSnapshot {
        htlc_snapshot(&self.seed, ResolverKind::HtlcTimeout)
    }

    async fn advance(
        &mut self,
        heights: &mut watch::Receiver<u32>,
    ) -> Result<Resolution, ResolverFailure> {
        let deadline = self.seed.deadline_height;
        heights
            .wait_for(|height| *height >= deadline)
            .await
            .map_err(|_| ResolverFailure("height feed closed".to_string()))?;
        Ok(Resolution::Settled)
    }
}

/// Claims an HTLC through the success path; the preimage is already
/// known, so the claim is immediate.
pub struct HtlcSuccessResolver {
    seed: HtlcResolutionSeed,
}

impl HtlcSuccessResolver {
    /// Resolver for the success claim path.
    pub fn new(seed: HtlcResolutionSeed) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl ContractResolver for HtlcSuccessResolver {
    fn contract_id(&self) -> ContractId {
        self.seed.contract_id
    }

    fn kind(&self) -> ResolverKind {
        ResolverKind::HtlcSuccess
    }

    fn snapshot(&self) -> ResolverSnapshot {
        htlc_snapshot(&self.seed, ResolverKind::HtlcSuccess)
    }

    async fn advance(
        &mut self,
        _heights: &mut watch::Receiver<u32>,
    ) -> Result<Resolution, ResolverFailure> {
        Ok(Resolution::Settled)
    }
}

/// Claims every output of a revoked commitment via the justice path.
pub struct BreachResolver {
    seed: BreachResolutionSeed,
}

impl BreachResolver {
    /// Resolver for a breach claim.
    pub fn new(seed: BreachResolutionSeed) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl ContractResolver for BreachResolver {
    fn contract_id(&self) -> ContractId {
        self.seed.contract_id
    }

    fn kind(&self) -> ResolverKind {
        ResolverKind::Breach
    }

    fn snapshot(&self) -> ResolverSnapshot {
        self.seed.snapshot()
    }

    async fn advance(
        &mut self,
        _heights: &mut watch::Receiver<u32>,
    ) -> Result<Resolution, ResolverFailure> {
        Ok(Resolution::Settled)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
