//! # Arbitrator Errors
//!
//! The only error a caller ever observes directly travels back through a
//! force-close request's completion handle. Everything else is internal:
//! persistence and event-driven hook failures halt the channel's forward
//! progress rather than being papered over.

use thiserror::Error;

use court_core::{ArbitratorState, ContractId};
use court_log::LogError;

use crate::hooks::{BroadcastError, HookError};

/// Failures raised by the channel arbitrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbiterError {
    /// Durable log write or read failed; the in-progress transition was
    /// aborted before its side effects.
    #[error("arbitrator log: {0}")]
    Log(#[from] LogError),

    /// An external callback failed.
    #[error("hook: {0}")]
    Hook(#[from] HookError),

    /// The commitment broadcast failed with a hard error (the
    /// already-spent race is not reported through this variant).
    #[error("broadcast: {0}")]
    Broadcast(#[from] BroadcastError),

    /// A force-close request arrived while the machine was past
    /// `Default`; at most one is serviced per channel lifetime.
    #[error("force close refused in state {0}")]
    InvalidState(ArbitratorState),

    /// A persisted resolver snapshot could not be materialized.
    #[error("malformed resolver snapshot {contract_id}: {reason}")]
    MalformedSnapshot {
        contract_id: ContractId,
        reason: String,
    },

    /// The arbitrator is shutting down; the blocked operation was
    /// abandoned.
    #[error("arbitrator shutting down")]
    ShuttingDown,
}
