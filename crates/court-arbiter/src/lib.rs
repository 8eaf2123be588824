//! # court-arbiter — The Channel Arbitrator
//!
//! One sequential decision loop per channel. The loop multiplexes local
//! force-close requests, the four chain closure observations, resolver
//! completion reports, block-height ticks, and shutdown into a single
//! wait point; every accepted transition is made durable through the
//! [`court_log::ArbitratorLog`] before any externally visible effect.
//!
//! - **Arbitrator** ([`arbitrator`]): The state machine, its
//!   configuration, and the caller-facing handle.
//!
//! - **Hooks** ([`hooks`]): The external collaborator seam — transaction
//!   broadcast, the force-close producer, and the three lifecycle
//!   marker callbacks.
//!
//! - **Events** ([`events`]): The chain closure subscription: four typed
//!   channels, of which at most one fires per channel lifetime.
//!
//! - **Resolver** ([`resolver`]): The polymorphic contract-resolver
//!   surface the arbitrator supervises, and the built-in HTLC and
//!   breach resolvers.

pub mod arbitrator;
pub mod error;
pub mod events;
pub mod hooks;
pub mod resolver;

// Re-export primary types for ergonomic imports.

pub use arbitrator::{decide_chain_actions, ArbitratorHandle, ChannelArbitrator, ChannelArbitratorConfig};
pub use error::ArbiterError;
pub use events::{
    chain_event_channel, BreachObserved, ChainEventPublisher, ChainEventStream,
    ClosureObservation, CooperativeCloseObserved, UnilateralCloseObserved,
};
pub use hooks::{BroadcastError, ChannelHooks, HookError, LocalForceCloseSummary};
pub use resolver::{
    default_resolver_factory, materialize_resolver, BreachResolver, ContractResolver,
    HtlcResolver, HtlcSuccessResolver, HtlcTimeoutResolver, Resolution, ResolverFactory,
    ResolverFailure,
};
