//! # Channel Arbitrator
//!
//! The per-channel state machine. A single spawned task owns `state`
//! and consumes every input — force-close requests, chain closure
//! observations, resolver reports, height ticks, shutdown — through one
//! `tokio::select!` wait point, so no transition ever races another.
//!
//! Transition discipline: compute the target state, make it durable
//! through the [`ArbitratorLog`], and only then perform the externally
//! visible effects. After a crash the log never understates progress
//! relative to external reality; at worst it understates the newest
//! attempted-but-unpersisted action, which recovery simply retries.
//!
//! The one deliberate inversion is the terminal transition: the
//! mark-resolved callback must succeed *before* `FullyResolved` is
//! committed, so a durable terminal state always corresponds to a
//! successfully delivered resolution signal. A crash between the two
//! retries an idempotent marker on recovery.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::Transaction;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use court_core::{
    ArbitratorState, ChainAction, ChainActionMap, ChannelCloseSummary, ChannelDescriptor,
    ContractId,
};
use court_log::{
    ArbitratorLog, BreachResolutionSeed, ContractResolutions, HtlcResolutionSeed,
};

use crate::error::ArbiterError;
use crate::events::{ChainEventStream, ClosureObservation};
use crate::hooks::{BroadcastError, ChannelHooks};
use crate::resolver::{
    default_resolver_factory, ContractResolver, Resolution, ResolverFactory, ResolverFailure,
};

// ---------------------------------------------------------------------------
// Configuration and handle
// ---------------------------------------------------------------------------

/// Everything the arbitrator needs to do its job for one channel.
pub struct ChannelArbitratorConfig {
    /// Immutable identity of the arbitrated channel.
    pub descriptor: ChannelDescriptor,
    /// External collaborator surface.
    pub hooks: Arc<dyn ChannelHooks>,
    /// Durable record of this channel's arbitration.
    pub log: Arc<dyn ArbitratorLog>,
    /// Re-materializes persisted resolver snapshots.
    pub resolver_factory: ResolverFactory,
}

impl ChannelArbitratorConfig {
    /// Configuration with the built-in resolver set.
    pub fn new(
        descriptor: ChannelDescriptor,
        hooks: Arc<dyn ChannelHooks>,
        log: Arc<dyn ArbitratorLog>,
    ) -> Self {
        Self {
            descriptor,
            hooks,
            log,
            resolver_factory: default_resolver_factory(),
        }
    }

    /// Override the resolver factory.
    pub fn with_resolver_factory(mut self, factory: ResolverFactory) -> Self {
        self.resolver_factory = factory;
        self
    }
}

impl std::fmt::Debug for ChannelArbitratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelArbitratorConfig")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// A local force-close request: one-shot, fulfilled exactly once after
/// the broadcast attempt resolves.
#[derive(Debug)]
pub(crate) struct ForceCloseRequest {
    pub(crate) respond_to: oneshot::Sender<Result<Transaction, ArbiterError>>,
}

/// Caller-facing surface of a running arbitrator.
#[derive(Debug, Clone)]
pub struct ArbitratorHandle {
    descriptor: ChannelDescriptor,
    requests_tx: mpsc::Sender<ForceCloseRequest>,
    state_rx: watch::Receiver<ArbitratorState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ArbitratorHandle {
    /// Identity of the arbitrated channel.
    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    /// Ask the arbitrator to unilaterally close the channel now.
    /// Resolves with the closing transaction once the broadcast attempt
    /// completes; losing the broadcast race to the peer's commitment is
    /// still a success — the caller's intent is satisfied either way.
    pub async fn force_close(&self) -> Result<Transaction, ArbiterError> {
        let (respond_to, response) = oneshot::channel();
        self.requests_tx
            .send(ForceCloseRequest { respond_to })
            .await
            .map_err(|_| ArbiterError::ShuttingDown)?;
        response.await.map_err(|_| ArbiterError::ShuttingDown)?
    }

    /// The state the decision loop has most recently committed.
    pub fn state(&self) -> ArbitratorState {
        *self.state_rx.borrow()
    }

    /// Observe committed state changes.
    pub fn state_updates(&self) -> watch::Receiver<ArbitratorState> {
        self.state_rx.clone()
    }

    /// Signal the decision loop and every supervised resolver to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// The arbitrator
// ---------------------------------------------------------------------------

/// Report from a supervised resolver task back to the decision loop.
enum ResolverMsg {
    /// The contract reached final settlement.
    Settled(ContractId),
    /// The resolver refined itself into a more specific variant.
    Swap {
        old: ContractId,
        replacement: Box<dyn ContractResolver>,
    },
    /// The resolver failed; the contract stays unresolved.
    Failed(ContractId, ResolverFailure),
}

/// The per-channel state machine. Construct with [`ChannelArbitrator::new`],
/// then [`start`](ChannelArbitrator::start) it with the channel's chain
/// event subscription and a block-height feed.
pub struct ChannelArbitrator {
    cfg: ChannelArbitratorConfig,
    state: ArbitratorState,
    state_tx: watch::Sender<ArbitratorState>,
    shutdown_rx: watch::Receiver<bool>,
    requests_rx: mpsc::Receiver<ForceCloseRequest>,
    resolver_tx: mpsc::UnboundedSender<ResolverMsg>,
    resolver_rx: mpsc::UnboundedReceiver<ResolverMsg>,
    height_tx: watch::Sender<u32>,
    /// Contracts currently under supervision. An entry whose task has
    /// failed stays in the map: an unresolved contract blocks the
    /// terminal transition.
    resolvers: HashMap<ContractId, JoinHandle<()>>,
    /// HTLC artifacts from our own force-close package, used if it is
    /// our commitment that confirms and the observation carries none.
    local_htlc_seeds: Vec<HtlcResolutionSeed>,
}

impl ChannelArbitrator {
    /// Build an arbitrator and its caller-facing handle.
    pub fn new(cfg: ChannelArbitratorConfig) -> (Self, ArbitratorHandle) {
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(ArbitratorState::Default);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (resolver_tx, resolver_rx) = mpsc::unbounded_channel();
        let (height_tx, _) = watch::channel(0u32);

        let handle = ArbitratorHandle {
            descriptor: cfg.descriptor,
            requests_tx,
            state_rx,
            shutdown_tx: Arc::new(shutdown_tx),
        };

        let arbitrator = Self {
            cfg,
            state: ArbitratorState::Default,
            state_tx,
            shutdown_rx,
            requests_rx,
            resolver_tx,
            resolver_rx,
            height_tx,
            resolvers: HashMap::new(),
            local_htlc_seeds: Vec::new(),
        };

        (arbitrator, handle)
    }

    /// Spawn the decision loop. `events` is this channel's closure
    /// subscription; `heights` delivers block-height ticks from the
    /// chain watcher.
    pub fn start(
        self,
        events: ChainEventStream,
        heights: watch::Receiver<u32>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(events, heights))
    }

    async fn run(mut self, mut events: ChainEventStream, mut heights: watch::Receiver<u32>) {
        let descriptor = self.cfg.descriptor;
        // The loop-level shutdown watch is a local clone: its select arm
        // must not hold a borrow of `self` into the other arm bodies.
        let mut shutdown = self.shutdown_rx.clone();

        if let Err(err) = self.recover().await {
            error!(channel = %descriptor, %err, "recovery failed; arbitrator halted");
            self.abort_resolvers();
            return;
        }
        info!(channel = %descriptor, state = %self.state, "arbitrator started");

        while !self.state.is_terminal() && !*shutdown.borrow_and_update() {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        debug!(channel = %descriptor, "shutdown observed");
                        break;
                    }
                }

                // Chain observations win the race against local intent.
                Some(observation) = events.next(), if self.state.accepts_closure() => {
                    if let Err(err) = self.handle_closure(observation).await {
                        error!(channel = %descriptor, %err, "closure handling halted");
                        break;
                    }
                }

                Some(msg) = self.resolver_rx.recv() => {
                    if let Err(err) = self.handle_resolver_msg(msg).await {
                        error!(channel = %descriptor, %err, "resolver supervision halted");
                        break;
                    }
                }

                Some(request) = self.requests_rx.recv() => {
                    if let Err(err) = self.handle_force_close(request).await {
                        error!(channel = %descriptor, %err, "force close halted");
                        break;
                    }
                }

                Ok(()) = heights.changed() => {
                    let height = *heights.borrow_and_update();
                    trace!(channel = %descriptor, height, "height tick");
                    self.height_tx.send_replace(height);
                }
            }
        }

        self.abort_resolvers();
        debug!(channel = %descriptor, state = %self.state, "arbitrator loop exited");
    }

    /// Load persisted progress and resume it without re-deriving any
    /// decision from current chain state.
    async fn recover(&mut self) -> Result<(), ArbiterError> {
        let persisted = self.cfg.log.current_state().await?;
        self.state = persisted;
        self.state_tx.send_replace(persisted);

        match persisted {
            ArbitratorState::Default | ArbitratorState::FullyResolved => Ok(()),

            // A commit of intent without a durable broadcast outcome:
            // retry the broadcast leg. There is no request handle to
            // answer; a hard publish failure just leaves us waiting for
            // the chain closure that some commitment will produce.
            ArbitratorState::BroadcastCommit => match self.broadcast_commitment().await {
                Ok(_) => Ok(()),
                Err(ArbiterError::Broadcast(err)) => {
                    warn!(
                        channel = %self.cfg.descriptor, %err,
                        "broadcast retry failed; awaiting chain closure",
                    );
                    Ok(())
                }
                Err(err) => Err(err),
            },

            // The commit may have become durable with the marker callback
            // still undelivered; the marker is idempotent, so replay it
            // before resuming.
            ArbitratorState::CommitmentBroadcasted => {
                tokio::select! {
                    biased;
                    Ok(_) = self.shutdown_rx.wait_for(|stop| *stop) => {
                        return Err(ArbiterError::ShuttingDown);
                    }
                    marked = self.cfg.hooks.mark_commitment_broadcasted() => marked?,
                };
                Ok(())
            }

            ArbitratorState::ContractClosed => {
                let resolutions = self.cfg.log.fetch_contract_resolutions().await?;
                let actions = self.cfg.log.fetch_chain_actions().await?;
                if let Some(resolutions) = &resolutions {
                    debug!(
                        channel = %self.cfg.descriptor,
                        close_kind = %resolutions.close_kind,
                        decided_contracts = actions.as_ref().map_or(0, ChainActionMap::contract_count),
                        "resuming contract supervision",
                    );
                    // Same crash window as above: the closed marker may
                    // never have been delivered. Rebuild the summary from
                    // the durable record and replay it.
                    let summary = ChannelCloseSummary {
                        descriptor: resolutions.descriptor,
                        close_kind: resolutions.close_kind,
                        closing_txid: resolutions.commitment_txid,
                        settled_balance: resolutions.settled_balance,
                        closed_at: resolutions.recorded_at,
                    };
                    tokio::select! {
                        biased;
                        Ok(_) = self.shutdown_rx.wait_for(|stop| *stop) => {
                            return Err(ArbiterError::ShuttingDown);
                        }
                        marked = self.cfg.hooks.mark_channel_closed(&summary) => marked?,
                    };
                } else {
                    warn!(
                        channel = %self.cfg.descriptor,
                        "contract closed without recorded resolutions",
                    );
                }

                let snapshots = self.cfg.log.fetch_unresolved_contracts().await?;
                for snapshot in &snapshots {
                    let resolver = (self.cfg.resolver_factory)(snapshot)?;
                    self.spawn_resolver(resolver);
                }
                if self.resolvers.is_empty() {
                    self.finalize().await?;
                }
                Ok(())
            }
        }
    }

    /// `Default` + force-close request → `BroadcastCommit` →
    /// `CommitmentBroadcasted`. The request handle is signalled exactly
    /// once, after the broadcast attempt resolves.
    async fn handle_force_close(&mut self, request: ForceCloseRequest) -> Result<(), ArbiterError> {
        if self.state != ArbitratorState::Default {
            warn!(
                channel = %self.cfg.descriptor, state = %self.state,
                "force close refused",
            );
            let _ = request
                .respond_to
                .send(Err(ArbiterError::InvalidState(self.state)));
            return Ok(());
        }

        info!(channel = %self.cfg.descriptor, "force close requested");
        if let Err(err) = self.commit_state(ArbitratorState::BroadcastCommit).await {
            let _ = request.respond_to.send(Err(err.clone()));
            return Err(err);
        }

        match self.broadcast_commitment().await {
            Ok(close_tx) => {
                let _ = request.respond_to.send(Ok(close_tx));
                Ok(())
            }
            // A hard publish failure or a failing marker callback is the
            // caller's to see; the machine stays put and a chain closure
            // can still drive resolution.
            Err(err @ (ArbiterError::Broadcast(_) | ArbiterError::Hook(_))) => {
                warn!(channel = %self.cfg.descriptor, %err, "force close attempt failed");
                let _ = request.respond_to.send(Err(err));
                Ok(())
            }
            Err(err) => {
                let _ = request.respond_to.send(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// The broadcast leg shared by request handling and recovery:
    /// produce the close package, publish it, and commit
    /// `CommitmentBroadcasted` on success or on the expected
    /// already-spent race.
    async fn broadcast_commitment(&mut self) -> Result<Transaction, ArbiterError> {
        let summary = tokio::select! {
            biased;
            Ok(_) = self.shutdown_rx.wait_for(|stop| *stop) => {
                return Err(ArbiterError::ShuttingDown);
            }
            produced = self.cfg.hooks.build_force_close() => produced?,
        };
        self.local_htlc_seeds = summary.htlc_seeds;
        let close_tx = summary.close_tx;

        let outcome = tokio::select! {
            biased;
            Ok(_) = self.shutdown_rx.wait_for(|stop| *stop) => {
                return Err(ArbiterError::ShuttingDown);
            }
            outcome = self.cfg.hooks.broadcast(&close_tx) => outcome,
        };
        match outcome {
            Ok(()) => {
                debug!(channel = %self.cfg.descriptor, "commitment published");
            }
            Err(BroadcastError::AlreadySpent) => {
                // The peer's commitment reached the network first; some
                // valid commitment will confirm and close the channel.
                info!(
                    channel = %self.cfg.descriptor,
                    "lost broadcast race to a conflicting commitment",
                );
            }
            Err(err) => return Err(ArbiterError::Broadcast(err)),
        }

        self.commit_state(ArbitratorState::CommitmentBroadcasted)
            .await?;

        tokio::select! {
            biased;
            Ok(_) = self.shutdown_rx.wait_for(|stop| *stop) => {
                return Err(ArbiterError::ShuttingDown);
            }
            marked = self.cfg.hooks.mark_commitment_broadcasted() => marked?,
        };

        Ok(close_tx)
    }

    /// Any chain closure observation → `ContractClosed`, then resolver
    /// supervision (and straight on to `FullyResolved` when the closure
    /// left nothing to resolve).
    async fn handle_closure(
        &mut self,
        observation: ClosureObservation,
    ) -> Result<(), ArbiterError> {
        let close_kind = observation.close_kind();
        info!(
            channel = %self.cfg.descriptor, kind = %close_kind,
            "chain closure observed",
        );

        let (closing_txid, settled_balance, htlc_seeds, breach_seed) = match observation {
            ClosureObservation::Cooperative(coop) => {
                (coop.closing_txid, coop.settled_balance, Vec::new(), None)
            }
            ClosureObservation::LocalUnilateral(uni) => {
                // Our own commitment confirmed: fall back to the seeds
                // captured from the force-close package if the watcher
                // delivered none.
                let seeds = if uni.htlc_seeds.is_empty() {
                    std::mem::take(&mut self.local_htlc_seeds)
                } else {
                    uni.htlc_seeds
                };
                (uni.closing_txid, uni.settled_balance, seeds, None)
            }
            ClosureObservation::RemoteUnilateral(uni) => {
                (uni.closing_txid, uni.settled_balance, uni.htlc_seeds, None)
            }
            ClosureObservation::Breach(breach) => (
                breach.breach_seed.breach_txid,
                breach.settled_balance,
                Vec::new(),
                Some(breach.breach_seed),
            ),
        };

        // A closure re-delivered after a crash mid-transition finds the
        // write-once record already present; the durable decision wins
        // over anything re-derived from the replayed event.
        let resolutions = match self.cfg.log.fetch_contract_resolutions().await? {
            Some(existing) => {
                info!(
                    channel = %self.cfg.descriptor, kind = %existing.close_kind,
                    "closure already recorded; resuming from the durable decision",
                );
                existing
            }
            None => {
                let fresh = ContractResolutions {
                    descriptor: self.cfg.descriptor,
                    close_kind,
                    commitment_txid: closing_txid,
                    settled_balance,
                    htlc_seeds,
                    breach_seed,
                    recorded_at: Utc::now(),
                };
                self.cfg.log.log_contract_resolutions(&fresh).await?;
                fresh
            }
        };
        let actions =
            decide_chain_actions(&resolutions.htlc_seeds, resolutions.breach_seed.as_ref());
        let snapshots = resolutions.resolver_snapshots();

        // Decision artifacts and the resolver set become durable before
        // the state does; the state becomes durable before any effect.
        self.cfg.log.log_chain_actions(&actions).await?;
        self.cfg.log.insert_unresolved_contracts(&snapshots).await?;
        self.commit_state(ArbitratorState::ContractClosed).await?;

        let summary = ChannelCloseSummary {
            descriptor: self.cfg.descriptor,
            close_kind: resolutions.close_kind,
            closing_txid: resolutions.commitment_txid,
            settled_balance: resolutions.settled_balance,
            closed_at: resolutions.recorded_at,
        };
        tokio::select! {
            biased;
            Ok(_) = self.shutdown_rx.wait_for(|stop| *stop) => {
                return Err(ArbiterError::ShuttingDown);
            }
            marked = self.cfg.hooks.mark_channel_closed(&summary) => marked?,
        };

        for snapshot in &snapshots {
            let resolver = (self.cfg.resolver_factory)(snapshot)?;
            self.spawn_resolver(resolver);
        }
        if self.resolvers.is_empty() {
            self.finalize().await?;
        }
        Ok(())
    }

    /// Bookkeeping for supervised resolvers: swap refinements through
    /// the log, drop settled contracts, and take the terminal
    /// transition when the set empties.
    async fn handle_resolver_msg(&mut self, msg: ResolverMsg) -> Result<(), ArbiterError> {
        match msg {
            ResolverMsg::Swap { old, replacement } => {
                if !self.resolvers.contains_key(&old) {
                    warn!(
                        channel = %self.cfg.descriptor, contract = %old,
                        "refinement reported for untracked contract",
                    );
                    return Ok(());
                }
                // Log first: recovery must never see a supervised
                // resolver the log does not know about.
                let snapshot = replacement.snapshot();
                self.cfg.log.swap_contract(old, snapshot).await?;
                self.resolvers.remove(&old);
                self.spawn_resolver(replacement);
                Ok(())
            }

            ResolverMsg::Settled(id) => {
                if self.resolvers.remove(&id).is_none() {
                    warn!(
                        channel = %self.cfg.descriptor, contract = %id,
                        "completion reported for untracked contract",
                    );
                    return Ok(());
                }
                self.cfg.log.resolve_contract(id).await?;
                debug!(
                    channel = %self.cfg.descriptor, contract = %id,
                    remaining = self.resolvers.len(),
                    "contract resolved",
                );
                if self.resolvers.is_empty() && self.state == ArbitratorState::ContractClosed {
                    self.finalize().await?;
                }
                Ok(())
            }

            ResolverMsg::Failed(id, failure) => {
                // The entry stays in the map: an unresolved contract
                // blocks the terminal transition.
                error!(
                    channel = %self.cfg.descriptor, contract = %id, %failure,
                    "resolver failed; channel resolution blocked",
                );
                Ok(())
            }
        }
    }

    /// `ContractClosed` with an empty resolver set → `FullyResolved`.
    async fn finalize(&mut self) -> Result<(), ArbiterError> {
        // The resolved marker must succeed before the terminal state is
        // made durable; a crash in between retries an idempotent marker
        // on recovery.
        tokio::select! {
            biased;
            Ok(_) = self.shutdown_rx.wait_for(|stop| *stop) => {
                return Err(ArbiterError::ShuttingDown);
            }
            marked = self.cfg.hooks.mark_channel_resolved() => marked?,
        };
        self.commit_state(ArbitratorState::FullyResolved).await?;
        info!(channel = %self.cfg.descriptor, "channel fully resolved");
        Ok(())
    }

    /// Durably commit a forward transition, then publish it to
    /// observers. Re-committing the current state is a no-op.
    async fn commit_state(&mut self, target: ArbitratorState) -> Result<(), ArbiterError> {
        if self.state == target {
            return Ok(());
        }
        self.cfg.log.commit_state(target).await?;
        debug!(
            channel = %self.cfg.descriptor, from = %self.state, to = %target,
            "state committed",
        );
        self.state = target;
        self.state_tx.send_replace(target);
        Ok(())
    }

    /// Put one resolver under supervision on its own task. The task
    /// reports exactly one outcome and exits; refinements come back to
    /// the loop so the swap is logged before the replacement runs.
    fn spawn_resolver(&mut self, mut resolver: Box<dyn ContractResolver>) {
        let id = resolver.contract_id();
        debug!(
            channel = %self.cfg.descriptor, contract = %id, kind = %resolver.kind(),
            "supervising contract",
        );

        let msg_tx = self.resolver_tx.clone();
        let mut heights = self.height_tx.subscribe();
        let mut shutdown = self.shutdown_rx.clone();
        let task = tokio::spawn(async move {
            let step = tokio::select! {
                biased;
                Ok(_) = shutdown.wait_for(|stop| *stop) => return,
                step = resolver.advance(&mut heights) => step,
            };
            let msg = match step {
                Ok(Resolution::Settled) => ResolverMsg::Settled(id),
                Ok(Resolution::Replaced(replacement)) => ResolverMsg::Swap {
                    old: id,
                    replacement,
                },
                Err(failure) => ResolverMsg::Failed(id, failure),
            };
            let _ = msg_tx.send(msg);
        });
        self.resolvers.insert(id, task);
    }

    fn abort_resolvers(&mut self) {
        for (_, task) in self.resolvers.drain() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Chain-action decision
// ---------------------------------------------------------------------------

/// Decide the treatment of every contract left behind by a closure.
/// The result is recorded once as the decision of record; recovery
/// reloads it rather than recomputing against a chain that has moved,
/// while supervision itself resumes from the resolver snapshots. Only
/// `ClaimNow` and `Wait` are ever produced here: the observation seeds
/// carry nothing that needs no action.
pub fn decide_chain_actions(
    htlc_seeds: &[HtlcResolutionSeed],
    breach_seed: Option<&BreachResolutionSeed>,
) -> ChainActionMap {
    let mut actions = ChainActionMap::new();
    for seed in htlc_seeds {
        let action = if seed.preimage_known {
            ChainAction::ClaimNow
        } else {
            ChainAction::Wait
        };
        actions.record(action, seed.contract_id);
    }
    if let Some(breach) = breach_seed {
        actions.record(ChainAction::ClaimNow, breach.contract_id);
    }
    actions
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
