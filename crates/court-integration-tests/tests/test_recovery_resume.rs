//! # Crash Recovery and Resume
//!
//! The arbitrator must pick up exactly where the durable log says it
//! stopped: re-supervise persisted contracts after `ContractClosed`,
//! retry the broadcast leg after `BroadcastCommit`, and never re-derive
//! a decision from chain state that has since moved. A clean shutdown
//! followed by a restart over the same log must finish the job.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{absolute::LockTime, transaction::Version, Amount, OutPoint, Transaction, Txid};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};

use court_arbiter::{
    chain_event_channel, decide_chain_actions, ArbiterError, ArbitratorHandle, BroadcastError,
    ChainEventPublisher, ChannelArbitrator, ChannelArbitratorConfig, ChannelHooks, HookError,
    LocalForceCloseSummary, UnilateralCloseObserved,
};
use court_core::{
    ArbitratorState, ChannelCloseSummary, ChannelDescriptor, CloseKind, ContractId, ShortChannelId,
};
use court_log::{ArbitratorLog, ContractResolutions, HtlcResolutionSeed, MemoryLog};

const WAIT: Duration = Duration::from_secs(5);

fn descriptor() -> ChannelDescriptor {
    ChannelDescriptor::new(OutPoint::null(), ShortChannelId::from_parts(700_123, 4, 0))
}

fn txid() -> Txid {
    "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16"
        .parse()
        .expect("txid")
}

fn close_tx() -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![],
        output: vec![],
    }
}

fn htlc_seed(preimage_known: bool, deadline_height: u32) -> HtlcResolutionSeed {
    HtlcResolutionSeed {
        contract_id: ContractId::new(),
        output_index: 0,
        amount: Amount::from_sat(30_000),
        preimage_known,
        deadline_height,
    }
}

fn recorded_resolutions(seeds: Vec<HtlcResolutionSeed>) -> ContractResolutions {
    ContractResolutions {
        descriptor: descriptor(),
        close_kind: CloseKind::RemoteForce,
        commitment_txid: txid(),
        settled_balance: Amount::from_sat(45_000),
        htlc_seeds: seeds,
        breach_seed: None,
        recorded_at: Utc::now(),
    }
}

struct RecoveryHooks {
    broadcast_outcome: Mutex<Result<(), BroadcastError>>,
    broadcasts: mpsc::UnboundedSender<()>,
    broadcast_marked: mpsc::UnboundedSender<()>,
    closed: mpsc::UnboundedSender<ChannelCloseSummary>,
    resolved: mpsc::UnboundedSender<()>,
}

struct HookTaps {
    broadcasts: mpsc::UnboundedReceiver<()>,
    broadcast_marked: mpsc::UnboundedReceiver<()>,
    closed: mpsc::UnboundedReceiver<ChannelCloseSummary>,
    resolved: mpsc::UnboundedReceiver<()>,
}

impl RecoveryHooks {
    fn new() -> (Arc<Self>, HookTaps) {
        let (broadcasts, broadcasts_rx) = mpsc::unbounded_channel();
        let (broadcast_marked, broadcast_marked_rx) = mpsc::unbounded_channel();
        let (closed, closed_rx) = mpsc::unbounded_channel();
        let (resolved, resolved_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                broadcast_outcome: Mutex::new(Ok(())),
                broadcasts,
                broadcast_marked,
                closed,
                resolved,
            }),
            HookTaps {
                broadcasts: broadcasts_rx,
                broadcast_marked: broadcast_marked_rx,
                closed: closed_rx,
                resolved: resolved_rx,
            },
        )
    }
}

#[async_trait]
impl ChannelHooks for RecoveryHooks {
    async fn broadcast(&self, _tx: &Transaction) -> Result<(), BroadcastError> {
        let _ = self.broadcasts.send(());
        self.broadcast_outcome.lock().clone()
    }

    async fn build_force_close(&self) -> Result<LocalForceCloseSummary, HookError> {
        Ok(LocalForceCloseSummary {
            close_tx: close_tx(),
            htlc_seeds: vec![],
        })
    }

    async fn mark_commitment_broadcasted(&self) -> Result<(), HookError> {
        let _ = self.broadcast_marked.send(());
        Ok(())
    }

    async fn mark_channel_closed(&self, summary: &ChannelCloseSummary) -> Result<(), HookError> {
        let _ = self.closed.send(summary.clone());
        Ok(())
    }

    async fn mark_channel_resolved(&self) -> Result<(), HookError> {
        let _ = self.resolved.send(());
        Ok(())
    }
}

struct Running {
    handle: ArbitratorHandle,
    publisher: ChainEventPublisher,
    height_tx: watch::Sender<u32>,
    task: tokio::task::JoinHandle<()>,
}

fn start(log: Arc<MemoryLog>, hooks: Arc<RecoveryHooks>) -> Running {
    let cfg = ChannelArbitratorConfig::new(descriptor(), hooks, log);
    let (arbitrator, handle) = ChannelArbitrator::new(cfg);
    let (publisher, events) = chain_event_channel();
    let (height_tx, heights) = watch::channel(0u32);
    let task = arbitrator.start(events, heights);
    Running {
        handle,
        publisher,
        height_tx,
        task,
    }
}

#[tokio::test]
async fn resume_from_contract_closed_finishes_supervision() {
    // A previous lifetime observed the close and persisted everything,
    // then died before the contracts settled.
    let seed = htlc_seed(true, 90);
    let resolutions = recorded_resolutions(vec![seed.clone()]);
    let log = Arc::new(MemoryLog::hydrated(
        ArbitratorState::ContractClosed,
        vec![seed.snapshot()],
        Some(resolutions.clone()),
        Some(decide_chain_actions(&resolutions.htlc_seeds, None)),
    ));

    let (hooks, mut taps) = RecoveryHooks::new();
    let running = start(log.clone(), hooks);

    // No chain event arrives: the persisted record alone drives the
    // channel terminal.
    let mut states = running.handle.state_updates();
    timeout(WAIT, states.wait_for(|s| s.is_terminal()))
        .await
        .expect("terminal transition timed out")
        .expect("state channel");
    timeout(WAIT, taps.resolved.recv())
        .await
        .expect("resolve marker timed out")
        .expect("resolved channel");

    assert_eq!(
        log.current_state().await.expect("state"),
        ArbitratorState::FullyResolved
    );
    assert!(log
        .fetch_unresolved_contracts()
        .await
        .expect("fetch")
        .is_empty());
}

#[tokio::test]
async fn resume_from_contract_closed_replays_the_close_marker() {
    // Crash window: the closed-state commit became durable but the
    // closed marker never reached the channel manager. Recovery rebuilds
    // the summary from the record and replays the idempotent marker.
    let seed = htlc_seed(true, 90);
    let resolutions = recorded_resolutions(vec![seed.clone()]);
    let log = Arc::new(MemoryLog::hydrated(
        ArbitratorState::ContractClosed,
        vec![seed.snapshot()],
        Some(resolutions.clone()),
        Some(decide_chain_actions(&resolutions.htlc_seeds, None)),
    ));

    let (hooks, mut taps) = RecoveryHooks::new();
    let running = start(log.clone(), hooks);

    let summary = timeout(WAIT, taps.closed.recv())
        .await
        .expect("close marker timed out")
        .expect("closed channel");
    assert_eq!(summary.close_kind, CloseKind::RemoteForce);
    assert_eq!(summary.closing_txid, resolutions.commitment_txid);
    assert_eq!(summary.settled_balance, resolutions.settled_balance);

    let mut states = running.handle.state_updates();
    timeout(WAIT, states.wait_for(|s| s.is_terminal()))
        .await
        .expect("terminal transition timed out")
        .expect("state channel");
}

#[tokio::test]
async fn resume_from_broadcast_commit_retries_the_broadcast() {
    let log = Arc::new(MemoryLog::hydrated(
        ArbitratorState::BroadcastCommit,
        vec![],
        None,
        None,
    ));

    let (hooks, mut taps) = RecoveryHooks::new();
    let running = start(log.clone(), hooks);

    let mut states = running.handle.state_updates();
    timeout(
        WAIT,
        states.wait_for(|s| *s == ArbitratorState::CommitmentBroadcasted),
    )
    .await
    .expect("broadcast retry timed out")
    .expect("state channel");

    timeout(WAIT, taps.broadcasts.recv())
        .await
        .expect("broadcast timed out")
        .expect("broadcast channel");
    assert_eq!(
        log.current_state().await.expect("state"),
        ArbitratorState::CommitmentBroadcasted
    );
}

#[tokio::test]
async fn resume_from_commitment_broadcasted_replays_the_marker() {
    // Crash window: the broadcast-state commit became durable but the
    // broadcast marker never fired. Recovery replays it and holds
    // position; the broadcast itself is not retried.
    let log = Arc::new(MemoryLog::hydrated(
        ArbitratorState::CommitmentBroadcasted,
        vec![],
        None,
        None,
    ));

    let (hooks, mut taps) = RecoveryHooks::new();
    let _running = start(log.clone(), hooks);

    timeout(WAIT, taps.broadcast_marked.recv())
        .await
        .expect("broadcast marker timed out")
        .expect("marker channel");
    assert!(taps.broadcasts.try_recv().is_err());
    assert_eq!(
        log.current_state().await.expect("state"),
        ArbitratorState::CommitmentBroadcasted
    );
}

#[tokio::test]
async fn redelivered_closure_reuses_the_recorded_decision() {
    // A previous lifetime recorded the resolutions, then died before the
    // closed-state commit. The watcher re-delivers the closure event;
    // the durable record must win over the replayed figures, and the
    // write-once log must not be asked to write twice.
    let seed = htlc_seed(true, 90);
    let resolutions = recorded_resolutions(vec![seed.clone()]);
    let log = Arc::new(MemoryLog::hydrated(
        ArbitratorState::CommitmentBroadcasted,
        vec![],
        Some(resolutions.clone()),
        None,
    ));

    let (hooks, mut taps) = RecoveryHooks::new();
    let running = start(log.clone(), hooks);

    running
        .publisher
        .remote_unilateral
        .send(UnilateralCloseObserved {
            closing_txid: txid(),
            settled_balance: Amount::from_sat(1),
            htlc_seeds: vec![],
        })
        .await
        .expect("send close");

    let mut states = running.handle.state_updates();
    timeout(WAIT, states.wait_for(|s| s.is_terminal()))
        .await
        .expect("terminal transition timed out")
        .expect("state channel");

    let summary = timeout(WAIT, taps.closed.recv())
        .await
        .expect("close marker timed out")
        .expect("closed channel");
    assert_eq!(summary.settled_balance, resolutions.settled_balance);
    assert_eq!(
        log.fetch_contract_resolutions().await.expect("fetch"),
        Some(resolutions)
    );
    assert_eq!(
        log.current_state().await.expect("state"),
        ArbitratorState::FullyResolved
    );
}

#[tokio::test]
async fn failed_broadcast_retry_waits_for_the_chain() {
    let log = Arc::new(MemoryLog::hydrated(
        ArbitratorState::BroadcastCommit,
        vec![],
        None,
        None,
    ));

    let (hooks, mut taps) = RecoveryHooks::new();
    *hooks.broadcast_outcome.lock() = Err(BroadcastError::Publish("mempool rejected".into()));
    let running = start(log.clone(), hooks);

    // The retry fails; the machine holds its position.
    timeout(WAIT, taps.broadcasts.recv())
        .await
        .expect("broadcast timed out")
        .expect("broadcast channel");
    assert_eq!(
        log.current_state().await.expect("state"),
        ArbitratorState::BroadcastCommit
    );

    // The peer's commitment confirming still rescues the channel.
    running
        .publisher
        .remote_unilateral
        .send(UnilateralCloseObserved {
            closing_txid: txid(),
            settled_balance: Amount::from_sat(80_000),
            htlc_seeds: vec![],
        })
        .await
        .expect("send close");

    let mut states = running.handle.state_updates();
    timeout(WAIT, states.wait_for(|s| s.is_terminal()))
        .await
        .expect("terminal transition timed out")
        .expect("state channel");
    timeout(WAIT, taps.resolved.recv())
        .await
        .expect("resolve marker timed out")
        .expect("resolved channel");
}

#[tokio::test]
async fn terminal_channel_refuses_new_requests() {
    let log = Arc::new(MemoryLog::hydrated(
        ArbitratorState::FullyResolved,
        vec![],
        None,
        None,
    ));

    let (hooks, _taps) = RecoveryHooks::new();
    let running = start(log, hooks);

    // The loop exits immediately; requests can no longer be serviced.
    timeout(WAIT, running.task)
        .await
        .expect("loop did not exit")
        .expect("loop panicked");
    let err = running.handle.force_close().await.expect_err("refused");
    assert_eq!(err, ArbiterError::ShuttingDown);
}

#[tokio::test]
async fn shutdown_then_restart_over_the_same_log_completes() {
    let log = Arc::new(MemoryLog::new());
    let (hooks, _taps) = RecoveryHooks::new();
    let first = start(log.clone(), hooks);

    // Close with a timeout-gated HTLC, then stop before the deadline.
    let pending = htlc_seed(false, 105);
    first
        .publisher
        .remote_unilateral
        .send(UnilateralCloseObserved {
            closing_txid: txid(),
            settled_balance: Amount::from_sat(60_000),
            htlc_seeds: vec![pending],
        })
        .await
        .expect("send close");

    let mut states = first.handle.state_updates();
    timeout(
        WAIT,
        states.wait_for(|s| *s >= ArbitratorState::ContractClosed),
    )
    .await
    .expect("close transition timed out")
    .expect("state channel");

    first.handle.shutdown();
    timeout(WAIT, first.task)
        .await
        .expect("loop did not exit")
        .expect("loop panicked");
    assert_eq!(
        log.current_state().await.expect("state"),
        ArbitratorState::ContractClosed
    );
    assert_eq!(
        log.fetch_unresolved_contracts().await.expect("fetch").len(),
        1
    );

    // Second lifetime: the persisted contract resumes and the deadline
    // passing drives it home.
    let (hooks, mut taps) = RecoveryHooks::new();
    let second = start(log.clone(), hooks);
    second.height_tx.send_replace(110);

    let mut states = second.handle.state_updates();
    timeout(WAIT, states.wait_for(|s| s.is_terminal()))
        .await
        .expect("terminal transition timed out")
        .expect("state channel");
    timeout(WAIT, taps.resolved.recv())
        .await
        .expect("resolve marker timed out")
        .expect("resolved channel");
    assert!(log
        .fetch_unresolved_contracts()
        .await
        .expect("fetch")
        .is_empty());
}
