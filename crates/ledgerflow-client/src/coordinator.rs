//! The transfer submission state machine.
//!
//! One coordinator owns one transfer end to end: pick an aggregator by
//! weighted random draw, submit (or resume a journaled submission), then
//! poll the aggregator and the ledger until the ledger settles the
//! transaction. The dual poll runs as interleaved phases of a single task;
//! there are no racing mutators of the flow state.
//!
//! Status updates stream out on an unbounded channel. The only trustworthy
//! terminal signal is the ledger's `processed`; an `awaited` arriving after
//! the aggregator reported forwarding is expected replica staleness and is
//! tolerated while the ledger's certified time has not yet passed the
//! forwarded batch timestamp. Past that point the two services disagree
//! beyond tolerance and the coordinator fails with a consistency violation.

use crate::journal::{JournalError, JournalStore, TransferStatusKey, TxHistoryEntry};
use async_trait::async_trait;
use ledgerflow_core::{
    CallError, ErrorKind, GlobalId, Nat, Principal, RequestId, Result, Timestamp, TxAggStatus,
    TxInput, TxLedgerStatus, TxResult,
};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Everything the coordinator needs from the network, as one seam.
///
/// The production implementation lives in [`crate::client`] on top of the
/// ledger and aggregator delegates; tests script it.
#[async_trait]
pub trait CoordinatorBackend: Send + Sync {
    /// The ledger's published `(principal, priority weight)` directory.
    async fn aggregators(&self) -> Result<Vec<(Principal, Nat)>>;

    /// Transmit a submission envelope; returns its request id before the
    /// outcome is known.
    async fn prepare(&self, aggregator: Principal, tx: TxInput) -> Result<RequestId>;

    /// Drive a transmitted submission to its assigned gid and the verified
    /// submission timestamp.
    async fn commit(
        &self,
        aggregator: Principal,
        request_id: RequestId,
    ) -> Result<(GlobalId, Timestamp)>;

    async fn aggregator_status(
        &self,
        aggregator: Principal,
        gid: GlobalId,
    ) -> Result<(TxAggStatus, Timestamp)>;

    async fn ledger_status(&self, gid: GlobalId) -> Result<(TxLedgerStatus, Timestamp)>;
}

/// Poll cadence and query bounds.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Aggregator poll interval while it is the only source.
    pub aggregator_poll_interval: Duration,
    /// Ledger poll interval once the ledger is being watched.
    pub ledger_poll_interval: Duration,
    /// In the dual-poll phase the aggregator is asked every n-th ledger
    /// tick.
    pub aggregator_tick_stride: u64,
    /// Wall-clock cap on any single status query; exceeding it is
    /// inconclusive, not fatal.
    pub status_query_cap: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            aggregator_poll_interval: Duration::from_millis(250),
            ledger_poll_interval: Duration::from_millis(250),
            aggregator_tick_stride: 3,
            status_query_cap: Duration::from_secs(5),
        }
    }
}

/// Status updates emitted while a transfer advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    PickingAggregator,
    Submitting { aggregator: Principal },
    Queued { gid: GlobalId, position: Nat },
    Forwarding { gid: GlobalId },
    Forwarded { gid: GlobalId, batch_timestamp: Timestamp },
    /// The ledger still awaits the transaction. Informational; tolerated
    /// even after the aggregator reported forwarding.
    Awaited { gid: GlobalId },
    /// Terminal. Nothing is emitted after this.
    Processed { gid: GlobalId, result: Option<TxResult> },
}

impl TransferEvent {
    /// The persisted status key this event advances the journal to, if any.
    pub fn status_key(&self) -> Option<TransferStatusKey> {
        match self {
            Self::PickingAggregator => Some(TransferStatusKey::PickingAggregator),
            Self::Submitting { .. } => Some(TransferStatusKey::Submitting),
            Self::Queued { .. } => Some(TransferStatusKey::Queued),
            Self::Forwarding { .. } => Some(TransferStatusKey::Forwarding),
            Self::Forwarded { .. } => Some(TransferStatusKey::Forwarded),
            Self::Awaited { .. } => None,
            Self::Processed { .. } => Some(TransferStatusKey::Processed),
        }
    }
}

/// Why a transfer failed for good.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("no available aggregator")]
    NoAggregator,
    #[error("transaction {gid} dropped by the ledger")]
    Dropped { gid: GlobalId },
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Call(#[from] CallError),
    /// The coordinator was cancelled. Never emitted on the event stream;
    /// cancellation simply ends it.
    #[error("cancelled")]
    Cancelled,
}

pub type TransferUpdate = std::result::Result<TransferEvent, TransferError>;

type Flow<T> = std::result::Result<T, TransferError>;

/// Cooperative cancellation handle. Once flipped, the coordinator emits
/// nothing further; in-flight I/O finishes but its result is discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Weighted random draw over the aggregator directory. Zero-weight entries
/// are never picked; an all-zero (or empty) directory yields `None`.
pub fn pick_weighted<R: Rng>(rng: &mut R, aggregators: &[(Principal, Nat)]) -> Option<Principal> {
    let weights: Vec<u128> = aggregators
        .iter()
        .map(|(_, weight)| u128::try_from(&weight.0).unwrap_or(u128::MAX))
        .collect();
    let total = weights.iter().fold(0u128, |acc, w| acc.saturating_add(*w));
    if total == 0 {
        return None;
    }
    let mut draw = rng.gen_range(0..total);
    for ((principal, _), weight) in aggregators.iter().zip(&weights) {
        if draw < *weight {
            return Some(*principal);
        }
        draw -= weight;
    }
    None
}

#[derive(Clone)]
enum Phase {
    AggregatorOnly,
    Both,
    LedgerFinal { batch_timestamp: Timestamp },
}

/// Drives one journaled transfer to settlement.
pub struct TransferCoordinator {
    backend: Arc<dyn CoordinatorBackend>,
    journal: Arc<dyn JournalStore>,
    config: CoordinatorConfig,
    cancel: CancelFlag,
    events: mpsc::UnboundedSender<TransferUpdate>,
    entry: TxHistoryEntry,
}

impl TransferCoordinator {
    /// Build a coordinator for a fresh or journaled entry. Returns the
    /// update stream and the cancellation handle alongside it.
    pub fn new(
        backend: Arc<dyn CoordinatorBackend>,
        journal: Arc<dyn JournalStore>,
        entry: TxHistoryEntry,
        config: CoordinatorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransferUpdate>, CancelFlag) {
        let (events, receiver) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();
        let coordinator = Self {
            backend,
            journal,
            config,
            cancel: cancel.clone(),
            events,
            entry,
        };
        (coordinator, receiver, cancel)
    }

    /// Run the state machine to its terminal state. Consumes the
    /// coordinator; the update stream closes when this returns.
    pub async fn run(mut self) {
        match self.drive().await {
            Ok(()) | Err(TransferError::Cancelled) => {}
            Err(error) => {
                warn!(local_id = self.entry.local_id, "transfer failed: {error}");
                self.entry.last_error = Some(error.to_string());
                if let Err(journal_error) = self.entry.save(self.journal.as_ref()).await {
                    warn!(local_id = self.entry.local_id, "journal write failed: {journal_error}");
                }
                if !self.cancel.is_cancelled() {
                    let _ = self.events.send(Err(error));
                }
            }
        }
    }

    async fn drive(&mut self) -> Flow<()> {
        let aggregator = self.pick_phase().await?;
        let (gid, submitted_at) = self.submit_phase(aggregator).await?;
        self.poll_phase(aggregator, gid, submitted_at).await
    }

    /// Emit an update, advancing the persisted status key when the event
    /// carries one further along than what the journal has seen. Re-emitted
    /// earlier statuses (a stale replica answering during the dual poll)
    /// never move the journal backwards.
    fn emit(&mut self, event: TransferEvent) -> Flow<()> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if let Some(key) = event.status_key() {
            self.entry.last_seen_status = self.entry.last_seen_status.max(key);
        }
        debug!(local_id = self.entry.local_id, ?event, "transfer update");
        self.events.send(Ok(event)).map_err(|_| TransferError::Cancelled)
    }

    /// Emit and journal in one step when the status key actually advances.
    async fn transition(&mut self, event: TransferEvent) -> Flow<()> {
        let advances = event
            .status_key()
            .is_some_and(|key| key > self.entry.last_seen_status);
        self.emit(event)?;
        if advances {
            self.checkpoint().await?;
        }
        Ok(())
    }

    async fn checkpoint(&self) -> Flow<()> {
        self.entry.save(self.journal.as_ref()).await?;
        Ok(())
    }

    async fn pick_phase(&mut self) -> Flow<Principal> {
        if let Some(aggregator) = self.entry.aggregator {
            return Ok(aggregator);
        }
        self.emit(TransferEvent::PickingAggregator)?;
        let directory = self.backend.aggregators().await?;
        let aggregator = pick_weighted(&mut rand::thread_rng(), &directory)
            .ok_or(TransferError::NoAggregator)?;
        info!(local_id = self.entry.local_id, %aggregator, "picked submission target");
        self.entry.aggregator = Some(aggregator);
        self.checkpoint().await?;
        Ok(aggregator)
    }

    async fn submit_phase(&mut self, aggregator: Principal) -> Flow<(GlobalId, Timestamp)> {
        if let Some(gid) = self.entry.gid.clone() {
            let submitted_at = self
                .entry
                .submitted_at
                .clone()
                .unwrap_or_else(|| Timestamp::from_nanos(0));
            return Ok((gid, submitted_at));
        }
        self.transition(TransferEvent::Submitting { aggregator }).await?;
        let request_id = match self.entry.request_id {
            // Crash recovery: the envelope already went out under this id;
            // committing again reaches the same outcome.
            Some(request_id) => {
                info!(local_id = self.entry.local_id, %request_id, "resuming journaled submission");
                request_id
            }
            None => {
                let request_id = self
                    .backend
                    .prepare(aggregator, self.entry.transfer.to_tx_input())
                    .await?;
                // The id hits the journal before we await completion, so a
                // crash here is resumable.
                self.entry.request_id = Some(request_id);
                self.checkpoint().await?;
                request_id
            }
        };
        let (gid, submitted_at) = self.backend.commit(aggregator, request_id).await?;
        info!(local_id = self.entry.local_id, %gid, "submission accepted");
        self.entry.gid = Some(gid.clone());
        self.entry.submitted_at = Some(submitted_at.clone());
        self.checkpoint().await?;
        Ok((gid, submitted_at))
    }

    async fn poll_phase(
        &mut self,
        aggregator: Principal,
        gid: GlobalId,
        submitted_at: Timestamp,
    ) -> Flow<()> {
        let mut phase = Phase::AggregatorOnly;
        let mut tick: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            match phase.clone() {
                Phase::AggregatorOnly => {
                    match self.aggregator_status(aggregator, &gid, &submitted_at).await? {
                        Some(TxAggStatus::Queued(position)) => {
                            self.transition(TransferEvent::Queued {
                                gid: gid.clone(),
                                position,
                            })
                            .await?;
                        }
                        Some(TxAggStatus::Pending) => {
                            self.transition(TransferEvent::Forwarding { gid: gid.clone() })
                                .await?;
                            phase = Phase::Both;
                            tick = 0;
                            continue;
                        }
                        Some(TxAggStatus::Other(batch_timestamp)) => {
                            self.transition(TransferEvent::Forwarded {
                                gid: gid.clone(),
                                batch_timestamp: batch_timestamp.clone(),
                            })
                            .await?;
                            phase = Phase::LedgerFinal { batch_timestamp };
                            continue;
                        }
                        None => {}
                    }
                    tokio::time::sleep(self.config.aggregator_poll_interval).await;
                }
                Phase::Both => {
                    if tick % self.config.aggregator_tick_stride == 0 {
                        match self.aggregator_status(aggregator, &gid, &submitted_at).await? {
                            Some(TxAggStatus::Other(batch_timestamp)) => {
                                self.transition(TransferEvent::Forwarded {
                                    gid: gid.clone(),
                                    batch_timestamp: batch_timestamp.clone(),
                                })
                                .await?;
                                phase = Phase::LedgerFinal { batch_timestamp };
                                continue;
                            }
                            // Stale replica answers are still worth relaying;
                            // the journal never moves backwards on them.
                            Some(TxAggStatus::Queued(position)) => {
                                self.emit(TransferEvent::Queued { gid: gid.clone(), position })?;
                            }
                            Some(TxAggStatus::Pending) => {
                                self.emit(TransferEvent::Forwarding { gid: gid.clone() })?;
                            }
                            None => {}
                        }
                    }
                    if let Some((status, _)) = self.ledger_status(&gid).await? {
                        match status {
                            TxLedgerStatus::Processed(result) => {
                                return self.settle(gid, result).await;
                            }
                            TxLedgerStatus::Dropped => {
                                return Err(TransferError::Dropped { gid });
                            }
                            // Expected here: the aggregator has not reported
                            // forwarding yet from the ledger's perspective.
                            TxLedgerStatus::Awaited => {
                                self.emit(TransferEvent::Awaited { gid: gid.clone() })?;
                            }
                        }
                    }
                    tokio::time::sleep(self.config.ledger_poll_interval).await;
                    tick += 1;
                }
                Phase::LedgerFinal { batch_timestamp } => {
                    if let Some((status, certified_at)) = self.ledger_status(&gid).await? {
                        match status {
                            TxLedgerStatus::Processed(result) => {
                                return self.settle(gid, result).await;
                            }
                            TxLedgerStatus::Dropped => {
                                return Err(TransferError::Dropped { gid });
                            }
                            TxLedgerStatus::Awaited => {
                                if certified_at > batch_timestamp {
                                    return Err(CallError::consistency(format!(
                                        "ledger still awaits {gid} although its certified \
                                         time passed the forwarded batch timestamp"
                                    ))
                                    .with_timestamp(certified_at)
                                    .into());
                                }
                                // Stale replica; its clock is still behind
                                // the batch the aggregator forwarded.
                                self.emit(TransferEvent::Awaited { gid: gid.clone() })?;
                            }
                        }
                    }
                    tokio::time::sleep(self.config.ledger_poll_interval).await;
                }
            }
        }
    }

    async fn settle(&mut self, gid: GlobalId, result: Option<TxResult>) -> Flow<()> {
        info!(local_id = self.entry.local_id, %gid, "transaction processed");
        self.transition(TransferEvent::Processed { gid, result }).await
    }

    /// One bounded aggregator status read. `None` means inconclusive: the
    /// wall-clock cap elapsed, or a stale replica has not seen the
    /// submission yet ("not yet issued" with a verified timestamp no later
    /// than the submission's own).
    async fn aggregator_status(
        &self,
        aggregator: Principal,
        gid: &GlobalId,
        submitted_at: &Timestamp,
    ) -> Flow<Option<TxAggStatus>> {
        let read = self.backend.aggregator_status(aggregator, gid.clone());
        match tokio::time::timeout(self.config.status_query_cap, read).await {
            Err(_) => {
                warn!(%gid, "aggregator status query exceeded the wall-clock cap");
                Ok(None)
            }
            Ok(Ok((status, _certified_at))) => Ok(Some(status)),
            Ok(Err(error)) => {
                if error.kind == ErrorKind::Transient
                    && error.message.contains("not yet issued")
                    && error.timestamp.as_ref().is_some_and(|ts| ts <= submitted_at)
                {
                    debug!(%gid, "replica has not seen the submission yet");
                    return Ok(None);
                }
                Err(error.into())
            }
        }
    }

    /// One bounded ledger status read; cap exhaustion is inconclusive.
    async fn ledger_status(&self, gid: &GlobalId) -> Flow<Option<(TxLedgerStatus, Timestamp)>> {
        let read = self.backend.ledger_status(gid.clone());
        match tokio::time::timeout(self.config.status_query_cap, read).await {
            Err(_) => {
                warn!(%gid, "ledger status query exceeded the wall-clock cap");
                Ok(None)
            }
            Ok(outcome) => Ok(Some(outcome?)),
        }
    }
}
