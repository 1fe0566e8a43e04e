//! The top-level client handle.

use crate::aggregator::AggregatorDelegate;
use crate::coordinator::{
    pick_weighted, CancelFlag, CoordinatorBackend, CoordinatorConfig, TransferCoordinator,
    TransferError, TransferUpdate,
};
use crate::journal::{JournalStore, TxHistoryEntry};
use crate::ledger::LedgerDelegate;
use async_trait::async_trait;
use ledgerflow_agent::{Agent, Identity};
use ledgerflow_core::{
    CallError, GlobalId, Nat, Principal, RequestId, Result, Timestamp, TransferRequest,
    TxAggStatus, TxInput, TxLedgerStatus,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// A running transfer: its update stream, cancellation handle, and the
/// spawned coordinator task.
pub struct TransferTracker {
    local_id: u64,
    events: UnboundedReceiverStream<TransferUpdate>,
    cancel: CancelFlag,
    task: JoinHandle<()>,
}

impl TransferTracker {
    pub fn local_id(&self) -> u64 {
        self.local_id
    }

    /// The status update stream. Ends after the terminal event or error;
    /// ends silently when cancelled.
    pub fn events(&mut self) -> &mut UnboundedReceiverStream<TransferUpdate> {
        &mut self.events
    }

    /// Next update, or `None` when the stream has ended.
    pub async fn next_update(&mut self) -> Option<TransferUpdate> {
        use tokio_stream::StreamExt;
        self.events.next().await
    }

    /// Flip the cancellation flag. No further updates are emitted;
    /// in-flight I/O finishes in the background and is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the coordinator task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Immutable handle over one ledger and its aggregators, explicitly
/// constructed from an already-initialized agent.
pub struct LedgerflowClient {
    agent: Arc<Agent>,
    ledger: LedgerDelegate,
    journal: Arc<dyn JournalStore>,
    config: CoordinatorConfig,
}

impl LedgerflowClient {
    pub fn new(
        agent: Arc<Agent>,
        ledger_principal: Principal,
        journal: Arc<dyn JournalStore>,
    ) -> Self {
        Self {
            ledger: LedgerDelegate::new(Arc::clone(&agent), ledger_principal),
            agent,
            journal,
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ledger(&self) -> &LedgerDelegate {
        &self.ledger
    }

    /// Delegate bound to one aggregator instance.
    pub fn aggregator(&self, principal: Principal) -> AggregatorDelegate {
        AggregatorDelegate::new(Arc::clone(&self.agent), principal)
    }

    /// Atomically swap the signing identity for every delegate created from
    /// this client.
    pub fn set_identity(&self, identity: Arc<dyn Identity>) {
        self.agent.replace_identity(identity);
    }

    /// Weighted random pick over the ledger's published aggregator
    /// directory.
    pub async fn pick_aggregator(&self) -> Result<Principal> {
        let directory = self.ledger.aggregators().await?;
        pick_weighted(&mut rand::thread_rng(), &directory)
            .ok_or_else(|| CallError::transient("no available aggregator"))
    }

    /// Submit a transfer and track it to settlement. Journals under
    /// `tx_history_<local_id>`; an existing resumable entry for the id is
    /// picked up instead of starting over.
    pub async fn simple_transfer(
        &self,
        local_id: u64,
        transfer: TransferRequest,
    ) -> std::result::Result<TransferTracker, TransferError> {
        let entry = match TxHistoryEntry::load(self.journal.as_ref(), local_id).await? {
            Some(existing) if existing.resumable() => {
                debug!(local_id, "resuming journaled transfer");
                existing
            }
            _ => TxHistoryEntry::new(local_id, transfer),
        };
        Ok(self.track(entry))
    }

    /// Transmit a transfer without awaiting completion: picks an
    /// aggregator, prepares the submission, and journals the request id.
    /// Resume later with [`Self::resume_transfer`].
    pub async fn prepare_simple_transfer(
        &self,
        local_id: u64,
        transfer: TransferRequest,
    ) -> std::result::Result<RequestId, TransferError> {
        let directory = self.ledger.aggregators().await.map_err(TransferError::Call)?;
        let aggregator = pick_weighted(&mut rand::thread_rng(), &directory)
            .ok_or(TransferError::NoAggregator)?;
        let mut entry = TxHistoryEntry::new(local_id, transfer);
        entry.aggregator = Some(aggregator);
        let prepared = self
            .aggregator(aggregator)
            .prepare_submit(entry.transfer.to_tx_input())
            .await
            .map_err(TransferError::Call)?;
        entry.request_id = Some(prepared.request_id());
        entry.save(self.journal.as_ref()).await?;
        Ok(prepared.request_id())
    }

    /// Resume a journaled transfer. `None` when nothing resumable is
    /// journaled under the id.
    pub async fn resume_transfer(
        &self,
        local_id: u64,
    ) -> std::result::Result<Option<TransferTracker>, TransferError> {
        match TxHistoryEntry::load(self.journal.as_ref(), local_id).await? {
            Some(entry) if entry.resumable() => Ok(Some(self.track(entry))),
            _ => Ok(None),
        }
    }

    fn track(&self, entry: TxHistoryEntry) -> TransferTracker {
        let local_id = entry.local_id;
        let backend = Arc::new(AgentBackend {
            ledger: self.ledger.clone(),
            agent: Arc::clone(&self.agent),
        });
        let (coordinator, receiver, cancel) = TransferCoordinator::new(
            backend,
            Arc::clone(&self.journal),
            entry,
            self.config.clone(),
        );
        let task = tokio::spawn(coordinator.run());
        TransferTracker {
            local_id,
            events: UnboundedReceiverStream::new(receiver),
            cancel,
            task,
        }
    }
}

/// Production coordinator backend over the typed delegates.
struct AgentBackend {
    ledger: LedgerDelegate,
    agent: Arc<Agent>,
}

impl AgentBackend {
    fn aggregator(&self, principal: Principal) -> AggregatorDelegate {
        AggregatorDelegate::new(Arc::clone(&self.agent), principal)
    }
}

#[async_trait]
impl CoordinatorBackend for AgentBackend {
    async fn aggregators(&self) -> Result<Vec<(Principal, Nat)>> {
        self.ledger.aggregators().await
    }

    async fn prepare(&self, aggregator: Principal, tx: TxInput) -> Result<RequestId> {
        let prepared = self.aggregator(aggregator).prepare_submit(tx).await?;
        Ok(prepared.request_id())
    }

    async fn commit(
        &self,
        aggregator: Principal,
        request_id: RequestId,
    ) -> Result<(GlobalId, Timestamp)> {
        let delegate = self.aggregator(aggregator);
        let prepared = delegate.resume_submit(request_id);
        delegate.commit_single(prepared).await
    }

    async fn aggregator_status(
        &self,
        aggregator: Principal,
        gid: GlobalId,
    ) -> Result<(TxAggStatus, Timestamp)> {
        self.aggregator(aggregator).tx_status_timestamped(gid).await
    }

    async fn ledger_status(&self, gid: GlobalId) -> Result<(TxLedgerStatus, Timestamp)> {
        self.ledger.tx_status_timestamped(gid).await
    }
}
