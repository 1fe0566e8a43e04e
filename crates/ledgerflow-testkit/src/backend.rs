//! A fully scriptable coordinator backend.

use async_trait::async_trait;
use ledgerflow_client::CoordinatorBackend;
use ledgerflow_core::{
    CallError, GlobalId, Nat, Principal, RequestId, Result, Timestamp, TxAggStatus, TxInput,
    TxLedgerStatus,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

struct ScriptedRead<S> {
    delay: Duration,
    result: Result<(S, Timestamp)>,
}

fn pop_sticky<S: Clone>(script: &Mutex<VecDeque<ScriptedRead<S>>>) -> Result<(S, Timestamp, Duration)> {
    let mut script = script.lock().unwrap();
    let read = if script.len() > 1 {
        script.pop_front().unwrap()
    } else {
        // The last scripted answer repeats for every further poll.
        let last = script.front().ok_or_else(|| CallError::transient("status script exhausted"))?;
        ScriptedRead { delay: last.delay, result: last.result.clone() }
    };
    let (status, timestamp) = read.result?;
    Ok((status, timestamp, read.delay))
}

/// Scripted [`CoordinatorBackend`]. Status reads answer from per-source
/// queues whose last entry is sticky; submissions hand out a fixed request
/// id and gid and count their invocations.
pub struct ScriptedBackend {
    aggregators: Vec<(Principal, Nat)>,
    request_id: RequestId,
    gid: GlobalId,
    submitted_at: Timestamp,
    agg_script: Mutex<VecDeque<ScriptedRead<TxAggStatus>>>,
    ledger_script: Mutex<VecDeque<ScriptedRead<TxLedgerStatus>>>,
    prepares: AtomicU32,
    commits: AtomicU32,
    committed: Mutex<Option<RequestId>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            aggregators: vec![(Principal::from_slice(&[0xaa; 8]), Nat::from(1u64))],
            request_id: RequestId([7u8; 32]),
            gid: GlobalId::new(1u64, 42u64),
            submitted_at: Timestamp::from_nanos(1_000),
            agg_script: Mutex::default(),
            ledger_script: Mutex::default(),
            prepares: AtomicU32::new(0),
            commits: AtomicU32::new(0),
            committed: Mutex::new(None),
        }
    }

    pub fn with_aggregators(mut self, aggregators: Vec<(Principal, Nat)>) -> Self {
        self.aggregators = aggregators;
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_gid(mut self, gid: GlobalId) -> Self {
        self.gid = gid;
        self
    }

    pub fn with_submitted_at(mut self, submitted_at: Timestamp) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    /// Script the next aggregator status answer, with its certified time.
    pub fn agg_ok(self, status: TxAggStatus, certified_nanos: u128) -> Self {
        self.agg_script.lock().unwrap().push_back(ScriptedRead {
            delay: Duration::ZERO,
            result: Ok((status, Timestamp::from_nanos(certified_nanos))),
        });
        self
    }

    /// Script the next aggregator status read to fail.
    pub fn agg_err(self, error: CallError) -> Self {
        self.agg_script.lock().unwrap().push_back(ScriptedRead {
            delay: Duration::ZERO,
            result: Err(error),
        });
        self
    }

    pub fn ledger_ok(self, status: TxLedgerStatus, certified_nanos: u128) -> Self {
        self.ledger_script.lock().unwrap().push_back(ScriptedRead {
            delay: Duration::ZERO,
            result: Ok((status, Timestamp::from_nanos(certified_nanos))),
        });
        self
    }

    pub fn ledger_err(self, error: CallError) -> Self {
        self.ledger_script.lock().unwrap().push_back(ScriptedRead {
            delay: Duration::ZERO,
            result: Err(error),
        });
        self
    }

    /// Script a ledger answer that only arrives after `delay`, for
    /// exercising the per-query wall-clock cap.
    pub fn ledger_ok_delayed(
        self,
        delay: Duration,
        status: TxLedgerStatus,
        certified_nanos: u128,
    ) -> Self {
        self.ledger_script.lock().unwrap().push_back(ScriptedRead {
            delay,
            result: Ok((status, Timestamp::from_nanos(certified_nanos))),
        });
        self
    }

    pub fn prepare_count(&self) -> u32 {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    /// The request id the coordinator last committed, if any.
    pub fn committed_request_id(&self) -> Option<RequestId> {
        *self.committed.lock().unwrap()
    }
}

#[async_trait]
impl CoordinatorBackend for ScriptedBackend {
    async fn aggregators(&self) -> Result<Vec<(Principal, Nat)>> {
        Ok(self.aggregators.clone())
    }

    async fn prepare(&self, _aggregator: Principal, _tx: TxInput) -> Result<RequestId> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(self.request_id)
    }

    async fn commit(
        &self,
        _aggregator: Principal,
        request_id: RequestId,
    ) -> Result<(GlobalId, Timestamp)> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        *self.committed.lock().unwrap() = Some(request_id);
        Ok((self.gid.clone(), self.submitted_at.clone()))
    }

    async fn aggregator_status(
        &self,
        _aggregator: Principal,
        _gid: GlobalId,
    ) -> Result<(TxAggStatus, Timestamp)> {
        let (status, timestamp, delay) = pop_sticky(&self.agg_script)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok((status, timestamp))
    }

    async fn ledger_status(&self, _gid: GlobalId) -> Result<(TxLedgerStatus, Timestamp)> {
        let (status, timestamp, delay) = pop_sticky(&self.ledger_script)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok((status, timestamp))
    }
}
