//! Typed surface of one aggregator service.

use crate::delegate::{unwrap_opt, unwrap_res, Delegate};
use candid::CandidType;
use ledgerflow_agent::{Agent, MethodSpec, PreparedUpdate};
use ledgerflow_core::{
    CallError, GlobalId, Nat, Principal, RequestId, Result, ServiceResult, Timestamp, TxAggStatus,
    TxInput,
};
use serde::Deserialize;
use std::sync::Arc;

const SUBMIT_AND_EXECUTE: MethodSpec = MethodSpec::update("submitAndExecute");
const TX_STATUS: MethodSpec = MethodSpec::query("txStatus");
const STREAM_STATUS: MethodSpec = MethodSpec::query("streamStatus");

/// Why the aggregator refused a submission.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Deserialize)]
pub enum SubmitError {
    NotRunning,
    Invalid(String),
}

/// One submission slot in the batched response.
pub type SubmitResult = ServiceResult<GlobalId, SubmitError>;

/// Delegate for one aggregator instance. Submissions are updates and go out
/// exactly once; status reads are retryable verified queries.
#[derive(Clone)]
pub struct AggregatorDelegate {
    delegate: Delegate,
}

impl AggregatorDelegate {
    pub fn new(agent: Arc<Agent>, canister: Principal) -> Self {
        Self { delegate: Delegate::new(agent, canister) }
    }

    pub fn principal(&self) -> Principal {
        self.delegate.canister()
    }

    /// Submit a batch and drive it to the assigned gids.
    pub async fn submit_and_execute(
        &self,
        txs: Vec<TxInput>,
    ) -> Result<(Vec<SubmitResult>, Timestamp)> {
        self.delegate.update_timestamped(&SUBMIT_AND_EXECUTE, (txs,)).await
    }

    /// Single-transfer convenience over the batched submission.
    pub async fn submit_and_execute_single(&self, tx: TxInput) -> Result<(GlobalId, Timestamp)> {
        let (results, timestamp) = self.submit_and_execute(vec![tx]).await?;
        let result = unwrap_opt(results)
            .ok_or_else(|| CallError::transient("aggregator returned no submission slot"))?;
        Ok((unwrap_res(result, timestamp.clone())?, timestamp))
    }

    /// Transmit a single-transfer submission without awaiting completion.
    /// The request id is available for journaling before `commit`.
    pub async fn prepare_submit(&self, tx: TxInput) -> Result<PreparedUpdate<Vec<SubmitResult>>> {
        self.delegate.prepare(&SUBMIT_AND_EXECUTE, (vec![tx],)).await
    }

    /// Rebuild a transmitted submission from its journaled request id.
    pub fn resume_submit(&self, request_id: RequestId) -> PreparedUpdate<Vec<SubmitResult>> {
        self.delegate.resume(&SUBMIT_AND_EXECUTE, request_id)
    }

    /// Drive a prepared or resumed single-transfer submission to its gid.
    pub async fn commit_single(
        &self,
        prepared: PreparedUpdate<Vec<SubmitResult>>,
    ) -> Result<(GlobalId, Timestamp)> {
        let (results, timestamp) = prepared.commit().await?;
        let result = unwrap_opt(results)
            .ok_or_else(|| CallError::transient("aggregator returned no submission slot"))?;
        Ok((unwrap_res(result, timestamp.clone())?, timestamp))
    }

    /// Batched per-gid queue status.
    pub async fn tx_status(&self, gids: Vec<GlobalId>) -> Result<Vec<TxAggStatus>> {
        self.delegate.query(&TX_STATUS, (gids,)).await
    }

    /// Single-gid status with the certified timestamp of the answer.
    pub async fn tx_status_timestamped(&self, gid: GlobalId) -> Result<(TxAggStatus, Timestamp)> {
        let (statuses, timestamp): (Vec<TxAggStatus>, Timestamp) =
            self.delegate.query_timestamped(&TX_STATUS, (vec![gid],)).await?;
        let status = unwrap_opt(statuses)
            .ok_or_else(|| CallError::transient("aggregator returned no status for the gid"))?;
        Ok((status, timestamp))
    }

    /// Stream id and current length per open stream.
    pub async fn stream_status(&self) -> Result<Vec<(Nat, Nat)>> {
        self.delegate.query(&STREAM_STATUS, ()).await
    }
}
