//! Status variants reported by the aggregator and ledger services.

use crate::Timestamp;
use candid::{CandidType, Nat, Principal};
use serde::{Deserialize, Serialize};

/// Per-gid status as reported by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum TxAggStatus {
    /// Still sitting in the aggregator queue at the given position.
    #[serde(rename = "queued")]
    Queued(Nat),
    /// Picked up into a batch, not yet acknowledged by the ledger.
    #[serde(rename = "pending")]
    Pending,
    /// No longer tracked by the aggregator; the payload is the ledger batch
    /// timestamp the aggregator last observed when it forwarded the batch.
    #[serde(rename = "other")]
    Other(Timestamp),
}

/// Per-gid status as reported by the authoritative ledger.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum TxLedgerStatus {
    /// The ledger discarded the transaction. Terminal and fatal.
    #[serde(rename = "dropped")]
    Dropped,
    /// The ledger expects the transaction but has not processed it yet.
    #[serde(rename = "awaited")]
    Awaited,
    /// Terminal success, with the settlement result when available.
    #[serde(rename = "processed")]
    Processed(Option<TxResult>),
}

/// Settlement outcome of a processed transaction.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum TxResult {
    #[serde(rename = "success")]
    Success(TxOutput),
    #[serde(rename = "failure")]
    Failure(ProcessingError),
}

#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum TxOutput {
    #[serde(rename = "ftTransfer")]
    FtTransfer { amount: Nat, fee: Nat },
}

#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum ProcessingError {
    #[serde(rename = "ftTransfer")]
    FtTransfer(FtTransferError),
}

#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum FtTransferError {
    DeletedVirtualAccount,
    InvalidArguments(String),
    InsufficientFunds,
}

/// Static description of one fungible-token asset on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub struct FtInfo {
    pub controller: Principal,
    pub decimals: u8,
    pub description: String,
}

/// Where a ledger stream originates.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum StreamSource {
    #[serde(rename = "internal")]
    Internal,
    #[serde(rename = "aggregator")]
    Aggregator(Principal),
}

/// Read-only snapshot of one ledger stream. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub struct StreamStatus {
    pub closed: bool,
    pub source: StreamSource,
    pub length: Nat,
    #[serde(rename = "lastActive")]
    pub last_active: Timestamp,
}
