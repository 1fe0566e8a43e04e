//! Crash-safe persistence of in-flight transfers.
//!
//! The coordinator writes one [`TxHistoryEntry`] per transfer under the key
//! `tx_history_<local_id>` and is the only writer; callers may read entries
//! and may delete those whose last seen status is the terminal `processed`.
//! Everything else is resumable.

use async_trait::async_trait;
use ledgerflow_core::{GlobalId, Principal, RequestId, Timestamp, TransferRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key prefix of all journal records owned by this crate.
pub const TX_HISTORY_PREFIX: &str = "tx_history_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("journal: {0}")]
pub struct JournalError(pub String);

pub type JournalResult<T> = std::result::Result<T, JournalError>;

/// Caller-provided key-value store backing the journal. Implementations
/// must persist writes before returning.
#[async_trait]
pub trait JournalStore: Send + Sync {
    async fn get(&self, key: &str) -> JournalResult<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> JournalResult<()>;
    async fn delete(&self, key: &str) -> JournalResult<()>;
}

/// Coarse status key persisted with each journal entry, mirroring the
/// update stream the coordinator emits. Keys are ordered by progress; the
/// journal only ever moves forward along this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransferStatusKey {
    #[serde(rename = "pickAggregator")]
    PickingAggregator,
    #[serde(rename = "submitting")]
    Submitting,
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "forwarding")]
    Forwarding,
    #[serde(rename = "forwarded")]
    Forwarded,
    #[serde(rename = "processed")]
    Processed,
}

/// One journaled transfer. The fields fill in as the submission advances;
/// a populated `request_id` without a `gid` marks a crash mid-submission,
/// resumable via `commit` without re-preparing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHistoryEntry {
    pub local_id: u64,
    pub transfer: TransferRequest,
    pub last_seen_status: TransferStatusKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<GlobalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TxHistoryEntry {
    pub fn new(local_id: u64, transfer: TransferRequest) -> Self {
        Self {
            local_id,
            transfer,
            last_seen_status: TransferStatusKey::PickingAggregator,
            aggregator: None,
            request_id: None,
            gid: None,
            submitted_at: None,
            last_error: None,
        }
    }

    pub fn key(&self) -> String {
        journal_key(self.local_id)
    }

    /// Terminal entries are safe for the caller to delete; everything else
    /// must be resumed.
    pub fn resumable(&self) -> bool {
        self.last_seen_status != TransferStatusKey::Processed
    }

    pub fn encode(&self) -> JournalResult<String> {
        serde_json::to_string(self).map_err(|e| JournalError(e.to_string()))
    }

    pub fn decode(raw: &str) -> JournalResult<Self> {
        serde_json::from_str(raw).map_err(|e| JournalError(e.to_string()))
    }

    /// Persist this entry under its key.
    pub async fn save(&self, store: &dyn JournalStore) -> JournalResult<()> {
        store.put(&self.key(), &self.encode()?).await
    }

    /// Load an entry by local id, if one was journaled.
    pub async fn load(store: &dyn JournalStore, local_id: u64) -> JournalResult<Option<Self>> {
        match store.get(&journal_key(local_id)).await? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }
}

pub fn journal_key(local_id: u64) -> String {
    format!("{TX_HISTORY_PREFIX}{local_id}")
}
