//! High-level ledgerflow client.
//!
//! Built on [`ledgerflow_agent`], this crate speaks the ledger and
//! aggregator service surfaces in typed form and owns the transfer
//! submission pipeline:
//!
//! - [`delegate`]: the generic facade mapping typed methods onto verified
//!   queries (retryable) and update calls (single attempt).
//! - [`ledger`] / [`aggregator`]: the two concrete service surfaces.
//! - [`journal`]: crash-safe persistence of in-flight transfers.
//! - [`coordinator`]: the submission state machine that drives one transfer
//!   from aggregator pick to ledger settlement, emitting status updates and
//!   surviving process restarts.
//! - [`client`]: the top-level handle tying the pieces together.

#![forbid(unsafe_code)]

pub mod aggregator;
pub mod client;
pub mod coordinator;
pub mod delegate;
pub mod journal;
pub mod ledger;

pub use aggregator::{AggregatorDelegate, SubmitError};
pub use client::{LedgerflowClient, TransferTracker};
pub use coordinator::{
    pick_weighted, CancelFlag, CoordinatorBackend, CoordinatorConfig, TransferCoordinator,
    TransferError, TransferEvent, TransferUpdate,
};
pub use delegate::{unwrap_opt, unwrap_res, Delegate};
pub use journal::{
    JournalError, JournalStore, TransferStatusKey, TxHistoryEntry, TX_HISTORY_PREFIX,
};
pub use ledger::LedgerDelegate;
