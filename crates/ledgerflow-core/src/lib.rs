//! Shared vocabulary types for the ledgerflow client stack.
//!
//! This crate holds the plain data types the rest of the workspace speaks in:
//! transaction identifiers, account references, transfer inputs, the status
//! variants reported by the aggregator and ledger services, and the error
//! taxonomy every call surfaces through. It performs no I/O and never depends
//! on the layers above it.
//!
//! Amounts, ids and timestamps cross the API boundary as [`candid::Nat`], an
//! arbitrary-precision natural. Nothing here truncates to a fixed-width
//! integer.

#![forbid(unsafe_code)]

mod accounts;
mod error;
mod ids;
mod status;
mod time;
mod transfer;

pub use accounts::{
    AccountManagementError, AccountState, AccountType, BalanceUpdate, IdSelector, IdSelectorItem,
    LedgerState, OpenedIds, StateSelector, StateUpdate, VirtualAccountOpening,
    VirtualAccountUpdate,
};
pub use error::{CallError, ErrorKind, RejectCode, RejectInfo, Result};
pub use ids::{GlobalId, RequestId};
pub use status::{
    FtInfo, FtTransferError, ProcessingError, StreamSource, StreamStatus, TxAggStatus,
    TxLedgerStatus, TxOutput, TxResult,
};
pub use time::Timestamp;
pub use transfer::{AccountRef, Amount, FeeMode, ServiceResult, TransferRequest, TxInput};

// Re-exported so downstream crates name one candid source of truth.
pub use candid::{Nat, Principal};
