//! Account-management vocabulary of the ledger service.
//!
//! Transfers move value between subaccounts and virtual accounts; the types
//! here describe those accounts and the selectors the ledger's batched
//! account queries take. Only fungible-token accounts exist today, so every
//! account variant has a single `ft` arm.

use crate::Timestamp;
use candid::{CandidType, Nat, Principal};
use serde::{Deserialize, Serialize};

/// Selects ledger entities by single id, inclusive range, or a union of
/// both. An open-ended range (`None` end) runs to the last assigned id.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum IdSelector {
    #[serde(rename = "id")]
    Id(Nat),
    #[serde(rename = "idRange")]
    IdRange(Nat, Option<Nat>),
    #[serde(rename = "cat")]
    Cat(Vec<IdSelectorItem>),
}

impl IdSelector {
    pub fn single(id: impl Into<Nat>) -> Self {
        Self::Id(id.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum IdSelectorItem {
    #[serde(rename = "id")]
    Id(Nat),
    #[serde(rename = "idRange")]
    IdRange(Nat, Option<Nat>),
}

/// The asset an account is bound to.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum AccountType {
    #[serde(rename = "ft")]
    Ft(Nat),
}

/// An account's balance.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum AccountState {
    #[serde(rename = "ft")]
    Ft(Nat),
}

/// A balance change applied by `updateVirtualAccounts`.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum StateUpdate {
    #[serde(rename = "ft_set")]
    FtSet(Nat),
    #[serde(rename = "ft_dec")]
    FtDec(Nat),
    #[serde(rename = "ft_inc")]
    FtInc(Nat),
}

/// One virtual account to open: the asset binding, the remote principal
/// allowed to move funds through it, the opening balance, the backing
/// subaccount the funds live on, and an optional expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualAccountOpening {
    pub account_type: AccountType,
    pub access_principal: Principal,
    pub state: AccountState,
    pub backing_account: Nat,
    pub expiration: Option<Timestamp>,
}

impl VirtualAccountOpening {
    /// The positional tuple the service method takes. A missing expiration
    /// goes out as zero, which the ledger reads as "never".
    pub fn into_args(self) -> (AccountType, Principal, AccountState, Nat, Timestamp) {
        (
            self.account_type,
            self.access_principal,
            self.state,
            self.backing_account,
            self.expiration.unwrap_or_else(|| Timestamp::from_nanos(0)),
        )
    }
}

/// Partial update of one virtual account; absent fields stay unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub struct VirtualAccountUpdate {
    #[serde(rename = "backingAccount")]
    pub backing_account: Option<Nat>,
    pub state: Option<StateUpdate>,
    pub expiration: Option<Timestamp>,
}

/// Batched opens assign contiguous ids starting at `first`.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub struct OpenedIds {
    pub first: Nat,
}

/// Post-update balance together with the applied delta.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum BalanceUpdate {
    #[serde(rename = "ft")]
    Ft(Nat, Nat),
}

/// Reject payloads of the account-management update methods.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum AccountManagementError {
    InvalidArguments(String),
    NoSpaceForAccount,
    DeletedVirtualAccount,
    InsufficientFunds,
}

/// Which slices of the ledger state to read. Absent selectors are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub struct StateSelector {
    #[serde(rename = "ftSupplies")]
    pub ft_supplies: Option<IdSelector>,
    #[serde(rename = "virtualAccounts")]
    pub virtual_accounts: Option<IdSelector>,
    pub accounts: Option<IdSelector>,
}

/// A consistent snapshot of the selected ledger state. Virtual accounts
/// read as `None` when deleted; live ones carry their balance, backing
/// subaccount and expiration.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(rename = "ftSupplies")]
    pub ft_supplies: Vec<(Nat, Nat)>,
    #[serde(rename = "virtualAccounts")]
    pub virtual_accounts: Vec<(Nat, Option<(AccountState, Nat, Timestamp)>)>,
    pub accounts: Vec<(Nat, AccountState)>,
}
