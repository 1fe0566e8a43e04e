//! Typed surface of the authoritative ledger service.

use crate::delegate::{unwrap_opt, unwrap_res, Delegate};
use ledgerflow_agent::{Agent, MethodSpec};
use ledgerflow_core::{
    AccountManagementError, AccountState, AccountType, BalanceUpdate, CallError, FtInfo, GlobalId,
    IdSelector, LedgerState, Nat, OpenedIds, Principal, Result, ServiceResult, StateSelector,
    StreamStatus, Timestamp, TxLedgerStatus, VirtualAccountOpening, VirtualAccountUpdate,
};
use std::sync::Arc;

const AGGREGATORS: MethodSpec = MethodSpec::query("aggregators");
const TX_STATUS: MethodSpec = MethodSpec::query("txStatus");
const STREAM_STATUS: MethodSpec = MethodSpec::query("streamStatus");
const FEE_RATIO: MethodSpec = MethodSpec::query("feeRatio");
const FT_INFO: MethodSpec = MethodSpec::query("ftInfo");
const N_STREAMS: MethodSpec = MethodSpec::query("nStreams");
const AGGREGATOR_PRINCIPAL: MethodSpec = MethodSpec::query("aggregatorPrincipal");
const ACCOUNT_INFO: MethodSpec = MethodSpec::query("accountInfo");
const N_ACCOUNTS: MethodSpec = MethodSpec::query("nAccounts");
const N_VIRTUAL_ACCOUNTS: MethodSpec = MethodSpec::query("nVirtualAccounts");
const VIRTUAL_ACCOUNT_INFO: MethodSpec = MethodSpec::query("virtualAccountInfo");
const STATE: MethodSpec = MethodSpec::query("state");
const OPEN_VIRTUAL_ACCOUNTS: MethodSpec = MethodSpec::update("openVirtualAccounts");
const UPDATE_VIRTUAL_ACCOUNTS: MethodSpec = MethodSpec::update("updateVirtualAccounts");
const DELETE_VIRTUAL_ACCOUNTS: MethodSpec = MethodSpec::update("deleteVirtualAccounts");

/// Delegate for the ledger. Reads are verified queries going through the
/// retry chain; the account-management mutators go out exactly once.
#[derive(Clone)]
pub struct LedgerDelegate {
    delegate: Delegate,
}

impl LedgerDelegate {
    pub fn new(agent: Arc<Agent>, canister: Principal) -> Self {
        Self { delegate: Delegate::new(agent, canister) }
    }

    pub fn principal(&self) -> Principal {
        self.delegate.canister()
    }

    pub fn delegate(&self) -> &Delegate {
        &self.delegate
    }

    /// The published submission target directory: `(principal, priority
    /// weight)` per aggregator. Weights drive the client's random pick.
    pub async fn aggregators(&self) -> Result<Vec<(Principal, Nat)>> {
        self.delegate.query(&AGGREGATORS, ()).await
    }

    /// Batched per-gid settlement status.
    pub async fn tx_status(&self, gids: Vec<GlobalId>) -> Result<Vec<TxLedgerStatus>> {
        self.delegate.query(&TX_STATUS, (gids,)).await
    }

    /// Single-gid status with the certified timestamp of the answer.
    pub async fn tx_status_timestamped(
        &self,
        gid: GlobalId,
    ) -> Result<(TxLedgerStatus, Timestamp)> {
        let (statuses, timestamp): (Vec<TxLedgerStatus>, Timestamp) =
            self.delegate.query_timestamped(&TX_STATUS, (vec![gid],)).await?;
        let status = unwrap_opt(statuses)
            .ok_or_else(|| CallError::transient("ledger returned no status for the gid"))?;
        Ok((status, timestamp))
    }

    pub async fn stream_status(&self, selector: IdSelector) -> Result<Vec<(Nat, StreamStatus)>> {
        self.delegate.query(&STREAM_STATUS, (selector,)).await
    }

    /// Current fee numerator the ledger charges per transfer.
    pub async fn fee_ratio(&self) -> Result<Nat> {
        self.delegate.query(&FEE_RATIO, ()).await
    }

    pub async fn ft_info(&self, selector: IdSelector) -> Result<Vec<(Nat, FtInfo)>> {
        self.delegate.query(&FT_INFO, (selector,)).await
    }

    pub async fn n_streams(&self) -> Result<Nat> {
        self.delegate.query(&N_STREAMS, ()).await
    }

    /// The aggregator a stream originates from, if any; internal streams
    /// have none.
    pub async fn aggregator_principal(&self, stream_id: Nat) -> Result<Option<Principal>> {
        self.delegate.query(&AGGREGATOR_PRINCIPAL, (stream_id,)).await
    }

    /// Asset bindings of the caller's subaccounts.
    pub async fn account_info(&self, selector: IdSelector) -> Result<Vec<(Nat, AccountType)>> {
        self.delegate.query(&ACCOUNT_INFO, (selector,)).await
    }

    pub async fn n_accounts(&self) -> Result<Nat> {
        self.delegate.query(&N_ACCOUNTS, ()).await
    }

    pub async fn n_virtual_accounts(&self) -> Result<Nat> {
        self.delegate.query(&N_VIRTUAL_ACCOUNTS, ()).await
    }

    /// Asset binding and access principal per virtual account; deleted ones
    /// read as `None`.
    pub async fn virtual_account_info(
        &self,
        selector: IdSelector,
    ) -> Result<Vec<(Nat, Option<(AccountType, Principal)>)>> {
        self.delegate.query(&VIRTUAL_ACCOUNT_INFO, (selector,)).await
    }

    /// Consistent snapshot of the selected balances and supplies.
    pub async fn state(&self, selector: StateSelector) -> Result<LedgerState> {
        self.delegate.query(&STATE, (selector,)).await
    }

    /// Open a batch of virtual accounts; ids are assigned contiguously from
    /// the returned `first`.
    pub async fn open_virtual_accounts(
        &self,
        openings: Vec<VirtualAccountOpening>,
    ) -> Result<OpenedIds> {
        let args: Vec<_> = openings.into_iter().map(VirtualAccountOpening::into_args).collect();
        let (result, timestamp): (ServiceResult<OpenedIds, AccountManagementError>, Timestamp) =
            self.delegate.update_timestamped(&OPEN_VIRTUAL_ACCOUNTS, (args,)).await?;
        unwrap_res(result, timestamp)
    }

    pub async fn open_virtual_account(&self, opening: VirtualAccountOpening) -> Result<Nat> {
        Ok(self.open_virtual_accounts(vec![opening]).await?.first)
    }

    /// Apply partial updates to a batch of virtual accounts, returning the
    /// post-update balance and delta per account.
    pub async fn update_virtual_accounts(
        &self,
        updates: Vec<(Nat, VirtualAccountUpdate)>,
    ) -> Result<Vec<BalanceUpdate>> {
        let (result, timestamp): (
            ServiceResult<Vec<BalanceUpdate>, AccountManagementError>,
            Timestamp,
        ) = self.delegate.update_timestamped(&UPDATE_VIRTUAL_ACCOUNTS, (updates,)).await?;
        unwrap_res(result, timestamp)
    }

    pub async fn update_virtual_account(
        &self,
        vid: Nat,
        update: VirtualAccountUpdate,
    ) -> Result<BalanceUpdate> {
        let updated = self.update_virtual_accounts(vec![(vid, update)]).await?;
        unwrap_opt(updated)
            .ok_or_else(|| CallError::transient("ledger returned no balance for the update"))
    }

    /// Delete virtual accounts, returning each one's final balance.
    pub async fn delete_virtual_accounts(&self, vids: Vec<Nat>) -> Result<Vec<AccountState>> {
        let (result, timestamp): (
            ServiceResult<Vec<AccountState>, AccountManagementError>,
            Timestamp,
        ) = self.delegate.update_timestamped(&DELETE_VIRTUAL_ACCOUNTS, (vids,)).await?;
        unwrap_res(result, timestamp)
    }
}
