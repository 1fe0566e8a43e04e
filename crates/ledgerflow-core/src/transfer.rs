//! Transfer inputs and the generic service result/option wire shapes.

use candid::{CandidType, Nat, Principal};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Reference to one side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum AccountRef {
    /// A subaccount owned by the caller.
    #[serde(rename = "sub")]
    Sub(Nat),
    /// A virtual account: `(access owner, virtual account id)`.
    #[serde(rename = "vir")]
    Vir(Principal, Nat),
    /// The minting account.
    #[serde(rename = "mint")]
    Mint,
}

/// Transfer amount: an exact value or "everything available".
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum Amount {
    #[serde(rename = "amount")]
    Exact(Nat),
    #[serde(rename = "max")]
    Max,
}

/// Which side of the transfer pays the ledger fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum FeeMode {
    #[serde(rename = "senderPays")]
    SenderPays,
    #[serde(rename = "receiverPays")]
    ReceiverPays,
}

/// A fully-specified transfer. Immutable; together with the chosen
/// aggregator this determines the entire effect of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: AccountRef,
    pub to: AccountRef,
    pub asset: Nat,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_mode: Option<FeeMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memo: Vec<ByteBuf>,
}

impl TransferRequest {
    /// Wire-level input variant submitted to the aggregator.
    pub fn to_tx_input(&self) -> TxInput {
        TxInput::FtTransfer {
            from: self.from.clone(),
            to: self.to.clone(),
            asset: self.asset.clone(),
            amount: self.amount.clone(),
            fee_mode: self.fee_mode,
            memo: self.memo.clone(),
        }
    }
}

/// Aggregator submission input.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Serialize, Deserialize)]
pub enum TxInput {
    #[serde(rename = "ftTransfer")]
    FtTransfer {
        from: AccountRef,
        to: AccountRef,
        asset: Nat,
        amount: Amount,
        #[serde(rename = "feeMode")]
        fee_mode: Option<FeeMode>,
        memo: Vec<ByteBuf>,
    },
}

/// The two-variant `{ok | err}` shape every mutating service method returns.
#[derive(Debug, Clone, PartialEq, Eq, CandidType, Deserialize)]
pub enum ServiceResult<O, E> {
    #[serde(rename = "ok")]
    Ok(O),
    #[serde(rename = "err")]
    Err(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransferRequest {
        TransferRequest {
            from: AccountRef::Sub(Nat::from(1u64)),
            to: AccountRef::Vir(Principal::anonymous(), Nat::from(9u64)),
            asset: Nat::from(2u64),
            amount: Amount::Exact(Nat::from(500u64)),
            fee_mode: Some(FeeMode::SenderPays),
            memo: vec![ByteBuf::from(vec![1, 2, 3])],
        }
    }

    #[test]
    fn transfer_request_json_round_trip() {
        let req = sample();
        let json = serde_json::to_string(&req).unwrap();
        let back: TransferRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn tx_input_carries_all_fields() {
        let req = sample();
        let TxInput::FtTransfer { from, amount, memo, .. } = req.to_tx_input();
        assert_eq!(from, req.from);
        assert_eq!(amount, req.amount);
        assert_eq!(memo.len(), 1);
    }
}
