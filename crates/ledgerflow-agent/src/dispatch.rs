//! Typed method dispatch.
//!
//! Each remote service declares its callable surface as `const`
//! [`MethodSpec`]s — name plus call mode — and the typed helpers here encode
//! arguments, route through the right transport path, and decode results.
//! There is no runtime lookup of methods by name; the table is resolved at
//! compile time by the delegate that owns it.

use crate::agent::{Agent, PreparedCall};
use candid::utils::ArgumentEncoder;
use candid::CandidType;
use ledgerflow_core::{CallError, Principal, RequestId, Result, Timestamp};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

/// Whether a method reads or mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Read-only; answered synchronously by a single node.
    Query,
    /// State-mutating; requires submission plus asynchronous polling.
    Update,
}

/// Descriptor of one remote method.
#[derive(Debug, Clone, Copy)]
pub struct MethodSpec {
    pub name: &'static str,
    pub mode: CallMode,
}

impl MethodSpec {
    pub const fn query(name: &'static str) -> Self {
        Self { name, mode: CallMode::Query }
    }

    pub const fn update(name: &'static str) -> Self {
        Self { name, mode: CallMode::Update }
    }
}

fn encode<A: ArgumentEncoder>(method: &str, args: A) -> Result<Vec<u8>> {
    candid::encode_args(args)
        .map_err(|e| CallError::transient(format!("candid encoding for `{method}` failed: {e}")))
}

fn decode<R: CandidType + DeserializeOwned>(method: &str, bytes: &[u8]) -> Result<R> {
    // A shape mismatch surfaces here as an error; partially-decoded data is
    // never returned.
    candid::decode_one(bytes)
        .map_err(|e| CallError::transient(format!("candid decoding for `{method}` failed: {e}")))
}

impl Agent {
    /// Verified read: encode, query, decode, return with the verified
    /// timestamp.
    pub async fn dispatch_query<A, R>(
        &self,
        canister: &Principal,
        spec: &MethodSpec,
        args: A,
    ) -> Result<(R, Timestamp)>
    where
        A: ArgumentEncoder,
        R: CandidType + DeserializeOwned,
    {
        debug_assert!(spec.mode == CallMode::Query, "{} is not a query", spec.name);
        let arg = encode(spec.name, args)?;
        let reply = self.query_raw(canister, spec.name, arg).await?;
        Ok((decode(spec.name, &reply.bytes)?, reply.timestamp))
    }
}

/// Typed view over a [`PreparedCall`]: commits to a decoded result.
pub struct PreparedUpdate<R> {
    inner: PreparedCall,
    method: &'static str,
    _result: PhantomData<fn() -> R>,
}

impl<R: CandidType + DeserializeOwned> PreparedUpdate<R> {
    pub fn request_id(&self) -> RequestId {
        self.inner.request_id()
    }

    pub async fn commit(self) -> Result<(R, Timestamp)> {
        let reply = self.inner.commit().await?;
        Ok((decode(self.method, &reply.bytes)?, reply.timestamp))
    }
}

/// Prepare a typed update: transmit now, commit later. Takes the agent by
/// `Arc` because the prepared call keeps it alive across the poll loop.
pub async fn prepare_update<A, R>(
    agent: &Arc<Agent>,
    canister: &Principal,
    spec: &'static MethodSpec,
    args: A,
) -> Result<PreparedUpdate<R>>
where
    A: ArgumentEncoder,
    R: CandidType + DeserializeOwned,
{
    debug_assert!(spec.mode == CallMode::Update, "{} is not an update", spec.name);
    let arg = encode(spec.name, args)?;
    let inner = agent.prepare(canister, spec.name, arg).await?;
    Ok(PreparedUpdate { inner, method: spec.name, _result: PhantomData })
}

/// One-shot typed update.
pub async fn dispatch_update<A, R>(
    agent: &Arc<Agent>,
    canister: &Principal,
    spec: &'static MethodSpec,
    args: A,
) -> Result<(R, Timestamp)>
where
    A: ArgumentEncoder,
    R: CandidType + DeserializeOwned,
{
    prepare_update(agent, canister, spec, args).await?.commit().await
}

/// Resume a typed update from a persisted request id without re-preparing.
pub fn resume_update<R: CandidType + DeserializeOwned>(
    agent: Arc<Agent>,
    canister: Principal,
    spec: &'static MethodSpec,
    request_id: RequestId,
) -> PreparedUpdate<R> {
    PreparedUpdate {
        inner: PreparedCall::resume(agent, canister, request_id),
        method: spec.name,
        _result: PhantomData,
    }
}
