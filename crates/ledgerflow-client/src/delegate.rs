//! The generic service facade.
//!
//! A [`Delegate`] binds an agent to one remote service and routes typed
//! methods through the right path: queries go through the interceptor chain
//! (classification + retry, read-only calls are safe to repeat), updates go
//! out exactly once and are driven to completion by certificate polling.

use candid::utils::ArgumentEncoder;
use candid::CandidType;
use futures::FutureExt;
use ledgerflow_agent::{
    dispatch_update, prepare_update, resume_update, Agent, CallMode, ClassifyInterceptor,
    Identity, InterceptorChain, MethodSpec, PreparedUpdate, RetryConfig, RetryInterceptor,
    RetryObserver,
};
use ledgerflow_core::{
    CallError, ErrorKind, Principal, RequestId, Result, ServiceResult, Timestamp,
};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

/// Typed facade over one remote service instance.
#[derive(Clone)]
pub struct Delegate {
    agent: Arc<Agent>,
    canister: Principal,
    chain: InterceptorChain,
}

impl Delegate {
    /// Bind an agent to a service with the default retry policy for
    /// queries.
    pub fn new(agent: Arc<Agent>, canister: Principal) -> Self {
        Self::with_retry(agent, canister, RetryConfig::default(), None)
    }

    pub fn with_retry(
        agent: Arc<Agent>,
        canister: Principal,
        retry: RetryConfig,
        observer: Option<RetryObserver>,
    ) -> Self {
        let chain = InterceptorChain::new(vec![
            Arc::new(ClassifyInterceptor),
            Arc::new(RetryInterceptor::new(retry, observer)),
        ]);
        Self { agent, canister, chain }
    }

    pub fn canister(&self) -> Principal {
        self.canister
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Atomically swap the signing identity for all subsequent calls made
    /// through this delegate's agent.
    pub fn replace_identity(&self, identity: Arc<dyn Identity>) {
        self.agent.replace_identity(identity);
    }

    /// Retryable verified read, returning the decoded value together with
    /// the verified server timestamp.
    pub async fn query_timestamped<A, R>(
        &self,
        spec: &'static MethodSpec,
        args: A,
    ) -> Result<(R, Timestamp)>
    where
        A: ArgumentEncoder,
        R: CandidType + DeserializeOwned,
    {
        debug_assert!(spec.mode == CallMode::Query, "{} is not a query", spec.name);
        let arg = candid::encode_args(args).map_err(|e| {
            CallError::transient(format!("candid encoding for `{}` failed: {e}", spec.name))
        })?;
        let agent = Arc::clone(&self.agent);
        let canister = self.canister;
        let reply = self
            .chain
            .execute(Arc::new(move || {
                let agent = Arc::clone(&agent);
                let arg = arg.clone();
                async move { agent.query_raw(&canister, spec.name, arg).await }.boxed()
            }))
            .await?;
        let value = candid::decode_one(&reply.bytes).map_err(|e| {
            CallError::transient(format!("candid decoding for `{}` failed: {e}", spec.name))
        })?;
        Ok((value, reply.timestamp))
    }

    /// Retryable verified read, timestamp dropped.
    pub async fn query<A, R>(&self, spec: &'static MethodSpec, args: A) -> Result<R>
    where
        A: ArgumentEncoder,
        R: CandidType + DeserializeOwned,
    {
        Ok(self.query_timestamped(spec, args).await?.0)
    }

    /// Single-attempt mutating call, driven to its certified result.
    pub async fn update_timestamped<A, R>(
        &self,
        spec: &'static MethodSpec,
        args: A,
    ) -> Result<(R, Timestamp)>
    where
        A: ArgumentEncoder,
        R: CandidType + DeserializeOwned,
    {
        dispatch_update(&self.agent, &self.canister, spec, args).await
    }

    pub async fn update<A, R>(&self, spec: &'static MethodSpec, args: A) -> Result<R>
    where
        A: ArgumentEncoder,
        R: CandidType + DeserializeOwned,
    {
        Ok(self.update_timestamped(spec, args).await?.0)
    }

    /// Transmit an update now; the returned handle commits later. The
    /// request id is available immediately for journaling.
    pub async fn prepare<A, R>(
        &self,
        spec: &'static MethodSpec,
        args: A,
    ) -> Result<PreparedUpdate<R>>
    where
        A: ArgumentEncoder,
        R: CandidType + DeserializeOwned,
    {
        prepare_update(&self.agent, &self.canister, spec, args).await
    }

    /// Rebuild a prepared update from a persisted request id without
    /// retransmitting the envelope.
    pub fn resume<R>(&self, spec: &'static MethodSpec, request_id: RequestId) -> PreparedUpdate<R>
    where
        R: CandidType + DeserializeOwned,
    {
        resume_update(Arc::clone(&self.agent), self.canister, spec, request_id)
    }
}

/// Unwrap the `{ok | err}` shape every mutating service method returns,
/// turning the `err` arm into a classified application reject that carries
/// the raw payload and the verified timestamp of the response.
pub fn unwrap_res<O, E: fmt::Debug>(result: ServiceResult<O, E>, timestamp: Timestamp) -> Result<O> {
    match result {
        ServiceResult::Ok(value) => Ok(value),
        ServiceResult::Err(payload) => Err(CallError::new(
            ErrorKind::ApplicationReject,
            format!("{payload:?}"),
        )
        .with_timestamp(timestamp)),
    }
}

/// Collapse a zero-or-one response list. Absence is a valid answer, never an
/// error.
pub fn unwrap_opt<T>(items: Vec<T>) -> Option<T> {
    items.into_iter().next()
}
