//! The agent: signed submission, verified queries, and the prepare/commit
//! split.
//!
//! `prepare` encodes, signs and transmits an update envelope synchronously
//! and hands back the request id before completion is known, so a caller can
//! persist the id and survive a crash between submission and confirmation.
//! `commit` then drives the certificate poll loop for that id. Re-committing
//! the same request id after a restart reaches the same outcome the original
//! call would have — the id is content-addressed, so the transport level is
//! idempotent.

use crate::identity::Identity;
use crate::poll::{ExponentialPoll, PollStrategy};
use crate::request::{EnvelopeContent, QueryResponseWire, ReadStateResponseWire};
use crate::transport::Transport;
use ed25519_dalek::VerifyingKey;
use ledgerflow_certified::{Certificate, CertificateError, LookupResult};
use ledgerflow_core::{CallError, Principal, RequestId, Result, Timestamp};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Reply bytes plus the verified server timestamp of the response.
#[derive(Debug, Clone)]
pub struct TimestampedReply {
    pub bytes: Vec<u8>,
    pub timestamp: Timestamp,
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// How far in the future outgoing envelopes expire.
    pub ingress_expiry: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { ingress_expiry: Duration::from_secs(5 * 60) }
    }
}

/// An immutable handle to one gateway, holding the transport, the trusted
/// root key of the target subnet, and the current signing identity.
///
/// Construction is explicit and fallible; there is no lazy initialization.
/// The identity is the only mutable piece and is swapped atomically.
pub struct Agent {
    transport: Arc<dyn Transport>,
    identity: RwLock<Arc<dyn Identity>>,
    root_key: VerifyingKey,
    config: AgentConfig,
    poll: Arc<dyn PollStrategy>,
}

impl Agent {
    /// Build an agent. Fails when the root key bytes are not a valid
    /// verifying key.
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: Arc<dyn Identity>,
        root_key: &[u8],
        config: AgentConfig,
    ) -> Result<Self> {
        let key_bytes: [u8; 32] = root_key
            .try_into()
            .map_err(|_| CallError::transient("root key is not 32 bytes"))?;
        let root_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CallError::transient(format!("root key is not a valid key: {e}")))?;
        Ok(Self {
            transport,
            identity: RwLock::new(identity),
            root_key,
            config,
            poll: Arc::new(ExponentialPoll::default()),
        })
    }

    /// Replace the default poll strategy.
    pub fn with_poll_strategy(mut self, poll: Arc<dyn PollStrategy>) -> Self {
        self.poll = poll;
        self
    }

    /// Atomically swap the signing identity used by all subsequent calls.
    pub fn replace_identity(&self, identity: Arc<dyn Identity>) {
        let mut slot = self.identity.write().unwrap_or_else(|e| e.into_inner());
        *slot = identity;
    }

    pub fn identity(&self) -> Arc<dyn Identity> {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn root_key(&self) -> &VerifyingKey {
        &self.root_key
    }

    fn ingress_expiry_nanos(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        (now + self.config.ingress_expiry).as_nanos() as u64
    }

    /// Single-round-trip read-only call. The timestamp comes from the
    /// response's node signature; a response without one carries time zero.
    pub async fn query_raw(
        &self,
        canister: &Principal,
        method: &str,
        arg: Vec<u8>,
    ) -> Result<TimestampedReply> {
        let identity = self.identity();
        let content = EnvelopeContent::Query {
            canister_id: *canister,
            method_name: method.to_string(),
            arg,
            sender: identity.principal(),
            ingress_expiry: self.ingress_expiry_nanos(),
        };
        let envelope = content.sign_and_encode(identity.as_ref())?;
        let response = self.transport.query(canister, envelope).await?;
        if response.status != 200 {
            return Err(CallError::from_http_status(
                response.status,
                format!(
                    "query `{method}` returned http {}: {}",
                    response.status,
                    String::from_utf8_lossy(&response.body)
                ),
            ));
        }
        let parsed: QueryResponseWire = serde_cbor::from_slice(&response.body)
            .map_err(|e| CallError::transient(format!("query response decoding failed: {e}")))?;
        let timestamp = parsed
            .signatures
            .first()
            .map(|sig| Timestamp::from_nanos(u128::from(sig.timestamp)))
            .unwrap_or_else(|| Timestamp::from_nanos(0));
        match parsed.status.as_str() {
            "replied" => {
                let reply = parsed.reply.ok_or_else(|| {
                    CallError::transient("query response replied without a reply field")
                })?;
                Ok(TimestampedReply { bytes: reply.arg.into_vec(), timestamp })
            }
            "rejected" => {
                let code = parsed.reject_code.unwrap_or_default();
                let message = parsed.reject_message.unwrap_or_default();
                warn!(method, code, "query rejected: {message}");
                Err(CallError::rejected(code, message).with_timestamp(timestamp))
            }
            other => Err(CallError::transient(format!(
                "query response has unknown status `{other}`"
            ))),
        }
    }

    /// Encode, sign and transmit an update envelope, returning a
    /// [`PreparedCall`] whose request id is known before completion.
    pub async fn prepare(
        self: &Arc<Self>,
        canister: &Principal,
        method: &str,
        arg: Vec<u8>,
    ) -> Result<PreparedCall> {
        let identity = self.identity();
        let content = EnvelopeContent::Call {
            canister_id: *canister,
            method_name: method.to_string(),
            arg,
            sender: identity.principal(),
            ingress_expiry: self.ingress_expiry_nanos(),
        };
        let request_id = content.request_id();
        let envelope = content.sign_and_encode(identity.as_ref())?;
        debug!(method, %request_id, "submitting update call");
        let response = self.transport.call(canister, envelope).await?;
        if !(response.status == 202 || response.status == 200) {
            return Err(CallError::from_http_status(
                response.status,
                format!(
                    "call `{method}` returned http {}: {}",
                    response.status,
                    String::from_utf8_lossy(&response.body)
                ),
            ));
        }
        Ok(PreparedCall {
            agent: Arc::clone(self),
            canister: *canister,
            request_id,
        })
    }

    /// One-shot update: `prepare` then `commit`.
    pub async fn call_raw(
        self: &Arc<Self>,
        canister: &Principal,
        method: &str,
        arg: Vec<u8>,
    ) -> Result<TimestampedReply> {
        self.prepare(canister, method, arg).await?.commit().await
    }

    /// Certificate lookup of a request's current state.
    async fn read_request_status(
        &self,
        canister: &Principal,
        request_id: &RequestId,
    ) -> Result<RequestPollState> {
        let identity = self.identity();
        let content = EnvelopeContent::ReadState {
            paths: vec![vec![b"request_status".to_vec(), request_id.as_bytes().to_vec()]],
            sender: identity.principal(),
            ingress_expiry: self.ingress_expiry_nanos(),
        };
        let envelope = content.sign_and_encode(identity.as_ref())?;
        let response = self.transport.read_state(canister, envelope).await?;
        if response.status != 200 {
            return Err(CallError::from_http_status(
                response.status,
                format!(
                    "read_state returned http {}: {}",
                    response.status,
                    String::from_utf8_lossy(&response.body)
                ),
            ));
        }
        let parsed: ReadStateResponseWire = serde_cbor::from_slice(&response.body).map_err(|e| {
            CallError::transient(format!("read_state response decoding failed: {e}"))
        })?;
        let certificate =
            Certificate::from_cbor(&parsed.certificate).map_err(certificate_error)?;
        certificate.verify(&self.root_key).map_err(certificate_error)?;

        let rid = request_id.as_bytes().as_slice();
        match certificate.lookup(&[b"request_status", rid, b"status"]) {
            LookupResult::Found(b"replied") => {
                let reply = certificate
                    .lookup_required(&[b"request_status", rid, b"reply"])
                    .map_err(certificate_error)?
                    .to_vec();
                let timestamp = certificate.certified_time().map_err(certificate_error)?;
                Ok(RequestPollState::Replied(TimestampedReply { bytes: reply, timestamp }))
            }
            LookupResult::Found(b"rejected") => {
                let code_raw = certificate
                    .lookup_required(&[b"request_status", rid, b"reject_code"])
                    .map_err(certificate_error)?;
                let code = ledgerflow_certified::leb::decode(code_raw)
                    .map_err(certificate_error)? as u64;
                let message = certificate
                    .lookup_required(&[b"request_status", rid, b"reject_message"])
                    .map(|raw| String::from_utf8_lossy(raw).into_owned())
                    .map_err(certificate_error)?;
                let timestamp = certificate.certified_time().map_err(certificate_error)?;
                warn!(%request_id, code, "update call rejected: {message}");
                Err(CallError::rejected(code, message).with_timestamp(timestamp))
            }
            LookupResult::Found(b"done") => Err(CallError::transient(
                "request completed but its reply is no longer retained",
            )),
            LookupResult::Found(b"processing" | b"received") => Ok(RequestPollState::InProgress),
            LookupResult::Found(other) => Err(CallError::transient(format!(
                "request status has unknown value `{}`",
                String::from_utf8_lossy(other)
            ))),
            // Not yet incorporated into certified state; keep polling.
            LookupResult::Absent | LookupResult::Pruned => Ok(RequestPollState::InProgress),
        }
    }
}

enum RequestPollState {
    Replied(TimestampedReply),
    InProgress,
}

/// An update call whose envelope is already on the wire. `commit` polls the
/// certified request status until the call replies, is rejected, or the poll
/// budget runs out.
pub struct PreparedCall {
    agent: Arc<Agent>,
    canister: Principal,
    request_id: RequestId,
}

impl PreparedCall {
    /// Rebuild a prepared call from a persisted request id, e.g. after a
    /// process restart. Committing it does not re-transmit the envelope.
    pub fn resume(agent: Arc<Agent>, canister: Principal, request_id: RequestId) -> Self {
        Self { agent, canister, request_id }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Poll the certified status path until the call completes.
    pub async fn commit(self) -> Result<TimestampedReply> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .agent
                .read_request_status(&self.canister, &self.request_id)
                .await?
            {
                RequestPollState::Replied(reply) => {
                    debug!(request_id = %self.request_id, "update call replied");
                    return Ok(reply);
                }
                RequestPollState::InProgress => {}
            }
            let Some(delay) = self.agent.poll.delay(attempt) else {
                return Err(CallError::timeout(format!(
                    "request {} did not complete within the poll budget",
                    self.request_id
                )));
            };
            debug!(request_id = %self.request_id, attempt, ?delay, "request still in progress");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Certificate problems are hard protocol errors for the attempt. They fall
/// into the transient bucket of the taxonomy, but mutating calls are never
/// auto-retried, so they always surface to the caller.
fn certificate_error(error: CertificateError) -> CallError {
    CallError::transient(format!("certificate: {error}"))
}
