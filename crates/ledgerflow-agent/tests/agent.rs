//! End-to-end agent behavior against a scripted transport: verified queries,
//! the prepare/commit poll loop, and resumption from a persisted request id.

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use futures::FutureExt;
use ledgerflow_agent::{
    Agent, AgentConfig, AnonymousIdentity, ClassifyInterceptor, Ed25519Identity, Envelope,
    EnvelopeContent, InterceptorChain, NodeSignatureWire, PreparedCall, QueryReplyWire,
    QueryResponseWire, RetryInterceptor, Transport, TransportResponse,
};
use ledgerflow_certified::{leb, Certificate, HashTree};
use ledgerflow_core::{ErrorKind, Principal, RequestId, Result, Timestamp};
use serde_bytes::ByteBuf;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

fn ledger() -> Principal {
    Principal::from_slice(&[0, 0, 0, 0, 0, 0, 0, 7, 1, 1])
}

fn root_key() -> SigningKey {
    SigningKey::from_bytes(&[11u8; 32])
}

/// Scripted responses per endpoint, popped in order. Running out of script
/// is a test bug and panics.
#[derive(Default)]
struct ScriptedTransport {
    reads: Mutex<VecDeque<TransportResponse>>,
    queries: Mutex<VecDeque<TransportResponse>>,
}

impl ScriptedTransport {
    fn with_read(self, response: TransportResponse) -> Self {
        self.reads.lock().unwrap().push_back(response);
        self
    }

    fn with_query(self, response: TransportResponse) -> Self {
        self.queries.lock().unwrap().push_back(response);
        self
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, _canister: &Principal, _envelope: Vec<u8>) -> Result<TransportResponse> {
        panic!("call endpoint not scripted");
    }

    async fn read_state(
        &self,
        _canister: &Principal,
        _envelope: Vec<u8>,
    ) -> Result<TransportResponse> {
        Ok(self.reads.lock().unwrap().pop_front().expect("unscripted read_state"))
    }

    async fn query(&self, _canister: &Principal, _envelope: Vec<u8>) -> Result<TransportResponse> {
        Ok(self.queries.lock().unwrap().pop_front().expect("unscripted query"))
    }
}

fn agent(transport: ScriptedTransport) -> Arc<Agent> {
    Arc::new(
        Agent::new(
            Arc::new(transport),
            Arc::new(AnonymousIdentity),
            root_key().verifying_key().as_bytes(),
            AgentConfig::default(),
        )
        .unwrap(),
    )
}

fn query_reply(arg: Vec<u8>, timestamp_nanos: u64) -> TransportResponse {
    let wire = QueryResponseWire {
        status: "replied".to_string(),
        reply: Some(QueryReplyWire { arg: ByteBuf::from(arg) }),
        reject_code: None,
        reject_message: None,
        error_code: None,
        signatures: vec![NodeSignatureWire {
            timestamp: timestamp_nanos,
            signature: ByteBuf::from(vec![0u8; 64]),
            identity: ByteBuf::from(vec![1u8; 32]),
        }],
    };
    TransportResponse::ok(serde_cbor::to_vec(&wire).unwrap())
}

fn query_reject(code: u64, message: &str) -> TransportResponse {
    let wire = QueryResponseWire {
        status: "rejected".to_string(),
        reply: None,
        reject_code: Some(code),
        reject_message: Some(message.to_string()),
        error_code: None,
        signatures: Vec::new(),
    };
    TransportResponse::ok(serde_cbor::to_vec(&wire).unwrap())
}

/// Build and sign a certificate over the given subtrees plus a certified
/// time leaf, then wrap it as a read_state response body.
fn certified_response(subtrees: Vec<HashTree>, time_nanos: u128) -> TransportResponse {
    certified_response_signed(subtrees, time_nanos, &root_key())
}

fn certified_response_signed(
    subtrees: Vec<HashTree>,
    time_nanos: u128,
    key: &SigningKey,
) -> TransportResponse {
    let time = HashTree::labeled_path(&[b"time"], leb::encode(time_nanos));
    let tree = subtrees
        .into_iter()
        .fold(time, |acc, subtree| HashTree::fork(acc, subtree));
    let unsigned = Certificate::new(tree.clone(), Vec::new());
    let signature = key.sign(&unsigned.signed_message()).to_bytes().to_vec();
    let certificate = Certificate::new(tree, signature);

    #[derive(serde::Serialize)]
    struct Wire {
        certificate: ByteBuf,
    }
    let body = serde_cbor::to_vec(&Wire { certificate: ByteBuf::from(certificate.to_cbor()) })
        .unwrap();
    TransportResponse::ok(body)
}

/// One merged `request_status/<id>` subtree with the given leaf entries.
/// Labels are unique per level in a real certificate, so all entries for a
/// request hang off a single labeled chain.
fn request_status_tree(request_id: &RequestId, entries: Vec<(&str, Vec<u8>)>) -> HashTree {
    let children = entries
        .into_iter()
        .map(|(label, value)| HashTree::labeled_path(&[label.as_bytes()], value))
        .reduce(HashTree::fork)
        .unwrap_or(HashTree::Empty);
    HashTree::Labeled(
        b"request_status".to_vec(),
        Box::new(HashTree::Labeled(
            request_id.as_bytes().to_vec(),
            Box::new(children),
        )),
    )
}

/// The request id the agent will derive for an anonymous update envelope is
/// not knowable up front here (it hashes the expiry), so tests that need
/// matching certificates run prepare first and script read_state lazily.
/// A second transport layer handles that: it builds responses from the
/// request id of the prepared call.
struct ReplyAfter {
    pending_reads: AtomicU32,
    reply: Vec<u8>,
    time_nanos: u128,
    reads_seen: AtomicU32,
}

#[async_trait]
impl Transport for ReplyAfter {
    async fn call(&self, _canister: &Principal, envelope: Vec<u8>) -> Result<TransportResponse> {
        let envelope = Envelope::decode(&envelope)?;
        assert_eq!(envelope.content.request_type, "call");
        Ok(TransportResponse::accepted())
    }

    async fn read_state(
        &self,
        _canister: &Principal,
        envelope: Vec<u8>,
    ) -> Result<TransportResponse> {
        self.reads_seen.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope::decode(&envelope)?;
        let paths = envelope.content.paths.expect("read_state without paths");
        let rid = RequestId(paths[0][1].as_slice().try_into().unwrap());
        if self.pending_reads.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            n.checked_sub(1)
        }).is_ok()
        {
            // Still processing.
            return Ok(certified_response(
                vec![request_status_tree(&rid, vec![("status", b"processing".to_vec())])],
                self.time_nanos,
            ));
        }
        Ok(certified_response(
            vec![request_status_tree(
                &rid,
                vec![("status", b"replied".to_vec()), ("reply", self.reply.clone())],
            )],
            self.time_nanos,
        ))
    }

    async fn query(&self, _canister: &Principal, _envelope: Vec<u8>) -> Result<TransportResponse> {
        panic!("query endpoint not scripted");
    }
}

#[tokio::test]
async fn query_returns_reply_with_node_signature_timestamp() {
    let agent = agent(ScriptedTransport::default().with_query(query_reply(vec![4, 4, 4], 777)));
    let reply = agent.query_raw(&ledger(), "tx_status", vec![]).await.unwrap();
    assert_eq!(reply.bytes, vec![4, 4, 4]);
    assert_eq!(reply.timestamp, Timestamp::from_nanos(777));
}

#[tokio::test]
async fn query_without_signatures_carries_time_zero() {
    let wire = QueryResponseWire {
        status: "replied".to_string(),
        reply: Some(QueryReplyWire { arg: ByteBuf::from(vec![9]) }),
        reject_code: None,
        reject_message: None,
        error_code: None,
        signatures: Vec::new(),
    };
    let response = TransportResponse::ok(serde_cbor::to_vec(&wire).unwrap());
    let agent = agent(ScriptedTransport::default().with_query(response));
    let reply = agent.query_raw(&ledger(), "ft_info", vec![]).await.unwrap();
    assert_eq!(reply.timestamp, Timestamp::from_nanos(0));
}

#[tokio::test]
async fn query_reject_classifies_by_code() {
    let agent = agent(
        ScriptedTransport::default()
            .with_query(query_reject(4, "unknown asset"))
            .with_query(query_reject(5, "canister trapped explicitly: off by one"))
            .with_query(query_reject(2, "out of cycles")),
    );
    let reject = agent.query_raw(&ledger(), "m", vec![]).await.unwrap_err();
    assert_eq!(reject.kind, ErrorKind::ApplicationReject);
    assert_eq!(reject.message, "unknown asset");
    let trap = agent.query_raw(&ledger(), "m", vec![]).await.unwrap_err();
    assert_eq!(trap.kind, ErrorKind::ApplicationTrap);
    let transient = agent.query_raw(&ledger(), "m", vec![]).await.unwrap_err();
    assert_eq!(transient.kind, ErrorKind::Transient);
}

#[tokio::test]
async fn query_http_403_is_auth_failure() {
    let agent = agent(
        ScriptedTransport::default()
            .with_query(TransportResponse { status: 403, body: b"nope".to_vec() }),
    );
    let error = agent.query_raw(&ledger(), "m", vec![]).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::AuthFailure);
    assert!(!error.retryable());
}

#[tokio::test(start_paused = true)]
async fn commit_polls_until_replied_and_returns_certified_time() {
    let transport = Arc::new(ReplyAfter {
        pending_reads: AtomicU32::new(2),
        reply: vec![0x44, 0x49, 0x44, 0x4c],
        time_nanos: 1_700_000_000_000_000_000,
        reads_seen: AtomicU32::new(0),
    });
    let agent = Arc::new(
        Agent::new(
            transport.clone(),
            Arc::new(Ed25519Identity::from_seed([3u8; 32])),
            root_key().verifying_key().as_bytes(),
            AgentConfig::default(),
        )
        .unwrap(),
    );
    let prepared = agent.prepare(&ledger(), "submit", vec![1, 2]).await.unwrap();
    let reply = prepared.commit().await.unwrap();
    assert_eq!(reply.bytes, vec![0x44, 0x49, 0x44, 0x4c]);
    assert_eq!(reply.timestamp, Timestamp::from_nanos(1_700_000_000_000_000_000));
    // Two in-progress reads plus the final one.
    assert_eq!(transport.reads_seen.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn resume_reaches_the_same_outcome_without_retransmitting() {
    let transport = Arc::new(ReplyAfter {
        pending_reads: AtomicU32::new(0),
        reply: vec![7, 7],
        time_nanos: 42,
        reads_seen: AtomicU32::new(0),
    });
    let agent = Arc::new(
        Agent::new(
            transport.clone(),
            Arc::new(Ed25519Identity::from_seed([3u8; 32])),
            root_key().verifying_key().as_bytes(),
            AgentConfig::default(),
        )
        .unwrap(),
    );
    // Derive the id the same way the agent does, then commit from the id
    // alone as a restarted process would.
    let identity = agent.identity();
    let content = EnvelopeContent::Call {
        canister_id: ledger(),
        method_name: "submit".to_string(),
        arg: vec![1, 2],
        sender: identity.principal(),
        ingress_expiry: 99,
    };
    let request_id = content.request_id();
    let reply = PreparedCall::resume(Arc::clone(&agent), ledger(), request_id)
        .commit()
        .await
        .unwrap();
    assert_eq!(reply.bytes, vec![7, 7]);
}

#[tokio::test]
async fn commit_surfaces_certified_rejection() {
    let rid = RequestId([0xabu8; 32]);
    let response = certified_response(
        vec![request_status_tree(
            &rid,
            vec![
                ("status", b"rejected".to_vec()),
                ("reject_code", leb::encode(4)),
                ("reject_message", b"insufficient funds".to_vec()),
            ],
        )],
        1234,
    );
    let agent = agent(ScriptedTransport::default().with_read(response));
    let error = PreparedCall::resume(agent, ledger(), rid).commit().await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::ApplicationReject);
    assert_eq!(error.message, "insufficient funds");
    assert_eq!(error.timestamp, Some(Timestamp::from_nanos(1234)));
}

#[tokio::test]
async fn certificate_signed_by_the_wrong_key_is_refused() {
    let rid = RequestId([1u8; 32]);
    let forged = certified_response_signed(
        vec![request_status_tree(
            &rid,
            vec![("status", b"replied".to_vec()), ("reply", b"ok".to_vec())],
        )],
        1,
        &SigningKey::from_bytes(&[99u8; 32]),
    );
    let agent = agent(ScriptedTransport::default().with_read(forged));
    let error = PreparedCall::resume(agent, ledger(), rid).commit().await.unwrap_err();
    assert!(error.message.contains("certificate"), "unexpected: {error}");
}

#[tokio::test(start_paused = true)]
async fn query_through_the_retry_chain_recovers_from_transient_failures() {
    let agent = agent(
        ScriptedTransport::default()
            .with_query(TransportResponse { status: 502, body: Vec::new() })
            .with_query(TransportResponse { status: 502, body: Vec::new() })
            .with_query(query_reply(vec![8], 50)),
    );
    let chain = InterceptorChain::new(vec![
        Arc::new(ClassifyInterceptor),
        Arc::new(RetryInterceptor::default()),
    ]);
    let target = ledger();
    let agent_for_call = Arc::clone(&agent);
    let reply = chain
        .execute(Arc::new(move || {
            let agent = Arc::clone(&agent_for_call);
            async move { agent.query_raw(&target, "tx_status", vec![]).await }.boxed()
        }))
        .await
        .unwrap();
    assert_eq!(reply.bytes, vec![8]);
    assert_eq!(reply.timestamp, Timestamp::from_nanos(50));
}

#[tokio::test(start_paused = true)]
async fn retry_chain_gives_up_after_five_attempts() {
    let transport = ScriptedTransport::default()
        .with_query(TransportResponse { status: 500, body: Vec::new() })
        .with_query(TransportResponse { status: 500, body: Vec::new() })
        .with_query(TransportResponse { status: 500, body: Vec::new() })
        .with_query(TransportResponse { status: 500, body: Vec::new() })
        .with_query(TransportResponse { status: 500, body: Vec::new() });
    let agent = agent(transport);
    let chain = InterceptorChain::new(vec![
        Arc::new(ClassifyInterceptor),
        Arc::new(RetryInterceptor::default()),
    ]);
    let target = ledger();
    let agent_for_call = Arc::clone(&agent);
    let error = chain
        .execute(Arc::new(move || {
            let agent = Arc::clone(&agent_for_call);
            async move { agent.query_raw(&target, "tx_status", vec![]).await }.boxed()
        }))
        .await
        .unwrap_err();
    // All five scripted responses consumed; a sixth attempt would panic.
    assert_eq!(error.kind, ErrorKind::Transient);
}
