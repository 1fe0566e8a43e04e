//! Request envelopes, request ids and the CBOR wire shapes.
//!
//! A request's id is a sha-256 digest over the *canonical* encoding of its
//! content: every field is hashed individually, the `(hash(key), hash(value))`
//! pairs are sorted by key hash and concatenated, and the result is hashed
//! once more. The id therefore depends only on the logical content — the same
//! envelope yields the same id no matter how often it is retransmitted, which
//! is what makes resubmission idempotent at the transport level.

use crate::identity::Identity;
use ledgerflow_core::{CallError, Principal, RequestId, Result};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use sha2::{Digest, Sha256};

/// Domain separator prepended to a request id before signing.
pub const REQUEST_DOMAIN: &[u8] = b"\x0Aic-request";

/// Logical content of an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeContent {
    Call {
        canister_id: Principal,
        method_name: String,
        arg: Vec<u8>,
        sender: Principal,
        ingress_expiry: u64,
    },
    Query {
        canister_id: Principal,
        method_name: String,
        arg: Vec<u8>,
        sender: Principal,
        ingress_expiry: u64,
    },
    ReadState {
        paths: Vec<Vec<Vec<u8>>>,
        sender: Principal,
        ingress_expiry: u64,
    },
}

impl EnvelopeContent {
    pub fn request_type(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Query { .. } => "query",
            Self::ReadState { .. } => "read_state",
        }
    }

    /// Content-addressed id of this request.
    pub fn request_id(&self) -> RequestId {
        let mut fields: Vec<(&str, HashInput<'_>)> =
            vec![("request_type", HashInput::Text(self.request_type()))];
        match self {
            Self::Call { canister_id, method_name, arg, sender, ingress_expiry }
            | Self::Query { canister_id, method_name, arg, sender, ingress_expiry } => {
                fields.push(("canister_id", HashInput::Blob(canister_id.as_slice())));
                fields.push(("method_name", HashInput::Text(method_name)));
                fields.push(("arg", HashInput::Blob(arg)));
                fields.push(("sender", HashInput::Blob(sender.as_slice())));
                fields.push(("ingress_expiry", HashInput::Nat(*ingress_expiry)));
            }
            Self::ReadState { paths, sender, ingress_expiry } => {
                fields.push((
                    "paths",
                    HashInput::Array(
                        paths
                            .iter()
                            .map(|path| {
                                HashInput::Array(
                                    path.iter().map(|seg| HashInput::Blob(seg)).collect(),
                                )
                            })
                            .collect(),
                    ),
                ));
                fields.push(("sender", HashInput::Blob(sender.as_slice())));
                fields.push(("ingress_expiry", HashInput::Nat(*ingress_expiry)));
            }
        }
        RequestId(hash_of_map(&fields))
    }

    fn to_wire(&self) -> ContentWire {
        match self {
            Self::Call { canister_id, method_name, arg, sender, ingress_expiry }
            | Self::Query { canister_id, method_name, arg, sender, ingress_expiry } => ContentWire {
                request_type: self.request_type().to_string(),
                canister_id: Some(ByteBuf::from(canister_id.as_slice().to_vec())),
                method_name: Some(method_name.clone()),
                arg: Some(ByteBuf::from(arg.clone())),
                sender: ByteBuf::from(sender.as_slice().to_vec()),
                ingress_expiry: *ingress_expiry,
                paths: None,
            },
            Self::ReadState { paths, sender, ingress_expiry } => ContentWire {
                request_type: self.request_type().to_string(),
                canister_id: None,
                method_name: None,
                arg: None,
                sender: ByteBuf::from(sender.as_slice().to_vec()),
                ingress_expiry: *ingress_expiry,
                paths: Some(
                    paths
                        .iter()
                        .map(|path| path.iter().map(|seg| ByteBuf::from(seg.clone())).collect())
                        .collect(),
                ),
            },
        }
    }

    /// Sign the content under the given identity and encode the full
    /// envelope to CBOR. The signature covers the domain-separated request
    /// id, not the raw encoding, so it is stable across re-encodings.
    pub fn sign_and_encode(&self, identity: &dyn Identity) -> Result<Vec<u8>> {
        let request_id = self.request_id();
        let mut message = Vec::with_capacity(REQUEST_DOMAIN.len() + 32);
        message.extend_from_slice(REQUEST_DOMAIN);
        message.extend_from_slice(request_id.as_bytes());
        let signature = identity.sign(&message)?;
        let envelope = Envelope {
            content: self.to_wire(),
            sender_pubkey: signature.public_key.map(ByteBuf::from),
            sender_sig: signature.signature.map(ByteBuf::from),
        };
        serde_cbor::to_vec(&envelope)
            .map_err(|e| CallError::transient(format!("envelope encoding failed: {e}")))
    }
}

/// Signed request envelope, CBOR wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub content: ContentWire,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_pubkey: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_sig: Option<ByteBuf>,
}

impl Envelope {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_cbor::from_slice(bytes)
            .map_err(|e| CallError::transient(format!("envelope decoding failed: {e}")))
    }
}

/// Request content, CBOR wire form. Field presence depends on request type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentWire {
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canister_id: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<ByteBuf>,
    pub sender: ByteBuf,
    pub ingress_expiry: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<Vec<ByteBuf>>>,
}

/// Query response, CBOR wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponseWire {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<QueryReplyWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_code: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<NodeSignatureWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryReplyWire {
    pub arg: ByteBuf,
}

/// Per-node signature attached to a query response; its timestamp is the
/// response's verified time source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSignatureWire {
    pub timestamp: u64,
    pub signature: ByteBuf,
    pub identity: ByteBuf,
}

/// Read-state response, CBOR wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadStateResponseWire {
    pub certificate: ByteBuf,
}

enum HashInput<'a> {
    Blob(&'a [u8]),
    Text(&'a str),
    Nat(u64),
    Array(Vec<HashInput<'a>>),
}

fn hash_input(input: &HashInput<'_>) -> [u8; 32] {
    match input {
        HashInput::Blob(bytes) => Sha256::digest(bytes).into(),
        HashInput::Text(text) => Sha256::digest(text.as_bytes()).into(),
        HashInput::Nat(n) => {
            Sha256::digest(ledgerflow_certified::leb::encode(u128::from(*n))).into()
        }
        HashInput::Array(items) => {
            let mut hasher = Sha256::new();
            for item in items {
                hasher.update(hash_input(item));
            }
            hasher.finalize().into()
        }
    }
}

fn hash_of_map(fields: &[(&str, HashInput<'_>)]) -> [u8; 32] {
    let mut pairs: Vec<([u8; 32], [u8; 32])> = fields
        .iter()
        .map(|(key, value)| (Sha256::digest(key.as_bytes()).into(), hash_input(value)))
        .collect();
    pairs.sort();
    let mut hasher = Sha256::new();
    for (key_hash, value_hash) in pairs {
        hasher.update(key_hash);
        hasher.update(value_hash);
    }
    hasher.finalize().into()
}
