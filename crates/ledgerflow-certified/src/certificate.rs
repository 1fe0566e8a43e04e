//! Certificate decoding and verification.

use crate::error::{CertificateError, Result};
use crate::leb;
use crate::tree::{HashTree, LookupResult};
use ed25519_dalek::{Signature, VerifyingKey};
use ledgerflow_core::Timestamp;
use serde_cbor::Value;
use tracing::warn;

/// Domain separator for the signed state root, length-prefixed per the
/// hash-tree convention.
const STATE_ROOT_DOMAIN: &[u8] = b"\x0Dic-state-root";

/// A decoded certificate: a labeled hash tree and a signature over its root
/// digest.
///
/// Decoding and verification are separate steps on purpose: [`Certificate::from_cbor`]
/// only checks structure, and nothing read from the tree may be trusted until
/// [`Certificate::verify`] has accepted the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    tree: HashTree,
    signature: Vec<u8>,
}

impl Certificate {
    pub fn new(tree: HashTree, signature: Vec<u8>) -> Self {
        Self { tree, signature }
    }

    /// Decode the CBOR wire form: a map with `tree` and `signature` entries.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_cbor::from_slice(bytes)
            .map_err(|e| CertificateError::malformed(format!("certificate cbor: {e}")))?;
        let map = match value {
            Value::Map(map) => map,
            _ => return Err(CertificateError::malformed("certificate is not a map")),
        };
        let tree_value = map
            .get(&Value::Text("tree".into()))
            .ok_or_else(|| CertificateError::malformed("certificate has no tree"))?;
        let signature = match map.get(&Value::Text("signature".into())) {
            Some(Value::Bytes(bytes)) => bytes.clone(),
            Some(_) => return Err(CertificateError::malformed("signature is not bytes")),
            None => return Err(CertificateError::malformed("certificate has no signature")),
        };
        Ok(Self {
            tree: HashTree::from_cbor_value(tree_value)?,
            signature,
        })
    }

    /// Encode back to the CBOR wire form.
    pub fn to_cbor(&self) -> Vec<u8> {
        let mut map = std::collections::BTreeMap::new();
        map.insert(Value::Text("tree".into()), self.tree.to_cbor_value());
        map.insert(Value::Text("signature".into()), Value::Bytes(self.signature.clone()));
        // A Value map of plain values cannot fail to serialize.
        serde_cbor::to_vec(&Value::Map(map)).unwrap_or_default()
    }

    /// The message the root key signs: domain separator plus root digest.
    pub fn signed_message(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(STATE_ROOT_DOMAIN.len() + 32);
        msg.extend_from_slice(STATE_ROOT_DOMAIN);
        msg.extend_from_slice(&self.tree.digest());
        msg
    }

    /// Verify the signature against the trusted root key of the target
    /// service. Failure here is a hard protocol error.
    pub fn verify(&self, root_key: &VerifyingKey) -> Result<()> {
        let signature = Signature::from_slice(&self.signature)
            .map_err(|e| CertificateError::SignatureUndecodable(e.to_string()))?;
        root_key
            .verify_strict(&self.signed_message(), &signature)
            .map_err(|_| {
                warn!("certificate root digest does not verify against the trusted root key");
                CertificateError::SignatureInvalid
            })
    }

    /// Raw path lookup in the certified tree.
    pub fn lookup(&self, path: &[&[u8]]) -> LookupResult<'_> {
        self.tree.lookup_path(path)
    }

    /// Look up a path that the protocol requires to be present.
    pub fn lookup_required(&self, path: &[&[u8]]) -> Result<&[u8]> {
        let display = path_display(path);
        match self.tree.lookup_path(path) {
            LookupResult::Found(bytes) => Ok(bytes),
            LookupResult::Absent => Err(CertificateError::PathAbsent(display)),
            LookupResult::Pruned => Err(CertificateError::PathPruned(display)),
        }
    }

    /// The certified `time` leaf, in nanoseconds.
    pub fn certified_time(&self) -> Result<Timestamp> {
        let raw = self.lookup_required(&[b"time"])?;
        let nanos = leb::decode(raw).map_err(|e| CertificateError::ValueMalformed {
            path: "time".into(),
            reason: e.to_string(),
        })?;
        Ok(Timestamp::from_nanos(nanos))
    }

    pub fn tree(&self) -> &HashTree {
        &self.tree
    }
}

fn path_display(path: &[&[u8]]) -> String {
    path.iter()
        .map(|seg| String::from_utf8_lossy(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
