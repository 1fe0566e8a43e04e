//! Labeled hash trees.
//!
//! The wire form is nested CBOR arrays tagged by shape: `[0]` empty,
//! `[1, l, r]` fork, `[2, label, subtree]` labeled, `[3, bytes]` leaf,
//! `[4, digest]` pruned. Digests are sha-256 over a domain-separated
//! encoding of each node, so a single flipped byte anywhere in the tree
//! changes the root digest.

use crate::error::{CertificateError, Result};
use serde_cbor::Value;
use sha2::{Digest, Sha256};

pub type Sha256Digest = [u8; 32];

const DOMAIN_EMPTY: &str = "ic-hashtree-empty";
const DOMAIN_FORK: &str = "ic-hashtree-fork";
const DOMAIN_LABELED: &str = "ic-hashtree-labeled";
const DOMAIN_LEAF: &str = "ic-hashtree-leaf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashTree {
    Empty,
    Fork(Box<HashTree>, Box<HashTree>),
    Labeled(Vec<u8>, Box<HashTree>),
    Leaf(Vec<u8>),
    Pruned(Sha256Digest),
}

/// Outcome of a path lookup.
///
/// `Absent` is a proof that the path is not in the tree; `Pruned` means the
/// certificate does not carry enough of the tree to decide. The two must
/// never be conflated: absence of `request_status/<id>/status` means "still
/// executing", while a pruned branch means "ask again".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult<'a> {
    Found(&'a [u8]),
    Absent,
    Pruned,
}

fn domain_hasher(domain: &str) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update([domain.len() as u8]);
    hasher.update(domain.as_bytes());
    hasher
}

impl HashTree {
    /// Root digest of the tree.
    pub fn digest(&self) -> Sha256Digest {
        match self {
            Self::Empty => domain_hasher(DOMAIN_EMPTY).finalize().into(),
            Self::Fork(left, right) => {
                let mut hasher = domain_hasher(DOMAIN_FORK);
                hasher.update(left.digest());
                hasher.update(right.digest());
                hasher.finalize().into()
            }
            Self::Labeled(label, subtree) => {
                let mut hasher = domain_hasher(DOMAIN_LABELED);
                hasher.update(label);
                hasher.update(subtree.digest());
                hasher.finalize().into()
            }
            Self::Leaf(bytes) => {
                let mut hasher = domain_hasher(DOMAIN_LEAF);
                hasher.update(bytes);
                hasher.finalize().into()
            }
            Self::Pruned(digest) => *digest,
        }
    }

    /// Look up a labeled path, ending at a leaf.
    pub fn lookup_path(&self, path: &[&[u8]]) -> LookupResult<'_> {
        match path.split_first() {
            None => match self {
                Self::Leaf(bytes) => LookupResult::Found(bytes),
                Self::Pruned(_) => LookupResult::Pruned,
                // A non-leaf at the end of the path carries no value.
                _ => LookupResult::Absent,
            },
            Some((label, rest)) => match self.find_label(label) {
                LabelSearch::Found(subtree) => subtree.lookup_path(rest),
                LabelSearch::Absent => LookupResult::Absent,
                LabelSearch::Pruned => LookupResult::Pruned,
            },
        }
    }

    fn find_label(&self, label: &[u8]) -> LabelSearch<'_> {
        let mut saw_pruned = false;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Fork(left, right) => {
                    stack.push(right);
                    stack.push(left);
                }
                Self::Labeled(candidate, subtree) if candidate.as_slice() == label => {
                    return LabelSearch::Found(subtree);
                }
                Self::Labeled(_, _) | Self::Empty | Self::Leaf(_) => {}
                Self::Pruned(_) => saw_pruned = true,
            }
        }
        if saw_pruned {
            LabelSearch::Pruned
        } else {
            LabelSearch::Absent
        }
    }

    /// Decode from the CBOR array form.
    pub fn from_cbor_value(value: &Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            _ => return Err(CertificateError::malformed("hash tree node is not an array")),
        };
        let tag = match items.first() {
            Some(Value::Integer(tag)) => *tag,
            _ => return Err(CertificateError::malformed("hash tree node has no shape tag")),
        };
        match (tag, items.len()) {
            (0, 1) => Ok(Self::Empty),
            (1, 3) => Ok(Self::Fork(
                Box::new(Self::from_cbor_value(&items[1])?),
                Box::new(Self::from_cbor_value(&items[2])?),
            )),
            (2, 3) => Ok(Self::Labeled(
                expect_bytes(&items[1], "label")?,
                Box::new(Self::from_cbor_value(&items[2])?),
            )),
            (3, 2) => Ok(Self::Leaf(expect_bytes(&items[1], "leaf")?)),
            (4, 2) => {
                let raw = expect_bytes(&items[1], "pruned digest")?;
                let digest: Sha256Digest = raw
                    .try_into()
                    .map_err(|_| CertificateError::malformed("pruned digest is not 32 bytes"))?;
                Ok(Self::Pruned(digest))
            }
            _ => Err(CertificateError::malformed(format!(
                "hash tree node has unknown shape tag {tag}"
            ))),
        }
    }

    /// Encode to the CBOR array form.
    pub fn to_cbor_value(&self) -> Value {
        match self {
            Self::Empty => Value::Array(vec![Value::Integer(0)]),
            Self::Fork(left, right) => Value::Array(vec![
                Value::Integer(1),
                left.to_cbor_value(),
                right.to_cbor_value(),
            ]),
            Self::Labeled(label, subtree) => Value::Array(vec![
                Value::Integer(2),
                Value::Bytes(label.clone()),
                subtree.to_cbor_value(),
            ]),
            Self::Leaf(bytes) => {
                Value::Array(vec![Value::Integer(3), Value::Bytes(bytes.clone())])
            }
            Self::Pruned(digest) => {
                Value::Array(vec![Value::Integer(4), Value::Bytes(digest.to_vec())])
            }
        }
    }

    /// Convenience constructor: a labeled chain ending in a leaf.
    pub fn labeled_path(path: &[&[u8]], leaf: Vec<u8>) -> Self {
        let mut node = Self::Leaf(leaf);
        for label in path.iter().rev() {
            node = Self::Labeled(label.to_vec(), Box::new(node));
        }
        node
    }

    pub fn fork(left: Self, right: Self) -> Self {
        Self::Fork(Box::new(left), Box::new(right))
    }
}

enum LabelSearch<'a> {
    Found(&'a HashTree),
    Absent,
    Pruned,
}

fn expect_bytes(value: &Value, what: &str) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes.clone()),
        _ => Err(CertificateError::malformed(format!("{what} is not a byte string"))),
    }
}
