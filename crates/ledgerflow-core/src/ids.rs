//! Transaction and request identifiers.

use candid::{CandidType, Nat};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Global transaction id: `(stream id, sequence number)`.
///
/// Assigned by the aggregator when it accepts a submission and immutable
/// thereafter; the pair names the transaction uniquely across the whole
/// system, on both the aggregator and the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, CandidType, Serialize, Deserialize)]
pub struct GlobalId(pub Nat, pub Nat);

impl GlobalId {
    pub fn new(stream: impl Into<Nat>, seq: impl Into<Nat>) -> Self {
        Self(stream.into(), seq.into())
    }

    pub fn stream_id(&self) -> &Nat {
        &self.0
    }

    pub fn seq_num(&self) -> &Nat {
        &self.1
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// Content hash of a call envelope.
///
/// The id is a sha-256 digest over the canonical encoding of the request
/// content, so the same logical call always hashes to the same id no matter
/// how many times it is retransmitted. Serialized as lowercase hex in
/// journals and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub [u8; 32]);

impl RequestId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let raw = hex::decode(s).ok()?;
        let bytes: [u8; 32] = raw.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| D::Error::custom("request id is not 32 bytes of hex"))
    }
}
