//! Certified timestamps.

use candid::{CandidType, Nat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A timestamp attested by a remote service, in nanoseconds since the Unix
/// epoch.
///
/// Timestamps of this type always originate from a verified certificate or a
/// signed query response. The local wall clock is never a source of
/// `Timestamp` values; it is only consulted when choosing an ingress expiry
/// for outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, CandidType, Serialize, Deserialize)]
pub struct Timestamp(pub Nat);

impl Timestamp {
    pub fn from_nanos(nanos: u128) -> Self {
        Self(Nat::from(nanos))
    }

    /// Nanoseconds as a `u128`, or `None` when out of range.
    pub fn as_nanos(&self) -> Option<u128> {
        u128::try_from(&self.0 .0).ok()
    }
}

impl From<Nat> for Timestamp {
    fn from(n: Nat) -> Self {
        Self(n)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}
