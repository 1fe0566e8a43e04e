//! Certificate verification for ledgerflow.
//!
//! A certificate is a labeled hash tree plus a signature over the tree's
//! root digest. This crate decodes certificates from their CBOR wire form,
//! verifies the signature against a trusted root key, and answers path
//! lookups (request status, reply bytes, rejection fields, certified time).
//!
//! # Trust rules
//!
//! - A certificate whose recomputed root digest does not verify against the
//!   root key is a hard protocol error. It is never silently ignored.
//! - An absent path is distinct from a present-but-empty leaf, and both are
//!   distinct from a path hidden behind a pruned subtree.
//! - The certified `time` leaf is the only trustworthy source of "current
//!   time" anywhere in the client.

#![forbid(unsafe_code)]

mod certificate;
mod error;
pub mod leb;
mod tree;

pub use certificate::Certificate;
pub use error::{CertificateError, Result};
pub use tree::{HashTree, LookupResult, Sha256Digest};
