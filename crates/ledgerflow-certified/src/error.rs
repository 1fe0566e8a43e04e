//! Certificate error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CertificateError>;

#[derive(Debug, Error)]
pub enum CertificateError {
    /// The CBOR structure is not a well-formed certificate or hash tree.
    #[error("malformed certificate: {0}")]
    Malformed(String),

    /// The signature does not verify against the trusted root key.
    #[error("certificate signature does not match the trusted root key")]
    SignatureInvalid,

    /// The signature bytes are not a valid signature encoding.
    #[error("certificate signature is not decodable: {0}")]
    SignatureUndecodable(String),

    /// A path required by the protocol is missing from the tree.
    #[error("certified path {0:?} is absent from the certificate")]
    PathAbsent(String),

    /// A required path is hidden behind a pruned subtree.
    #[error("certified path {0:?} is pruned from the certificate")]
    PathPruned(String),

    /// A leaf did not hold the value shape the protocol requires.
    #[error("certified value at {path:?} is malformed: {reason}")]
    ValueMalformed { path: String, reason: String },
}

impl CertificateError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }
}
