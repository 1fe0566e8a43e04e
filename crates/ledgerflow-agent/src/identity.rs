//! Signing identities.

use ed25519_dalek::{Signer, SigningKey};
use ledgerflow_core::{CallError, Principal, Result};

/// A signing identity: supplies the sender principal and signs request
/// envelopes. The anonymous identity is a valid default and signs nothing.
pub trait Identity: Send + Sync {
    fn principal(&self) -> Principal;

    /// Public key bytes, when the identity has one.
    fn public_key(&self) -> Option<Vec<u8>>;

    /// Sign a domain-separated message.
    fn sign(&self, message: &[u8]) -> Result<IdentitySignature>;
}

/// Result of signing: both fields empty for the anonymous identity.
#[derive(Debug, Clone, Default)]
pub struct IdentitySignature {
    pub public_key: Option<Vec<u8>>,
    pub signature: Option<Vec<u8>>,
}

/// The unauthenticated default identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentity;

impl Identity for AnonymousIdentity {
    fn principal(&self) -> Principal {
        Principal::anonymous()
    }

    fn public_key(&self) -> Option<Vec<u8>> {
        None
    }

    fn sign(&self, _message: &[u8]) -> Result<IdentitySignature> {
        Ok(IdentitySignature::default())
    }
}

/// An ed25519 identity. The principal is derived from the public key
/// (self-authenticating), so a given key always speaks as the same sender.
pub struct Ed25519Identity {
    key: SigningKey,
}

impl Ed25519Identity {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(&seed))
    }

    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.key.verifying_key()
    }
}

impl Identity for Ed25519Identity {
    fn principal(&self) -> Principal {
        Principal::self_authenticating(self.key.verifying_key().as_bytes())
    }

    fn public_key(&self) -> Option<Vec<u8>> {
        Some(self.key.verifying_key().as_bytes().to_vec())
    }

    fn sign(&self, message: &[u8]) -> Result<IdentitySignature> {
        let signature = self
            .key
            .try_sign(message)
            .map_err(|e| CallError::transient(format!("ed25519 signing failed: {e}")))?;
        Ok(IdentitySignature {
            public_key: self.public_key(),
            signature: Some(signature.to_bytes().to_vec()),
        })
    }
}
