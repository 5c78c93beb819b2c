//! Signature primitives
//!
//! The verifier side is what the boot chain consumes (`ec_verify` and
//! `pq_verify`). The signer side exists for the image signing tool and for
//! building test images.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

/// Verifies a detached signature against a fixed public key
pub trait SignatureVerifier {
    /// Returns true only if `signature` is a valid signature of `message`
    /// under `public_key`. Malformed keys or signatures are rejections.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Produces detached signatures
pub trait MessageSigner {
    /// Public key bytes as stored in key tables
    fn public_key(&self) -> Vec<u8>;

    /// Signs `message`
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// Ed25519 verifier (the EC scheme)
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = <&[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify_strict(message, &signature).is_ok()
    }
}

/// Ed25519 signer backed by a secret seed
#[derive(Debug, Clone)]
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Public key as a fixed-size array
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

impl MessageSigner for Ed25519Signer {
    fn public_key(&self) -> Vec<u8> {
        self.public_key_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }
}
