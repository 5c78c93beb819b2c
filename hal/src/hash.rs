//! Hash engine abstraction
//!
//! Mirrors the `hash_init` / `hash_update` / `hash_final` collaborator. The
//! image format uses SHA-256 throughout, so every engine produces 32 bytes.

use sha2::{Digest, Sha256};

/// Digest length in bytes
pub const DIGEST_LEN: usize = 32;

/// Incremental hash engine
pub trait HashEngine {
    /// Discards any absorbed input
    fn init(&mut self);

    /// Absorbs more input
    fn update(&mut self, data: &[u8]);

    /// Produces the digest and leaves the engine ready for a new message
    fn finalize(&mut self) -> [u8; DIGEST_LEN];

    /// One-shot digest of `data`
    fn digest(&mut self, data: &[u8]) -> [u8; DIGEST_LEN] {
        self.init();
        self.update(data);
        self.finalize()
    }
}

/// SHA-256 engine
#[derive(Debug, Clone, Default)]
pub struct Sha256Engine {
    inner: Sha256,
}

impl Sha256Engine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashEngine for Sha256Engine {
    fn init(&mut self) {
        self.inner = Sha256::new();
    }

    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.inner, data);
    }

    fn finalize(&mut self) -> [u8; DIGEST_LEN] {
        self.inner.finalize_reset().into()
    }
}
