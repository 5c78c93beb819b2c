//! Header parsing errors
//!
//! Structural checks report why a header was refused. Cryptographic checks
//! do not: they yield a [`Trust`](core_types::Trust) value instead.

use hal::FlashError;
use thiserror::Error;

/// Reasons a header is refused, in the order they are checked
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("bad header size {0}")]
    BadHeaderSize(u32),

    #[error("auth size {auth_size} not below header size {header_size}")]
    AuthSizeNotBelowHeaderSize { auth_size: u32, header_size: u32 },

    #[error("auth size {0} smaller than the authenticated fields")]
    AuthSizeTooSmall(u32),

    #[error("bad code size {0}")]
    BadCodeSize(u32),

    #[error("hardware mismatch: model {model:#010x} revision {revision}")]
    WrongModel { model: u32, revision: u32 },

    #[error("Merkle proof with {nodes} nodes does not fit")]
    ProofOverflow { nodes: u32 },

    #[error("signature block does not fit in the header")]
    SignatureBlockOverflow,

    #[error("header truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("invalid vendor header: {0}")]
    BadVendorHeader(&'static str),

    #[error("invalid image header: {0}")]
    BadImageHeader(&'static str),

    #[error("header not authenticated")]
    Unauthenticated,

    #[error(transparent)]
    Flash(#[from] FlashError),
}

/// Fails with `Truncated` unless `data` holds at least `needed` bytes
pub(crate) fn ensure_len(data: &[u8], needed: usize) -> Result<(), HeaderError> {
    if data.len() < needed {
        Err(HeaderError::Truncated {
            needed,
            available: data.len(),
        })
    } else {
        Ok(())
    }
}
