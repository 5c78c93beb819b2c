//! Boot header parser
//!
//! Layout of the header region (little-endian, packed):
//!
//! ```text
//! 0        authenticated fields (80 bytes, see BootHeader::encode)
//! 80       reserved, zero; authenticated up to auth_size
//! auth     Merkle proof: u32 node count, then count x 32-byte nodes
//! ...      unauthenticated block: u8 fw_type, 3 reserved bytes,
//!          then (64-byte EC signature, PQ signature) pairs
//! header   code (code_size bytes)
//! ```

use crate::codec::{read_array, read_u32, write_u32};
use crate::config::{
    BootConfig, BOOT_HEADER_MAGIC, EC_SIGNATURE_SIZE, HEADER_ALIGNMENT, HEADER_SIZE_LIMIT,
    MAX_PROOF_LEN, MIN_CODE_SIZE,
};
use crate::error::{ensure_len, HeaderError};
use crate::merkle;
use hal::{FlashArea, HashEngine, DIGEST_LEN};
use log::debug;
use serde::{Deserialize, Serialize};

/// Size of the fixed authenticated fields
pub const AUTH_FIELDS_SIZE: usize = 80;

/// Size of the fw_type byte plus padding preceding the signatures
const UNAUTH_PREFIX_SIZE: usize = 4;

/// Fixed authenticated fields of a boot header
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BootHeader {
    pub hw_model: u32,
    pub hw_revision: u32,
    pub version: u32,
    pub fix_version: u32,
    pub min_prev_version: u32,
    pub monotonic_version: u32,
    /// Key slots that signed this header
    pub sigmask: u32,
    pub header_size: u32,
    pub auth_size: u32,
    pub code_size: u32,
    pub storage_address: u32,
    /// Informational; verification recomputes the fingerprint
    pub merkle_root: [u8; DIGEST_LEN],
}

impl BootHeader {
    /// Serializes the fixed fields, magic included
    pub fn encode(&self) -> [u8; AUTH_FIELDS_SIZE] {
        let mut out = [0u8; AUTH_FIELDS_SIZE];
        let words = [
            BOOT_HEADER_MAGIC,
            self.hw_model,
            self.hw_revision,
            self.version,
            self.fix_version,
            self.min_prev_version,
            self.monotonic_version,
            self.sigmask,
            self.header_size,
            self.auth_size,
            self.code_size,
            self.storage_address,
        ];
        for (i, word) in words.iter().enumerate() {
            write_u32(&mut out, i * 4, *word);
        }
        out[48..80].copy_from_slice(&self.merkle_root);
        out
    }

    fn decode(data: &[u8]) -> Self {
        Self {
            hw_model: read_u32(data, 4),
            hw_revision: read_u32(data, 8),
            version: read_u32(data, 12),
            fix_version: read_u32(data, 16),
            min_prev_version: read_u32(data, 20),
            monotonic_version: read_u32(data, 24),
            sigmask: read_u32(data, 28),
            header_size: read_u32(data, 32),
            auth_size: read_u32(data, 36),
            code_size: read_u32(data, 40),
            storage_address: read_u32(data, 44),
            merkle_root: read_array(data, 48),
        }
    }
}

/// Proof path folded into the fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MerkleProof {
    nodes: Vec<[u8; DIGEST_LEN]>,
}

impl MerkleProof {
    pub fn new(nodes: Vec<[u8; DIGEST_LEN]>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[[u8; DIGEST_LEN]] {
        &self.nodes
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.nodes.len() * DIGEST_LEN
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        for node in &self.nodes {
            out.extend_from_slice(node);
        }
        out
    }
}

/// One signing slot's signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePair {
    pub ec: [u8; EC_SIGNATURE_SIZE],
    pub pq: Vec<u8>,
}

/// Signatures and mutable metadata outside the signed region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnauthenticatedBlock {
    pub fw_type: u8,
    pub signatures: Vec<SignaturePair>,
}

impl UnauthenticatedBlock {
    /// Encoded size for `count` pairs
    pub fn encoded_len(count: usize, pq_signature_size: usize) -> usize {
        UNAUTH_PREFIX_SIZE + count * (EC_SIGNATURE_SIZE + pq_signature_size)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.fw_type, 0, 0, 0];
        for pair in &self.signatures {
            out.extend_from_slice(&pair.ec);
            out.extend_from_slice(&pair.pq);
        }
        out
    }

    fn decode(data: &[u8], count: usize, pq_signature_size: usize) -> Self {
        let mut signatures = Vec::with_capacity(count);
        let mut offset = UNAUTH_PREFIX_SIZE;
        for _ in 0..count {
            let ec = read_array(data, offset);
            offset += EC_SIGNATURE_SIZE;
            let pq = data[offset..offset + pq_signature_size].to_vec();
            offset += pq_signature_size;
            signatures.push(SignaturePair { ec, pq });
        }
        Self {
            fw_type: data[0],
            signatures,
        }
    }
}

/// A structurally valid boot header
///
/// Only [`parse_header`] constructs this type, so holding one means every
/// structural check passed. It says nothing about signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    header: BootHeader,
    proof: MerkleProof,
    unauth: UnauthenticatedBlock,
    auth_bytes: Vec<u8>,
}

impl ParsedHeader {
    pub fn header(&self) -> &BootHeader {
        &self.header
    }

    pub fn proof(&self) -> &MerkleProof {
        &self.proof
    }

    pub fn unauthenticated(&self) -> &UnauthenticatedBlock {
        &self.unauth
    }

    /// Header bytes `[0, auth_size)`
    pub fn authenticated_bytes(&self) -> &[u8] {
        &self.auth_bytes
    }

    /// Fingerprint over `code`, which must be the code region
    pub fn fingerprint<H: HashEngine + ?Sized>(
        &self,
        hasher: &mut H,
        code: &[u8],
    ) -> [u8; DIGEST_LEN] {
        merkle::compute_fingerprint(hasher, &self.auth_bytes, self.proof.nodes(), code)
    }

    /// Fingerprint of the code stored right after the header in `area`
    pub fn fingerprint_from_flash<H: HashEngine + ?Sized>(
        &self,
        hasher: &mut H,
        area: &dyn FlashArea,
    ) -> Result<[u8; DIGEST_LEN], HeaderError> {
        let code = area.read(
            self.header.header_size as usize,
            self.header.code_size as usize,
        )?;
        Ok(self.fingerprint(hasher, code))
    }
}

/// Parses and structurally validates a boot header
///
/// `data` starts at the header; it must cover at least `header_size` bytes.
/// Checks run in a fixed order and the first failure is returned.
pub fn parse_header(data: &[u8], cfg: &BootConfig) -> Result<ParsedHeader, HeaderError> {
    ensure_len(data, 4)?;
    let magic = read_u32(data, 0);
    if magic != BOOT_HEADER_MAGIC {
        return Err(HeaderError::BadMagic {
            expected: BOOT_HEADER_MAGIC,
            found: magic,
        });
    }

    ensure_len(data, AUTH_FIELDS_SIZE)?;
    let header = BootHeader::decode(data);

    let header_size = header.header_size;
    if header_size == 0 || header_size % HEADER_ALIGNMENT != 0 || header_size >= HEADER_SIZE_LIMIT {
        return Err(HeaderError::BadHeaderSize(header_size));
    }
    if header.auth_size >= header_size {
        return Err(HeaderError::AuthSizeNotBelowHeaderSize {
            auth_size: header.auth_size,
            header_size,
        });
    }
    if (header.auth_size as usize) < AUTH_FIELDS_SIZE {
        return Err(HeaderError::AuthSizeTooSmall(header.auth_size));
    }
    if header.code_size < MIN_CODE_SIZE || header.code_size > cfg.code_size_limit {
        return Err(HeaderError::BadCodeSize(header.code_size));
    }
    if header.hw_model != cfg.hw_model || header.hw_revision != cfg.hw_revision {
        return Err(HeaderError::WrongModel {
            model: header.hw_model,
            revision: header.hw_revision,
        });
    }

    let header_size = header_size as usize;
    let auth_size = header.auth_size as usize;
    ensure_len(data, header_size)?;

    if auth_size + 4 > header_size {
        return Err(HeaderError::ProofOverflow { nodes: 0 });
    }
    let node_count = read_u32(data, auth_size);
    let proof_end = auth_size + 4 + (node_count as usize).min(MAX_PROOF_LEN + 1) * DIGEST_LEN;
    if node_count as usize > MAX_PROOF_LEN || proof_end > header_size {
        return Err(HeaderError::ProofOverflow { nodes: node_count });
    }
    let nodes = (0..node_count as usize)
        .map(|i| read_array(data, auth_size + 4 + i * DIGEST_LEN))
        .collect();

    let unauth_len =
        UnauthenticatedBlock::encoded_len(cfg.required_signatures, cfg.pq_signature_size);
    if proof_end + unauth_len > header_size {
        return Err(HeaderError::SignatureBlockOverflow);
    }
    let unauth = UnauthenticatedBlock::decode(
        &data[proof_end..proof_end + unauth_len],
        cfg.required_signatures,
        cfg.pq_signature_size,
    );

    debug!(
        "boot header ok: version {:#x} code {} bytes proof {} nodes",
        header.version, header.code_size, node_count
    );

    Ok(ParsedHeader {
        auth_bytes: data[..auth_size].to_vec(),
        header,
        proof: MerkleProof::new(nodes),
        unauth,
    })
}
