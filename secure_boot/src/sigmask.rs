//! Signature verification over a sigmask
//!
//! A sigmask selects which fixed key slots co-signed an image. Slots are
//! consumed lowest bit first. Two accumulators track progress: the
//! remaining mask counts down and the used mask counts up. Verification
//! passes only if the first ends empty and the second equals the original
//! mask, so skipping a single branch cannot produce acceptance.

use crate::boot_header::ParsedHeader;
use crate::codec::read_array;
use crate::config::{EC_PUBLIC_KEY_SIZE, EC_SIGNATURE_SIZE, MAX_BLOCK_SIGNATURES, SIG_BLOCK_SIZE};
use core_types::Trust;
use hal::{HashEngine, SignatureVerifier, DIGEST_LEN};
use log::debug;
use std::hint::black_box;

/// Public keys of the boot header signing slots
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeySet {
    pub ec: Vec<[u8; EC_PUBLIC_KEY_SIZE]>,
    pub pq: Vec<Vec<u8>>,
}

impl KeySet {
    pub fn new(ec: Vec<[u8; EC_PUBLIC_KEY_SIZE]>, pq: Vec<Vec<u8>>) -> Self {
        Self { ec, pq }
    }

    /// Number of complete slots
    pub fn len(&self) -> usize {
        self.ec.len().min(self.pq.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trailing signature block of vendor, image and secmon headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    pub sigmask: u8,
    pub signatures: [[u8; EC_SIGNATURE_SIZE]; MAX_BLOCK_SIGNATURES],
}

impl SignatureBlock {
    pub fn empty() -> Self {
        Self {
            sigmask: 0,
            signatures: [[0; EC_SIGNATURE_SIZE]; MAX_BLOCK_SIGNATURES],
        }
    }

    /// Decodes a block; `data` must hold `SIG_BLOCK_SIZE` bytes
    pub(crate) fn decode(data: &[u8]) -> Self {
        let mut signatures = [[0; EC_SIGNATURE_SIZE]; MAX_BLOCK_SIGNATURES];
        for (i, sig) in signatures.iter_mut().enumerate() {
            *sig = read_array(data, 1 + i * EC_SIGNATURE_SIZE);
        }
        Self {
            sigmask: data[0],
            signatures,
        }
    }

    pub fn encode(&self) -> [u8; SIG_BLOCK_SIZE] {
        let mut out = [0u8; SIG_BLOCK_SIZE];
        out[0] = self.sigmask;
        for (i, sig) in self.signatures.iter().enumerate() {
            let start = 1 + i * EC_SIGNATURE_SIZE;
            out[start..start + EC_SIGNATURE_SIZE].copy_from_slice(sig);
        }
        out
    }
}

/// Walks `required` slots of `sigmask`, lowest bit first
///
/// `check_slot(signature_index, key_index)` verifies one slot.
fn consume_sigmask<F>(sigmask: u32, required: usize, key_count: usize, mut check_slot: F) -> Trust
where
    F: FnMut(usize, usize) -> bool,
{
    if required == 0 {
        return Trust::UNPROVEN;
    }

    let mut remaining = sigmask;
    let mut used = 0u32;

    for signature_index in 0..required {
        if remaining == 0 {
            return Trust::UNPROVEN;
        }
        let key_index = remaining.trailing_zeros() as usize;
        if key_index >= key_count {
            return Trust::UNPROVEN;
        }
        if !check_slot(signature_index, key_index) {
            return Trust::UNPROVEN;
        }
        remaining &= !(1u32 << key_index);
        used |= 1u32 << key_index;
    }

    Trust::from_bool(black_box(remaining) == 0).and(Trust::from_bool(black_box(used) == sigmask))
}

/// Verifies the EC + PQ signature pairs of a boot header
///
/// For each slot the EC signature covers `H(fingerprint || pq_signature)`
/// and the PQ signature covers the fingerprint itself.
pub fn verify_signatures<H, E, P>(
    hasher: &mut H,
    header: &ParsedHeader,
    fingerprint: &[u8; DIGEST_LEN],
    keys: &KeySet,
    ec: &E,
    pq: &P,
) -> Trust
where
    H: HashEngine + ?Sized,
    E: SignatureVerifier + ?Sized,
    P: SignatureVerifier + ?Sized,
{
    let pairs = &header.unauthenticated().signatures;
    let trust = consume_sigmask(header.header().sigmask, pairs.len(), keys.len(), |i, slot| {
        let pair = &pairs[i];
        hasher.init();
        hasher.update(fingerprint);
        hasher.update(&pair.pq);
        let extended = hasher.finalize();

        let ec_ok = ec.verify(&keys.ec[slot], &extended, &pair.ec);
        let pq_ok = pq.verify(&keys.pq[slot], fingerprint, &pair.pq);
        ec_ok && pq_ok
    });
    debug!("boot header signatures: {:?}", trust);
    trust
}

/// Verifies a vendor/image/secmon signature block
///
/// `key_m` of the first `keys.len()` slots must sign `fingerprint`. Mask
/// bits beyond the key table are ignored, as in the header format.
pub fn verify_signature_block<E>(
    fingerprint: &[u8; DIGEST_LEN],
    block: &SignatureBlock,
    key_m: u8,
    keys: &[[u8; EC_PUBLIC_KEY_SIZE]],
    ec: &E,
) -> Trust
where
    E: SignatureVerifier + ?Sized,
{
    let key_n = keys.len().min(8);
    let key_m = key_m as usize;
    if key_m == 0 || key_n == 0 || key_m > key_n || key_m > MAX_BLOCK_SIGNATURES {
        return Trust::UNPROVEN;
    }

    let sigmask = u32::from(block.sigmask) & ((1u32 << key_n) - 1);
    consume_sigmask(sigmask, key_m, key_n, |i, slot| {
        ec.verify(&keys[slot], fingerprint, &block.signatures[i])
    })
}
