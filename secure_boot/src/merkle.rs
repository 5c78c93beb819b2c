//! Merkle fingerprint
//!
//! ```text
//! root = H(code)
//! root = H(0x00 || authenticated header bytes || root)
//! for node in proof:
//!     root = H(0x01 || min(node, root) || max(node, root))
//! ```
//!
//! The leaf and node prefixes keep a header leaf from being replayed as an
//! inner node. Sorting each pair means a proof does not encode left/right
//! positions.

use hal::{HashEngine, DIGEST_LEN};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Computes the fingerprint that boot header signatures cover
pub fn compute_fingerprint<H: HashEngine + ?Sized>(
    hasher: &mut H,
    auth_bytes: &[u8],
    proof: &[[u8; DIGEST_LEN]],
    code: &[u8],
) -> [u8; DIGEST_LEN] {
    let code_hash = hasher.digest(code);

    hasher.init();
    hasher.update(&[LEAF_PREFIX]);
    hasher.update(auth_bytes);
    hasher.update(&code_hash);
    let mut root = hasher.finalize();

    for node in proof {
        root = hash_node_pair(hasher, node, &root);
    }
    root
}

/// Hashes two sibling nodes in byte-lexicographic order
pub fn hash_node_pair<H: HashEngine + ?Sized>(
    hasher: &mut H,
    a: &[u8; DIGEST_LEN],
    b: &[u8; DIGEST_LEN],
) -> [u8; DIGEST_LEN] {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    hasher.init();
    hasher.update(&[NODE_PREFIX]);
    hasher.update(low);
    hasher.update(high);
    hasher.finalize()
}

/// Builds the proof for leaf `index` of a tree over `leaves`
///
/// Used by the signing tool when several headers share one signature. An
/// odd node at the end of a level is carried up unchanged.
pub fn build_proof<H: HashEngine + ?Sized>(
    hasher: &mut H,
    leaves: &[[u8; DIGEST_LEN]],
    mut index: usize,
) -> Vec<[u8; DIGEST_LEN]> {
    let mut proof = Vec::new();
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let sibling = index ^ 1;
        if sibling < level.len() {
            proof.push(level[sibling]);
        }
        level = level
            .chunks(2)
            .map(|pair| match pair.get(1) {
                Some(right) => hash_node_pair(hasher, &pair[0], right),
                None => pair[0],
            })
            .collect();
        index /= 2;
    }
    proof
}
