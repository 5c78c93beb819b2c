//! Header builders for the signing tool
//!
//! Each builder lays out a header exactly as the parser expects it and can
//! either emit it unsigned (zeroed signatures) or sign it with the given
//! signers. Builders do not validate; they will happily produce headers the
//! parser rejects, which is what rejection tests need.

use crate::boot_header::{
    BootHeader, MerkleProof, SignaturePair, UnauthenticatedBlock, AUTH_FIELDS_SIZE,
};
use crate::codec::{write_u16, write_u32};
use crate::config::{
    BootConfig, EC_PUBLIC_KEY_SIZE, EC_SIGNATURE_SIZE, FIRMWARE_IMAGE_MAGIC, IMAGE_CHUNK_HASHES,
    SECMON_IMAGE_MAGIC, SIG_BLOCK_SIZE, VENDOR_HEADER_MAGIC,
};
use crate::image_header::HASHES_OFFSET;
use crate::merkle;
use crate::sigmask::SignatureBlock;
use crate::vendor_header::zeroed_signature_fingerprint;
use hal::{HashEngine, MessageSigner, DIGEST_LEN};

/// Signers for one boot header key slot
#[derive(Clone, Copy)]
pub struct SlotSigner<'a> {
    pub ec: &'a dyn MessageSigner,
    pub pq: &'a dyn MessageSigner,
}

fn to_ec_signature(bytes: &[u8]) -> [u8; EC_SIGNATURE_SIZE] {
    let mut out = [0u8; EC_SIGNATURE_SIZE];
    let len = bytes.len().min(EC_SIGNATURE_SIZE);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Builds a sigmask from slot indices
pub fn sigmask_for(slots: &[usize]) -> u32 {
    slots.iter().fold(0, |mask, slot| mask | (1 << slot))
}

/// Boot header builder
#[derive(Debug, Clone)]
pub struct BootHeaderBuilder {
    header: BootHeader,
    proof: Vec<[u8; DIGEST_LEN]>,
    fw_type: u8,
    required_signatures: usize,
    pq_signature_size: usize,
}

impl BootHeaderBuilder {
    /// Starts from a minimal valid header for `cfg`: one 8K page,
    /// 1024 authenticated bytes, 8K of code, all slots `0..required` signing
    pub fn new(cfg: &BootConfig) -> Self {
        Self {
            header: BootHeader {
                hw_model: cfg.hw_model,
                hw_revision: cfg.hw_revision,
                sigmask: (1u32 << cfg.required_signatures) - 1,
                header_size: 8192,
                auth_size: 1024,
                code_size: 8192,
                ..BootHeader::default()
            },
            proof: Vec::new(),
            fw_type: 0,
            required_signatures: cfg.required_signatures,
            pq_signature_size: cfg.pq_signature_size,
        }
    }

    pub fn header_size(mut self, size: u32) -> Self {
        self.header.header_size = size;
        self
    }

    pub fn auth_size(mut self, size: u32) -> Self {
        self.header.auth_size = size;
        self
    }

    pub fn code_size(mut self, size: u32) -> Self {
        self.header.code_size = size;
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.header.version = version;
        self
    }

    pub fn fix_version(mut self, version: u32) -> Self {
        self.header.fix_version = version;
        self
    }

    pub fn min_prev_version(mut self, version: u32) -> Self {
        self.header.min_prev_version = version;
        self
    }

    pub fn monotonic_version(mut self, version: u32) -> Self {
        self.header.monotonic_version = version;
        self
    }

    pub fn storage_address(mut self, address: u32) -> Self {
        self.header.storage_address = address;
        self
    }

    pub fn sigmask(mut self, sigmask: u32) -> Self {
        self.header.sigmask = sigmask;
        self
    }

    pub fn merkle_root(mut self, root: [u8; DIGEST_LEN]) -> Self {
        self.header.merkle_root = root;
        self
    }

    pub fn proof(mut self, nodes: Vec<[u8; DIGEST_LEN]>) -> Self {
        self.proof = nodes;
        self
    }

    pub fn fw_type(mut self, fw_type: u8) -> Self {
        self.fw_type = fw_type;
        self
    }

    /// Header with zero-filled signatures
    pub fn build_unsigned(&self) -> Vec<u8> {
        self.layout(Vec::new())
    }

    /// Signs the header over `code` and returns the header region
    ///
    /// `signers` must be ordered by ascending key slot, matching the sigmask.
    pub fn sign<H: HashEngine + ?Sized>(
        &self,
        hasher: &mut H,
        code: &[u8],
        signers: &[SlotSigner<'_>],
    ) -> Vec<u8> {
        let unsigned = self.build_unsigned();
        let auth_end = (self.header.auth_size as usize).min(unsigned.len());
        let fingerprint =
            merkle::compute_fingerprint(hasher, &unsigned[..auth_end], &self.proof, code);

        let signatures = signers
            .iter()
            .map(|signer| {
                let pq = signer.pq.sign(&fingerprint);
                hasher.init();
                hasher.update(&fingerprint);
                hasher.update(&pq);
                let extended = hasher.finalize();
                SignaturePair {
                    ec: to_ec_signature(&signer.ec.sign(&extended)),
                    pq,
                }
            })
            .collect();
        self.layout(signatures)
    }

    fn layout(&self, mut signatures: Vec<SignaturePair>) -> Vec<u8> {
        while signatures.len() < self.required_signatures {
            signatures.push(SignaturePair {
                ec: [0; EC_SIGNATURE_SIZE],
                pq: vec![0; self.pq_signature_size],
            });
        }
        let proof = MerkleProof::new(self.proof.clone()).encode();
        let unauth = UnauthenticatedBlock {
            fw_type: self.fw_type,
            signatures,
        }
        .encode();

        let proof_start = (self.header.auth_size as usize).max(AUTH_FIELDS_SIZE);
        let unauth_start = proof_start + proof.len();
        let len = (self.header.header_size as usize).max(unauth_start + unauth.len());

        let mut out = vec![0u8; len];
        out[..AUTH_FIELDS_SIZE].copy_from_slice(&self.header.encode());
        out[proof_start..unauth_start].copy_from_slice(&proof);
        out[unauth_start..unauth_start + unauth.len()].copy_from_slice(&unauth);
        out
    }
}

/// Signs `fingerprint` with ascending-slot `signers` into a signature block
pub fn sign_block(
    fingerprint: &[u8; DIGEST_LEN],
    sigmask: u8,
    signers: &[&dyn MessageSigner],
) -> SignatureBlock {
    let mut block = SignatureBlock::empty();
    block.sigmask = sigmask;
    for (slot, signer) in block.signatures.iter_mut().zip(signers) {
        *slot = to_ec_signature(&signer.sign(fingerprint));
    }
    block
}

/// Vendor header builder
#[derive(Debug, Clone)]
pub struct VendorHeaderBuilder {
    version: u16,
    vsig_m: u8,
    keys: Vec<[u8; EC_PUBLIC_KEY_SIZE]>,
    vtrust: u16,
    hw_model: u32,
    fw_type: u8,
    vendor_string: Vec<u8>,
    hdrlen: Option<u32>,
}

impl VendorHeaderBuilder {
    pub fn new(cfg: &BootConfig) -> Self {
        Self {
            version: 1,
            vsig_m: 1,
            keys: Vec::new(),
            vtrust: 0,
            hw_model: cfg.hw_model,
            fw_type: 0,
            vendor_string: Vec::new(),
            hdrlen: None,
        }
    }

    /// Vendor image-signing keys and the number of signatures required
    pub fn keys(mut self, keys: Vec<[u8; EC_PUBLIC_KEY_SIZE]>, vsig_m: u8) -> Self {
        self.keys = keys;
        self.vsig_m = vsig_m;
        self
    }

    pub fn vendor_string(mut self, vendor: &str) -> Self {
        self.vendor_string = vendor.as_bytes().to_vec();
        self
    }

    pub fn vtrust(mut self, vtrust: u16) -> Self {
        self.vtrust = vtrust;
        self
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn hw_model(mut self, model: u32) -> Self {
        self.hw_model = model;
        self
    }

    pub fn fw_type(mut self, fw_type: u8) -> Self {
        self.fw_type = fw_type;
        self
    }

    /// Overrides the computed header length
    pub fn hdrlen(mut self, hdrlen: u32) -> Self {
        self.hdrlen = Some(hdrlen);
        self
    }

    pub fn build_unsigned(&self) -> Vec<u8> {
        self.layout(&SignatureBlock::empty())
    }

    pub fn sign<H: HashEngine + ?Sized>(
        &self,
        hasher: &mut H,
        sigmask: u8,
        signers: &[&dyn MessageSigner],
    ) -> Vec<u8> {
        let fingerprint = zeroed_signature_fingerprint(hasher, &self.build_unsigned());
        self.layout(&sign_block(&fingerprint, sigmask, signers))
    }

    fn layout(&self, block: &SignatureBlock) -> Vec<u8> {
        let vstr_len_offset = 32 + self.keys.len() * EC_PUBLIC_KEY_SIZE;
        let vstr_len = self.vendor_string.len().min(u8::MAX as usize);
        let needed = vstr_len_offset + 1 + vstr_len + SIG_BLOCK_SIZE;
        let hdrlen = self
            .hdrlen
            .map(|len| len as usize)
            .unwrap_or((needed + 511) & !511);

        let mut out = vec![0u8; hdrlen.max(needed)];
        write_u32(&mut out, 0, VENDOR_HEADER_MAGIC);
        write_u32(&mut out, 4, hdrlen as u32);
        write_u16(&mut out, 12, self.version);
        out[14] = self.vsig_m;
        out[15] = self.keys.len() as u8;
        write_u16(&mut out, 16, self.vtrust);
        write_u32(&mut out, 18, self.hw_model);
        out[22] = self.fw_type;
        for (i, key) in self.keys.iter().enumerate() {
            let start = 32 + i * EC_PUBLIC_KEY_SIZE;
            out[start..start + EC_PUBLIC_KEY_SIZE].copy_from_slice(key);
        }
        out[vstr_len_offset] = vstr_len as u8;
        out[vstr_len_offset + 1..vstr_len_offset + 1 + vstr_len]
            .copy_from_slice(&self.vendor_string[..vstr_len]);
        if hdrlen >= SIG_BLOCK_SIZE {
            out[hdrlen - SIG_BLOCK_SIZE..hdrlen].copy_from_slice(&block.encode());
        }
        out
    }
}

/// Firmware or secure monitor image header builder
#[derive(Debug, Clone)]
pub struct ImageHeaderBuilder {
    magic: u32,
    hdrlen: u32,
    expiry: u32,
    codelen: u32,
    version: u32,
    fix_version: u32,
    hw_model: u32,
    hw_revision: u32,
    monotonic_version: u32,
    hashes: [[u8; DIGEST_LEN]; IMAGE_CHUNK_HASHES],
}

impl ImageHeaderBuilder {
    fn with_magic(cfg: &BootConfig, magic: u32, expiry: u32) -> Self {
        Self {
            magic,
            hdrlen: 1024,
            expiry,
            codelen: 0,
            version: 0,
            fix_version: 0,
            hw_model: cfg.hw_model,
            hw_revision: cfg.hw_revision,
            monotonic_version: 0,
            hashes: [[0; DIGEST_LEN]; IMAGE_CHUNK_HASHES],
        }
    }

    /// Firmware header; expiry bit 0 set to mark a model-checked image
    pub fn firmware(cfg: &BootConfig) -> Self {
        Self::with_magic(cfg, FIRMWARE_IMAGE_MAGIC, 1)
    }

    pub fn secmon(cfg: &BootConfig) -> Self {
        Self::with_magic(cfg, SECMON_IMAGE_MAGIC, 0)
    }

    pub fn hdrlen(mut self, hdrlen: u32) -> Self {
        self.hdrlen = hdrlen;
        self
    }

    pub fn expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn codelen(mut self, codelen: u32) -> Self {
        self.codelen = codelen;
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn fix_version(mut self, version: u32) -> Self {
        self.fix_version = version;
        self
    }

    pub fn monotonic_version(mut self, version: u32) -> Self {
        self.monotonic_version = version;
        self
    }

    pub fn hw_revision(mut self, revision: u32) -> Self {
        self.hw_revision = revision;
        self
    }

    /// Sets `codelen` and the chunk hashes for `code` placed at `firstskip`
    pub fn code_hashes<H: HashEngine + ?Sized>(
        mut self,
        hasher: &mut H,
        code: &[u8],
        firstskip: usize,
        chunk_size: usize,
    ) -> Self {
        self.codelen = code.len() as u32;
        let mut offset = firstskip;
        let end = firstskip + code.len();
        while offset < end {
            let len = (chunk_size - offset % chunk_size).min(end - offset);
            let index = offset / chunk_size;
            if index < IMAGE_CHUNK_HASHES {
                let start = offset - firstskip;
                self.hashes[index] = hasher.digest(&code[start..start + len]);
            }
            offset += len;
        }
        self
    }

    /// Sets `codelen` and the single hash used by secure monitor images
    pub fn single_hash<H: HashEngine + ?Sized>(mut self, hasher: &mut H, code: &[u8]) -> Self {
        self.codelen = code.len() as u32;
        self.hashes[0] = hasher.digest(code);
        self
    }

    pub fn build_unsigned(&self) -> Vec<u8> {
        self.layout(&SignatureBlock::empty())
    }

    pub fn sign<H: HashEngine + ?Sized>(
        &self,
        hasher: &mut H,
        sigmask: u8,
        signers: &[&dyn MessageSigner],
    ) -> Vec<u8> {
        let fingerprint = zeroed_signature_fingerprint(hasher, &self.build_unsigned());
        self.layout(&sign_block(&fingerprint, sigmask, signers))
    }

    fn layout(&self, block: &SignatureBlock) -> Vec<u8> {
        let min_len = HASHES_OFFSET + IMAGE_CHUNK_HASHES * DIGEST_LEN + SIG_BLOCK_SIZE;
        let len = (self.hdrlen as usize).max(min_len);
        let mut out = vec![0u8; len];
        let words = [
            self.magic,
            self.hdrlen,
            self.expiry,
            self.codelen,
            self.version,
            self.fix_version,
            self.hw_model,
            self.hw_revision,
            self.monotonic_version,
        ];
        for (i, word) in words.iter().enumerate() {
            write_u32(&mut out, i * 4, *word);
        }
        for (i, hash) in self.hashes.iter().enumerate() {
            let start = HASHES_OFFSET + i * DIGEST_LEN;
            out[start..start + DIGEST_LEN].copy_from_slice(hash);
        }
        out[len - SIG_BLOCK_SIZE..].copy_from_slice(&block.encode());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot_header::parse_header;
    use crate::sigmask::{verify_signatures, KeySet};
    use crate::test_utils::{ec_signer, pq_signer, StandInPqVerifier};
    use hal::{Ed25519Verifier, Sha256Engine};

    #[test]
    fn test_sigmask_for() {
        assert_eq!(sigmask_for(&[0, 2]), 0b101);
        assert_eq!(sigmask_for(&[]), 0);
    }

    #[test]
    fn test_signed_boot_header_verifies() {
        let cfg = BootConfig::default();
        let ec = [ec_signer(1), ec_signer(2)];
        let pq = [pq_signer(1, &cfg), pq_signer(2, &cfg)];
        let keys = KeySet::new(
            ec.iter().map(|s| s.public_key_bytes()).collect(),
            pq.iter().map(|s| s.public_key()).collect(),
        );
        let code = vec![0x42; 8192];
        let mut hasher = Sha256Engine::new();

        let signers: Vec<SlotSigner> = ec
            .iter()
            .zip(&pq)
            .map(|(ec, pq)| SlotSigner { ec, pq })
            .collect();
        let bytes = BootHeaderBuilder::new(&cfg).sign(&mut hasher, &code, &signers);

        let parsed = parse_header(&bytes, &cfg).unwrap();
        let fingerprint = parsed.fingerprint(&mut hasher, &code);
        let pq_verifier = StandInPqVerifier::new(cfg.pq_signature_size);
        assert!(verify_signatures(
            &mut hasher,
            &parsed,
            &fingerprint,
            &keys,
            &Ed25519Verifier,
            &pq_verifier
        )
        .is_proven());
    }

    #[test]
    fn test_image_layout_places_signature_block_last() {
        let bytes = ImageHeaderBuilder::firmware(&BootConfig::default())
            .codelen(3072)
            .build_unsigned();
        assert_eq!(bytes.len(), 1024);
        assert_eq!(&bytes[0..4], b"TRZF");
        assert_eq!(bytes[1024 - SIG_BLOCK_SIZE], 0);
    }

    #[test]
    fn test_vendor_layout_rounds_to_512() {
        let bytes = VendorHeaderBuilder::new(&BootConfig::default())
            .keys(vec![[9; 32]; 4], 2)
            .vendor_string("x")
            .build_unsigned();
        assert_eq!(bytes.len(), 512);
        assert_eq!(&bytes[0..4], b"TRZV");
    }
}
