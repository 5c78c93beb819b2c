//! Shared fixtures for boot chain tests
//!
//! Deterministic keys, a stand-in post-quantum scheme and helpers that
//! produce correctly signed bootloader and firmware images. Used by the unit
//! tests here and by `tests_resilience`.

use crate::builder::{
    sigmask_for, BootHeaderBuilder, ImageHeaderBuilder, SlotSigner, VendorHeaderBuilder,
};
use crate::config::{BootConfig, FirmwareLayout};
use crate::fw_check::FirmwareKeys;
use crate::sigmask::KeySet;
use hal::{
    Ed25519Signer, HashEngine, MessageSigner, RamFlash, Sha256Engine, SignatureVerifier,
    DIGEST_LEN,
};
use subtle::ConstantTimeEq;

/// Ed25519 signer with the seed `[seed; 32]`
pub fn ec_signer(seed: u8) -> Ed25519Signer {
    Ed25519Signer::from_seed(&[seed; 32])
}

/// Stand-in PQ signer sized for `cfg`
pub fn pq_signer(seed: u8, cfg: &BootConfig) -> StandInPqSigner {
    StandInPqSigner::new([seed ^ 0x5A; 32], cfg.pq_signature_size)
}

/// Expands `H(key || message || counter)` blocks to `len` bytes
fn expand(key: &[u8], message: &[u8], len: usize) -> Vec<u8> {
    let mut hasher = Sha256Engine::new();
    let mut out = Vec::with_capacity(len + DIGEST_LEN);
    let mut counter = 0u32;
    while out.len() < len {
        hasher.init();
        hasher.update(key);
        hasher.update(message);
        hasher.update(&counter.to_le_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

/// Deterministic hash-based stand-in for the post-quantum scheme
///
/// Symmetric: the "public key" is the secret. Good enough to exercise the
/// PQ half of the signature pairs, worthless as a real signature.
#[derive(Debug, Clone)]
pub struct StandInPqSigner {
    key: [u8; 32],
    signature_size: usize,
}

impl StandInPqSigner {
    pub fn new(key: [u8; 32], signature_size: usize) -> Self {
        Self { key, signature_size }
    }
}

impl MessageSigner for StandInPqSigner {
    fn public_key(&self) -> Vec<u8> {
        self.key.to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        expand(&self.key, message, self.signature_size)
    }
}

/// Verifier for [`StandInPqSigner`] signatures
#[derive(Debug, Clone, Copy)]
pub struct StandInPqVerifier {
    signature_size: usize,
}

impl StandInPqVerifier {
    pub fn new(signature_size: usize) -> Self {
        Self { signature_size }
    }
}

impl SignatureVerifier for StandInPqVerifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        if public_key.len() != 32 || signature.len() != self.signature_size {
            return false;
        }
        let expected = expand(public_key, message, self.signature_size);
        bool::from(expected[..].ct_eq(signature))
    }
}

/// SHA-256 engine that counts finished digests
#[derive(Debug, Clone, Default)]
pub struct CountingHasher {
    inner: Sha256Engine,
    pub digests: usize,
}

impl CountingHasher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashEngine for CountingHasher {
    fn init(&mut self) {
        self.inner.init();
    }

    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finalize(&mut self) -> [u8; DIGEST_LEN] {
        self.digests += 1;
        self.inner.finalize()
    }
}

/// Deterministic non-uniform code bytes
pub fn code_pattern(len: usize, salt: u8) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + salt as usize) % 251) as u8).collect()
}

/// Three boot header key slots and 8K of boot code
pub struct BootloaderFixture {
    pub cfg: BootConfig,
    pub ec_signers: Vec<Ed25519Signer>,
    pub pq_signers: Vec<StandInPqSigner>,
    pub code: Vec<u8>,
}

impl BootloaderFixture {
    pub fn new() -> Self {
        let cfg = BootConfig::default();
        let ec_signers = (1..=3).map(ec_signer).collect();
        let pq_signers = (1..=3).map(|seed| pq_signer(seed, &cfg)).collect();
        Self {
            cfg,
            ec_signers,
            pq_signers,
            code: code_pattern(8192, 0),
        }
    }

    /// Public key table matching the signers
    pub fn keys(&self) -> KeySet {
        KeySet::new(
            self.ec_signers.iter().map(Ed25519Signer::public_key_bytes).collect(),
            self.pq_signers.iter().map(|s| s.public_key()).collect(),
        )
    }

    pub fn pq_verifier(&self) -> StandInPqVerifier {
        StandInPqVerifier::new(self.cfg.pq_signature_size)
    }

    /// Builder sized for the fixture code
    pub fn builder(&self) -> BootHeaderBuilder {
        BootHeaderBuilder::new(&self.cfg).code_size(self.code.len() as u32)
    }

    /// Signs the header built by `builder` with the given slots, as is
    pub fn sign(&self, builder: &BootHeaderBuilder, slots: &[usize]) -> Vec<u8> {
        let signers: Vec<SlotSigner> = slots
            .iter()
            .map(|&slot| SlotSigner {
                ec: &self.ec_signers[slot],
                pq: &self.pq_signers[slot],
            })
            .collect();
        builder.sign(&mut Sha256Engine::new(), &self.code, &signers)
    }

    /// Header followed by the code
    pub fn image(&self, header: &[u8]) -> Vec<u8> {
        let mut image = header.to_vec();
        image.extend_from_slice(&self.code);
        image
    }

    /// Complete image signed by `slots`, sigmask set to match
    pub fn signed_image(&self, slots: &[usize]) -> Vec<u8> {
        let builder = self.builder().sigmask(sigmask_for(slots));
        self.image(&self.sign(&builder, slots))
    }
}

impl Default for BootloaderFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Vendor, image and secmon signers over a 64K firmware area
pub struct FirmwareFixture {
    pub cfg: BootConfig,
    pub layout: FirmwareLayout,
    /// Bootloader keys that sign vendor headers
    pub bootloader_signers: Vec<Ed25519Signer>,
    /// Vendor keys listed in the vendor header
    pub vendor_signers: Vec<Ed25519Signer>,
    pub secmon_signers: Vec<Ed25519Signer>,
    pub code: Vec<u8>,
}

impl FirmwareFixture {
    pub fn new() -> Self {
        Self {
            cfg: BootConfig::default(),
            layout: FirmwareLayout {
                image_header_size: 1024,
                vendor_header_max_size: 64 * 1024,
                chunk_size: 8 * 1024,
                firmware_max_size: 64 * 1024,
            },
            bootloader_signers: (10..13).map(ec_signer).collect(),
            vendor_signers: (20..23).map(ec_signer).collect(),
            secmon_signers: (30..33).map(ec_signer).collect(),
            code: code_pattern(20 * 1024, 7),
        }
    }

    /// Fixture with secure monitor verification enabled and a signed
    /// secure monitor at the start of the code
    pub fn with_secmon(monotonic_version: u32) -> Self {
        let mut fixture = Self::new();
        fixture.cfg.secmon_verification = true;
        let payload = fixture.secmon_payload(monotonic_version);
        fixture.code[..payload.len()].copy_from_slice(&payload);
        fixture
    }

    pub fn keys(&self) -> FirmwareKeys {
        FirmwareKeys {
            vendor_keys: self
                .bootloader_signers
                .iter()
                .map(Ed25519Signer::public_key_bytes)
                .collect(),
            vendor_sig_m: 2,
            secmon_keys: self.secmon_signers.iter().map(Ed25519Signer::public_key_bytes).collect(),
            secmon_sig_m: 2,
        }
    }

    pub fn vendor_builder(&self) -> VendorHeaderBuilder {
        let keys = self.vendor_signers.iter().map(Ed25519Signer::public_key_bytes).collect();
        VendorHeaderBuilder::new(&self.cfg)
            .keys(keys, 2)
            .vendor_string("Acme Wallets")
    }

    /// Signs a vendor header with the bootloader keys at `slots`
    pub fn sign_vendor(&self, builder: &VendorHeaderBuilder, slots: &[usize]) -> Vec<u8> {
        let signers: Vec<&dyn MessageSigner> = slots
            .iter()
            .map(|&slot| &self.bootloader_signers[slot] as &dyn MessageSigner)
            .collect();
        builder.sign(&mut Sha256Engine::new(), sigmask_for(slots) as u8, &signers)
    }

    /// Image header builder with chunk hashes for `code` placed after a
    /// vendor header of `vendor_len` bytes
    pub fn image_builder(&self, vendor_len: usize, code: &[u8]) -> ImageHeaderBuilder {
        let firstskip = vendor_len + self.layout.image_header_size;
        ImageHeaderBuilder::firmware(&self.cfg).version(0x0004_0302).code_hashes(
            &mut Sha256Engine::new(),
            code,
            firstskip,
            self.layout.chunk_size,
        )
    }

    /// Signs an image header with the vendor keys at `slots`
    pub fn sign_image(&self, builder: &ImageHeaderBuilder, slots: &[usize]) -> Vec<u8> {
        let signers: Vec<&dyn MessageSigner> =
            slots.iter().map(|&slot| &self.vendor_signers[slot] as &dyn MessageSigner).collect();
        builder.sign(&mut Sha256Engine::new(), sigmask_for(slots) as u8, &signers)
    }

    /// Signed secure monitor header followed by 3K of secure monitor code
    pub fn secmon_payload(&self, monotonic_version: u32) -> Vec<u8> {
        let code = code_pattern(3 * 1024, 99);
        let builder = ImageHeaderBuilder::secmon(&self.cfg)
            .monotonic_version(monotonic_version)
            .single_hash(&mut Sha256Engine::new(), &code);
        let signers: Vec<&dyn MessageSigner> =
            self.secmon_signers[..2].iter().map(|s| s as &dyn MessageSigner).collect();
        let mut payload = builder.sign(&mut Sha256Engine::new(), 0b011, &signers);
        payload.extend_from_slice(&code);
        payload
    }

    /// Vendor header, image header and code in an erased firmware area
    pub fn assemble(&self, vendor: &[u8], image: &[u8], code: &[u8]) -> RamFlash {
        let mut bytes = vendor.to_vec();
        bytes.extend_from_slice(image);
        bytes.extend_from_slice(code);
        RamFlash::with_image(&bytes, self.layout.firmware_max_size)
    }

    /// A firmware area that passes every check
    pub fn valid_area(&self) -> RamFlash {
        self.area_with(|image| image)
    }

    /// A signed firmware area whose image header builder is adjusted first
    pub fn area_with<F>(&self, adjust: F) -> RamFlash
    where
        F: FnOnce(ImageHeaderBuilder) -> ImageHeaderBuilder,
    {
        let vendor = self.sign_vendor(&self.vendor_builder(), &[0, 1]);
        let builder = adjust(self.image_builder(vendor.len(), &self.code));
        let image = self.sign_image(&builder, &[0, 2]);
        self.assemble(&vendor, &image, &self.code)
    }
}

impl Default for FirmwareFixture {
    fn default() -> Self {
        Self::new()
    }
}
