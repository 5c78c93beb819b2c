//! Vendor header (`TRZV`)
//!
//! ```text
//! 0   u32 magic          14  u8  vsig_m        22  u8  fw_type
//! 4   u32 hdrlen         15  u8  vsig_n        32  vsig_n x 32-byte keys
//! 8   u32 expiry (0)     16  u16 vtrust        ..  u8 vstr_len, vstr
//! 12  u16 version        18  u32 hw_model      hdrlen-193  signature block
//! ```

use crate::codec::{read_array, read_u16, read_u32};
use crate::config::{
    BootConfig, FirmwareLayout, EC_PUBLIC_KEY_SIZE, MAX_VENDOR_PUBLIC_KEYS, SIG_BLOCK_SIZE,
    VENDOR_HEADER_MAGIC,
};
use crate::error::{ensure_len, HeaderError};
use crate::sigmask::{verify_signature_block, SignatureBlock};
use core_types::Trust;
use hal::{HashEngine, SignatureVerifier, DIGEST_LEN};

const KEYS_OFFSET: usize = 32;
const LOCK_HASH_SUFFIX: &[u8] = b"Trezor Vendor Header";

/// Vendor trust flags
///
/// Bits are inverted: a set bit switches a warning off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VendorTrust(pub u16);

impl VendorTrust {
    pub const WAIT_MASK: u16 = 0x000F;
    pub const NO_RED: u16 = 0x0010;
    pub const NO_CLICK: u16 = 0x0020;
    pub const NO_STRING: u16 = 0x0040;
    pub const SECRET_MASK: u16 = 0x0300;
    pub const SECRET_ALLOW: u16 = 0x0000;

    /// Seconds to show the unofficial-firmware warning
    pub fn warning_delay_secs(self) -> u8 {
        ((self.0 & Self::WAIT_MASK) ^ Self::WAIT_MASK) as u8
    }

    pub fn red_background(self) -> bool {
        self.0 & Self::NO_RED == 0
    }

    pub fn requires_click(self) -> bool {
        self.0 & Self::NO_CLICK == 0
    }

    pub fn shows_vendor_string(self) -> bool {
        self.0 & Self::NO_STRING == 0
    }

    /// Whether the firmware may access device secrets
    pub fn allows_secret_access(self) -> bool {
        self.0 & Self::SECRET_MASK == Self::SECRET_ALLOW
    }

    /// True if no warning of any kind is shown
    pub fn is_full_trust(self) -> bool {
        self.warning_delay_secs() == 0
            && !self.red_background()
            && !self.requires_click()
            && !self.shows_vendor_string()
    }
}

/// Parsed vendor header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorHeader {
    pub hdrlen: u32,
    pub version: u16,
    pub vsig_m: u8,
    pub vsig_n: u8,
    pub vtrust: VendorTrust,
    pub hw_model: u32,
    pub fw_type: u8,
    pub keys: Vec<[u8; EC_PUBLIC_KEY_SIZE]>,
    pub vendor_string: Vec<u8>,
    pub signature_block: SignatureBlock,
    raw: Vec<u8>,
}

/// Parses a vendor header at the start of `data`
pub fn read_vendor_header(
    data: &[u8],
    layout: &FirmwareLayout,
) -> Result<VendorHeader, HeaderError> {
    ensure_len(data, KEYS_OFFSET)?;
    let magic = read_u32(data, 0);
    if magic != VENDOR_HEADER_MAGIC {
        return Err(HeaderError::BadMagic {
            expected: VENDOR_HEADER_MAGIC,
            found: magic,
        });
    }

    let hdrlen = read_u32(data, 4);
    let len = hdrlen as usize;
    if len > layout.vendor_header_max_size {
        return Err(HeaderError::BadVendorHeader("header too long"));
    }
    if len < KEYS_OFFSET + 1 + SIG_BLOCK_SIZE {
        return Err(HeaderError::BadVendorHeader("header too short"));
    }
    ensure_len(data, len)?;

    if read_u32(data, 8) != 0 {
        return Err(HeaderError::BadVendorHeader("expiry set"));
    }

    let vsig_n = data[15];
    if vsig_n as usize > MAX_VENDOR_PUBLIC_KEYS {
        return Err(HeaderError::BadVendorHeader("too many keys"));
    }

    let sig_offset = len - SIG_BLOCK_SIZE;
    let vstr_len_offset = KEYS_OFFSET + vsig_n as usize * EC_PUBLIC_KEY_SIZE;
    if vstr_len_offset >= sig_offset {
        return Err(HeaderError::BadVendorHeader("keys overlap signatures"));
    }
    let vstr_start = vstr_len_offset + 1;
    let vstr_end = vstr_start + data[vstr_len_offset] as usize;
    if vstr_end > sig_offset {
        return Err(HeaderError::BadVendorHeader("vendor string overlaps signatures"));
    }

    let keys = (0..vsig_n as usize)
        .map(|i| read_array(data, KEYS_OFFSET + i * EC_PUBLIC_KEY_SIZE))
        .collect();

    Ok(VendorHeader {
        hdrlen,
        version: read_u16(data, 12),
        vsig_m: data[14],
        vsig_n,
        vtrust: VendorTrust(read_u16(data, 16)),
        hw_model: read_u32(data, 18),
        fw_type: data[22],
        keys,
        vendor_string: data[vstr_start..vstr_end].to_vec(),
        signature_block: SignatureBlock::decode(&data[sig_offset..len]),
        raw: data[..len].to_vec(),
    })
}

impl VendorHeader {
    /// Raw header bytes, signature block included
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Hash of the header with the signature block zeroed
    pub fn fingerprint<H: HashEngine + ?Sized>(&self, hasher: &mut H) -> [u8; DIGEST_LEN] {
        zeroed_signature_fingerprint(hasher, &self.raw)
    }

    /// Value stored in the OTP vendor lock for this vendor
    pub fn lock_hash<H: HashEngine + ?Sized>(&self, hasher: &mut H) -> [u8; DIGEST_LEN] {
        hasher.init();
        hasher.update(&self.vendor_string);
        hasher.update(LOCK_HASH_SUFFIX);
        hasher.finalize()
    }

    pub fn check_model(&self, cfg: &BootConfig) -> Trust {
        Trust::from_bool(self.hw_model == cfg.hw_model)
    }

    /// Verifies the header against the bootloader's vendor-signing keys
    pub fn check_signature<H, E>(
        &self,
        hasher: &mut H,
        key_m: u8,
        keys: &[[u8; EC_PUBLIC_KEY_SIZE]],
        ec: &E,
    ) -> Trust
    where
        H: HashEngine + ?Sized,
        E: SignatureVerifier + ?Sized,
    {
        let fingerprint = self.fingerprint(hasher);
        verify_signature_block(&fingerprint, &self.signature_block, key_m, keys, ec)
    }

    pub fn vendor_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.vendor_string).into_owned()
    }
}

/// Hashes `header` with its trailing signature block replaced by zeros
pub(crate) fn zeroed_signature_fingerprint<H: HashEngine + ?Sized>(
    hasher: &mut H,
    header: &[u8],
) -> [u8; DIGEST_LEN] {
    let signed_len = header.len().saturating_sub(SIG_BLOCK_SIZE);
    hasher.init();
    hasher.update(&header[..signed_len]);
    hasher.update(&[0u8; SIG_BLOCK_SIZE]);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::VendorHeaderBuilder;
    use crate::codec::write_u32;
    use hal::Sha256Engine;

    fn layout() -> FirmwareLayout {
        FirmwareLayout::default()
    }

    fn sample() -> Vec<u8> {
        VendorHeaderBuilder::new(&BootConfig::default())
            .keys(vec![[1; 32], [2; 32], [3; 32]], 2)
            .vendor_string("Acme Wallets")
            .vtrust(0x0070)
            .build_unsigned()
    }

    #[test]
    fn test_parse_fields() {
        let vhdr = read_vendor_header(&sample(), &layout()).unwrap();
        assert_eq!(vhdr.vsig_m, 2);
        assert_eq!(vhdr.vsig_n, 3);
        assert_eq!(vhdr.keys[1], [2; 32]);
        assert_eq!(vhdr.vendor_string_lossy(), "Acme Wallets");
        assert_eq!(vhdr.hdrlen as usize % 512, 0);
        assert!(vhdr.check_model(&BootConfig::default()).is_proven());
    }

    #[test]
    fn test_rejects_expiry() {
        let mut bytes = sample();
        write_u32(&mut bytes, 8, 1);
        assert_eq!(
            read_vendor_header(&bytes, &layout()),
            Err(HeaderError::BadVendorHeader("expiry set"))
        );
    }

    #[test]
    fn test_rejects_too_many_keys() {
        let mut bytes = sample();
        bytes[15] = 9;
        assert_eq!(
            read_vendor_header(&bytes, &layout()),
            Err(HeaderError::BadVendorHeader("too many keys"))
        );
    }

    #[test]
    fn test_rejects_string_overlapping_signatures() {
        let mut bytes = sample();
        // 512-byte header: signatures start at 319, the string would end at 384
        bytes[32 + 3 * 32] = 255;
        assert_eq!(
            read_vendor_header(&bytes, &layout()),
            Err(HeaderError::BadVendorHeader("vendor string overlaps signatures"))
        );
    }

    #[test]
    fn test_fingerprint_ignores_signatures() {
        let bytes = sample();
        let mut signed = bytes.clone();
        let len = signed.len();
        signed[len - 1] = 0x55;
        let mut hasher = Sha256Engine::new();
        let a = read_vendor_header(&bytes, &layout()).unwrap().fingerprint(&mut hasher);
        let b = read_vendor_header(&signed, &layout()).unwrap().fingerprint(&mut hasher);
        assert_eq!(a, b);
    }

    #[test]
    fn test_lock_hash_depends_on_vendor_string() {
        let mut hasher = Sha256Engine::new();
        let vhdr = read_vendor_header(&sample(), &layout()).unwrap();
        let mut expected = Sha256Engine::new();
        expected.update(b"Acme Wallets");
        expected.update(b"Trezor Vendor Header");
        assert_eq!(vhdr.lock_hash(&mut hasher), expected.finalize());
    }

    #[test]
    fn test_vtrust_flags() {
        let none = VendorTrust(0);
        assert_eq!(none.warning_delay_secs(), 15);
        assert!(none.red_background());
        assert!(none.requires_click());
        assert!(none.allows_secret_access());
        assert!(!none.is_full_trust());

        let full = VendorTrust(0x007F);
        assert!(full.is_full_trust());
        assert!(!VendorTrust(0x0100).allows_secret_access());
    }
}
