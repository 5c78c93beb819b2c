//! Image header (`TRZF` firmware, `TRZM` secure monitor)
//!
//! ```text
//! 0   u32 magic       16  u32 version        32  u32 monotonic_version
//! 4   u32 hdrlen      20  u32 fix_version    64  16 x 32-byte chunk hashes
//! 8   u32 expiry      24  u32 hw_model       hdrlen-193  signature block
//! 12  u32 codelen     28  u32 hw_revision
//! ```

use crate::codec::{read_array, read_u32};
use crate::config::{
    BootConfig, FirmwareLayout, EC_PUBLIC_KEY_SIZE, IMAGE_CHUNK_HASHES, SIG_BLOCK_SIZE,
};
use crate::error::{ensure_len, HeaderError};
use crate::sigmask::{verify_signature_block, SignatureBlock};
use crate::vendor_header::zeroed_signature_fingerprint;
use core_types::Trust;
use hal::{HashEngine, SignatureVerifier, DIGEST_LEN};

pub(crate) const HASHES_OFFSET: usize = 64;
pub(crate) const MIN_IMAGE_HEADER_SIZE: usize =
    HASHES_OFFSET + IMAGE_CHUNK_HASHES * DIGEST_LEN + SIG_BLOCK_SIZE;

/// Version split into its four bytes, major first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionQuad {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u8,
}

impl VersionQuad {
    pub fn from_u32(version: u32) -> Self {
        let [major, minor, patch, build] = version.to_le_bytes();
        Self {
            major,
            minor,
            patch,
            build,
        }
    }
}

impl std::fmt::Display for VersionQuad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

/// Parsed image header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: u32,
    pub hdrlen: u32,
    pub expiry: u32,
    pub codelen: u32,
    pub version: u32,
    pub fix_version: u32,
    pub hw_model: u32,
    pub hw_revision: u32,
    pub monotonic_version: u32,
    /// Per-chunk code hashes; a secure monitor uses only the first
    pub hashes: [[u8; DIGEST_LEN]; IMAGE_CHUNK_HASHES],
    pub signature_block: SignatureBlock,
    raw: Vec<u8>,
}

/// Parses a firmware image header with the given magic
///
/// Only bit 0 of `expiry` may be set. `maxsize` bounds header plus code.
pub fn read_image_header(
    data: &[u8],
    magic: u32,
    maxsize: usize,
    layout: &FirmwareLayout,
) -> Result<ImageHeader, HeaderError> {
    let header = parse_common(data, magic, maxsize, layout)?;
    if header.expiry & !1 != 0 {
        return Err(HeaderError::BadImageHeader("expiry set"));
    }
    Ok(header)
}

/// Shared by firmware and secure monitor headers
pub(crate) fn parse_common(
    data: &[u8],
    magic: u32,
    maxsize: usize,
    layout: &FirmwareLayout,
) -> Result<ImageHeader, HeaderError> {
    ensure_len(data, 4)?;
    let found = read_u32(data, 0);
    if found != magic {
        return Err(HeaderError::BadMagic {
            expected: magic,
            found,
        });
    }

    let expected_len = layout.image_header_size;
    if expected_len < MIN_IMAGE_HEADER_SIZE {
        return Err(HeaderError::BadImageHeader("layout header size too small"));
    }
    ensure_len(data, expected_len)?;

    let hdrlen = read_u32(data, 4);
    if hdrlen as usize != expected_len {
        return Err(HeaderError::BadImageHeader("header length"));
    }

    let codelen = read_u32(data, 12);
    let total = hdrlen as usize + codelen as usize;
    if codelen as usize > maxsize.saturating_sub(hdrlen as usize) {
        return Err(HeaderError::BadImageHeader("code too long"));
    }
    if total < 4 * 1024 {
        return Err(HeaderError::BadImageHeader("image too short"));
    }
    if total % 512 != 0 {
        return Err(HeaderError::BadImageHeader("image not 512-byte aligned"));
    }

    let mut hashes = [[0u8; DIGEST_LEN]; IMAGE_CHUNK_HASHES];
    for (i, hash) in hashes.iter_mut().enumerate() {
        *hash = read_array(data, HASHES_OFFSET + i * DIGEST_LEN);
    }

    let len = expected_len;
    Ok(ImageHeader {
        magic,
        hdrlen,
        expiry: read_u32(data, 8),
        codelen,
        version: read_u32(data, 16),
        fix_version: read_u32(data, 20),
        hw_model: read_u32(data, 24),
        hw_revision: read_u32(data, 28),
        monotonic_version: read_u32(data, 32),
        hashes,
        signature_block: SignatureBlock::decode(&data[len - SIG_BLOCK_SIZE..len]),
        raw: data[..len].to_vec(),
    })
}

impl ImageHeader {
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Checks the hardware binding of a firmware image
    ///
    /// Expiry bit 0 marks images built with the model check; images
    /// without it could run on loaders that never check the model.
    pub fn check_model(&self, cfg: &BootConfig) -> Trust {
        if self.expiry & 1 == 0 {
            return Trust::UNPROVEN;
        }
        self.check_hardware(cfg)
    }

    pub(crate) fn check_hardware(&self, cfg: &BootConfig) -> Trust {
        Trust::from_bool(self.hw_model == cfg.hw_model)
            .and(Trust::from_bool(self.hw_revision == cfg.hw_revision))
    }

    /// Hash of the header with the signature block zeroed
    pub fn fingerprint<H: HashEngine + ?Sized>(&self, hasher: &mut H) -> [u8; DIGEST_LEN] {
        zeroed_signature_fingerprint(hasher, &self.raw)
    }

    /// Verifies the header signature with `key_m` of `keys`
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

    pub fn version_quad(&self) -> VersionQuad {
        VersionQuad::from_u32(self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ImageHeaderBuilder;
    use crate::codec::write_u32;
    use crate::config::{FIRMWARE_IMAGE_MAGIC, SECMON_IMAGE_MAGIC};

    fn layout() -> FirmwareLayout {
        FirmwareLayout::default()
    }

    fn sample(codelen: u32) -> Vec<u8> {
        ImageHeaderBuilder::firmware(&BootConfig::default())
            .codelen(codelen)
            .version(0x0400_0902)
            .build_unsigned()
    }

    #[test]
    fn test_parse_fields() {
        let hdr = read_image_header(&sample(7 * 1024), FIRMWARE_IMAGE_MAGIC, 1 << 20, &layout())
            .unwrap();
        assert_eq!(hdr.hdrlen, 1024);
        assert_eq!(hdr.codelen, 7 * 1024);
        assert_eq!(hdr.version_quad().to_string(), "2.9.0.4");
        assert!(hdr.check_model(&BootConfig::default()).is_proven());
    }

    #[test]
    fn test_wrong_magic() {
        assert!(matches!(
            read_image_header(&sample(7 * 1024), SECMON_IMAGE_MAGIC, 1 << 20, &layout()),
            Err(HeaderError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_size_rules() {
        let cases = [
            (2 * 1024, "image too short"),
            (7 * 1024 + 100, "image not 512-byte aligned"),
            (1 << 20, "code too long"),
        ];
        for (codelen, reason) in cases {
            assert_eq!(
                read_image_header(&sample(codelen), FIRMWARE_IMAGE_MAGIC, 1 << 20, &layout()),
                Err(HeaderError::BadImageHeader(reason))
            );
        }
    }

    #[test]
    fn test_expiry_rules() {
        let mut bytes = sample(7 * 1024);
        write_u32(&mut bytes, 8, 2);
        assert_eq!(
            read_image_header(&bytes, FIRMWARE_IMAGE_MAGIC, 1 << 20, &layout()),
            Err(HeaderError::BadImageHeader("expiry set"))
        );

        write_u32(&mut bytes, 8, 0);
        let hdr = read_image_header(&bytes, FIRMWARE_IMAGE_MAGIC, 1 << 20, &layout()).unwrap();
        assert!(!hdr.check_model(&BootConfig::default()).is_proven());
    }

    #[test]
    fn test_model_mismatch() {
        let cfg = BootConfig {
            hw_revision: 9,
            ..BootConfig::default()
        };
        let hdr = read_image_header(&sample(7 * 1024), FIRMWARE_IMAGE_MAGIC, 1 << 20, &layout())
            .unwrap();
        assert!(!hdr.check_model(&cfg).is_proven());
    }
}
