//! Secure monitor header (`TRZM`)
//!
//! The secure monitor sits at the start of the firmware code and carries
//! its own header in the image header format. Its code is covered by a
//! single hash, the first entry of the hash table.

use crate::config::{BootConfig, FirmwareLayout, EC_PUBLIC_KEY_SIZE, SECMON_IMAGE_MAGIC};
use crate::contents::check_single_hash;
use crate::error::HeaderError;
use crate::image_header::{parse_common, ImageHeader};
use core_types::Trust;
use hal::{FlashArea, HashEngine, SignatureVerifier};

/// Parses a secure monitor header
pub fn read_secmon_header(
    data: &[u8],
    maxsize: usize,
    layout: &FirmwareLayout,
) -> Result<ImageHeader, HeaderError> {
    parse_common(data, SECMON_IMAGE_MAGIC, maxsize, layout)
}

/// Hardware binding without the expiry marker used by firmware images
pub fn check_secmon_model(header: &ImageHeader, cfg: &BootConfig) -> Trust {
    header.check_hardware(cfg)
}

pub fn check_secmon_signature<H, E>(
    hasher: &mut H,
    header: &ImageHeader,
    key_m: u8,
    keys: &[[u8; EC_PUBLIC_KEY_SIZE]],
    ec: &E,
) -> Trust
where
    H: HashEngine + ?Sized,
    E: SignatureVerifier + ?Sized,
{
    header.check_signature(hasher, key_m, keys, ec)
}

/// Hashes the secure monitor code that follows its header at `header_offset`
pub fn check_secmon_contents<H: HashEngine + ?Sized>(
    hasher: &mut H,
    header: &ImageHeader,
    header_offset: usize,
    area: &dyn FlashArea,
) -> Trust {
    let code_offset = header_offset + header.hdrlen as usize;
    match area.read(code_offset, header.codelen as usize) {
        Ok(code) => check_single_hash(hasher, &header.hashes[0], code),
        Err(_) => Trust::UNPROVEN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ImageHeaderBuilder;
    use hal::{RamFlash, Sha256Engine};

    #[test]
    fn test_secmon_contents_roundtrip() {
        let cfg = BootConfig::default();
        let layout = FirmwareLayout::default();
        let code = vec![0xC3; 3 * 1024];
        let mut hasher = Sha256Engine::new();

        let header_bytes = ImageHeaderBuilder::secmon(&cfg)
            .single_hash(&mut hasher, &code)
            .build_unsigned();
        let header = read_secmon_header(&header_bytes, 64 * 1024, &layout).unwrap();
        assert!(check_secmon_model(&header, &cfg).is_proven());

        let mut image = vec![0u8; 512];
        image.extend_from_slice(&header_bytes);
        image.extend_from_slice(&code);
        let area = RamFlash::with_image(&image, image.len());

        assert!(check_secmon_contents(&mut hasher, &header, 512, &area).is_proven());
        assert!(!check_secmon_contents(&mut hasher, &header, 0, &area).is_proven());
    }

    #[test]
    fn test_secmon_header_accepts_zero_expiry() {
        let cfg = BootConfig::default();
        let header_bytes = ImageHeaderBuilder::secmon(&cfg).codelen(3 * 1024).build_unsigned();
        let header =
            read_secmon_header(&header_bytes, 64 * 1024, &FirmwareLayout::default()).unwrap();
        assert_eq!(header.expiry, 0);
        assert!(check_secmon_model(&header, &cfg).is_proven());
    }
}
