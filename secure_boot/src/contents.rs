//! Image contents check
//!
//! Code is hashed in chunks aligned to the flash area, each compared with
//! the matching hash in the image header. Whatever follows the code up to
//! the end of the area must be uniform padding of 0x00 or 0xFF.

use crate::config::IMAGE_CHUNK_HASHES;
use crate::image_header::ImageHeader;
use core_types::Trust;
use hal::{FlashArea, HashEngine, DIGEST_LEN};
use log::debug;
use subtle::ConstantTimeEq;

/// Compares the hash of `data` with `expected`
pub fn check_single_hash<H: HashEngine + ?Sized>(
    hasher: &mut H,
    expected: &[u8; DIGEST_LEN],
    data: &[u8],
) -> Trust {
    let actual = hasher.digest(data);
    Trust::from_bool(bool::from(actual[..].ct_eq(&expected[..])))
}

/// Verifies code chunks and trailing padding of a firmware image
///
/// `firstskip` is the offset of the code inside `area`; chunk boundaries
/// are measured from the start of the area, so the first chunk is short.
pub fn check_image_contents<H: HashEngine + ?Sized>(
    hasher: &mut H,
    header: &ImageHeader,
    firstskip: usize,
    area: &dyn FlashArea,
    chunk_size: usize,
) -> Trust {
    if chunk_size == 0 {
        return Trust::UNPROVEN;
    }

    let mut offset = firstskip;
    let end = firstskip + header.codelen as usize;

    while offset < end {
        let len = (chunk_size - offset % chunk_size).min(end - offset);
        let chunk_index = offset / chunk_size;
        if chunk_index >= IMAGE_CHUNK_HASHES {
            return Trust::UNPROVEN;
        }
        let Ok(data) = area.read(offset, len) else {
            return Trust::UNPROVEN;
        };
        if !check_single_hash(hasher, &header.hashes[chunk_index], data).is_proven() {
            debug!("chunk {} hash mismatch", chunk_index);
            return Trust::UNPROVEN;
        }
        offset += len;
    }

    check_padding(area, offset, chunk_size)
}

fn check_padding(area: &dyn FlashArea, mut offset: usize, chunk_size: usize) -> Trust {
    let end = area.size();
    if offset >= end {
        return Trust::PROVEN;
    }

    let expected = match area.read(offset, 1) {
        Ok([byte]) if *byte == 0x00 || *byte == 0xFF => *byte,
        _ => return Trust::UNPROVEN,
    };

    while offset < end {
        let len = (chunk_size - offset % chunk_size).min(end - offset);
        let Ok(data) = area.read(offset, len) else {
            return Trust::UNPROVEN;
        };
        if data.iter().any(|b| *b != expected) {
            debug!("padding mismatch in [{}, {})", offset, offset + len);
            return Trust::UNPROVEN;
        }
        offset += len;
    }
    Trust::PROVEN
}
