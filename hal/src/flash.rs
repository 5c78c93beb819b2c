//! Flash area abstraction
//!
//! A flash area is a contiguous, byte-addressable region (bootloader slot,
//! firmware slot). Reads hand out borrowed slices, mirroring memory-mapped
//! flash on the device.

use thiserror::Error;

/// Flash access errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlashError {
    /// Requested range is not inside the area
    #[error("flash read out of bounds: offset {offset} len {len} (area size {size})")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}

/// Read-only view of a flash area
pub trait FlashArea {
    /// Total size of the area in bytes
    fn size(&self) -> usize;

    /// Returns `len` bytes starting at `offset`
    ///
    /// # Errors
    /// Returns `FlashError::OutOfBounds` if the range exceeds the area.
    fn read(&self, offset: usize, len: usize) -> Result<&[u8], FlashError>;
}

/// RAM-backed flash area
///
/// Erased flash reads as 0xFF, so a fresh area is filled with 0xFF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamFlash {
    data: Vec<u8>,
}

impl RamFlash {
    /// Creates an erased area of the given size
    pub fn erased(size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
        }
    }

    /// Creates an area holding `image` followed by erased padding up to `size`
    ///
    /// If `image` is longer than `size`, the area is sized to the image.
    pub fn with_image(image: &[u8], size: usize) -> Self {
        let mut data = image.to_vec();
        if data.len() < size {
            data.resize(size, 0xFF);
        }
        Self { data }
    }

    /// Overwrites bytes at `offset`
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), FlashError> {
        let size = self.data.len();
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= size)
            .ok_or(FlashError::OutOfBounds {
                offset,
                len: bytes.len(),
                size,
            })?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Returns the whole area
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl FlashArea for RamFlash {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn read(&self, offset: usize, len: usize) -> Result<&[u8], FlashError> {
        let size = self.data.len();
        offset
            .checked_add(len)
            .filter(|end| *end <= size)
            .map(|end| &self.data[offset..end])
            .ok_or(FlashError::OutOfBounds { offset, len, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erased_area_reads_ff() {
        let flash = RamFlash::erased(64);
        assert_eq!(flash.size(), 64);
        assert!(flash.read(0, 64).unwrap().iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn test_with_image_pads() {
        let flash = RamFlash::with_image(&[1, 2, 3], 8);
        assert_eq!(flash.read(0, 4).unwrap(), &[1, 2, 3, 0xFF]);
    }

    #[test]
    fn test_read_out_of_bounds() {
        let flash = RamFlash::erased(16);
        assert_eq!(
            flash.read(10, 7),
            Err(FlashError::OutOfBounds {
                offset: 10,
                len: 7,
                size: 16
            })
        );
        assert!(flash.read(usize::MAX, 2).is_err());
        assert!(flash.read(16, 0).is_ok());
    }

    #[test]
    fn test_write_then_read() {
        let mut flash = RamFlash::erased(16);
        flash.write(4, &[0xAB, 0xCD]).unwrap();
        assert_eq!(flash.read(3, 4).unwrap(), &[0xFF, 0xAB, 0xCD, 0xFF]);
        assert!(flash.write(15, &[0, 0]).is_err());
    }
}
