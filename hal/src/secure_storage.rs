//! One-time programmable and monotonic storage
//!
//! Holds the vendor lock (an OTP block that reads all 0xFF until written)
//! and the minimum accepted monotonic versions of each image kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the vendor lock block
pub const VENDOR_LOCK_LEN: usize = 32;

/// Image kinds with their own downgrade counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionSlot {
    Bootloader,
    Firmware,
    Secmon,
}

/// Secure storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The OTP block was already programmed
    #[error("OTP block already written")]
    AlreadyWritten,
}

/// Vendor lock and downgrade counters
pub trait SecureStorage {
    /// Raw vendor lock block; all 0xFF means the device is not locked
    fn vendor_lock(&self) -> [u8; VENDOR_LOCK_LEN];

    /// Programs the vendor lock block
    ///
    /// # Errors
    /// Returns `StorageError::AlreadyWritten` if the block is not erased.
    fn write_vendor_lock(&mut self, value: &[u8; VENDOR_LOCK_LEN]) -> Result<(), StorageError>;

    /// Minimum monotonic version accepted for `slot`
    fn min_version(&self, slot: VersionSlot) -> u32;

    /// Raises the stored minimum; never lowers it
    fn raise_min_version(&mut self, slot: VersionSlot, version: u32);
}

/// RAM-backed secure storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamSecureStorage {
    vendor_lock: [u8; VENDOR_LOCK_LEN],
    bootloader_min: u32,
    firmware_min: u32,
    secmon_min: u32,
}

impl RamSecureStorage {
    /// Fresh storage: unlocked, all minimums zero
    pub fn new() -> Self {
        Self {
            vendor_lock: [0xFF; VENDOR_LOCK_LEN],
            bootloader_min: 0,
            firmware_min: 0,
            secmon_min: 0,
        }
    }

    fn slot_mut(&mut self, slot: VersionSlot) -> &mut u32 {
        match slot {
            VersionSlot::Bootloader => &mut self.bootloader_min,
            VersionSlot::Firmware => &mut self.firmware_min,
            VersionSlot::Secmon => &mut self.secmon_min,
        }
    }
}

impl Default for RamSecureStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureStorage for RamSecureStorage {
    fn vendor_lock(&self) -> [u8; VENDOR_LOCK_LEN] {
        self.vendor_lock
    }

    fn write_vendor_lock(&mut self, value: &[u8; VENDOR_LOCK_LEN]) -> Result<(), StorageError> {
        if self.vendor_lock.iter().any(|b| *b != 0xFF) {
            return Err(StorageError::AlreadyWritten);
        }
        self.vendor_lock = *value;
        Ok(())
    }

    fn min_version(&self, slot: VersionSlot) -> u32 {
        match slot {
            VersionSlot::Bootloader => self.bootloader_min,
            VersionSlot::Firmware => self.firmware_min,
            VersionSlot::Secmon => self.secmon_min,
        }
    }

    fn raise_min_version(&mut self, slot: VersionSlot, version: u32) {
        let current = self.slot_mut(slot);
        if version > *current {
            *current = version;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_storage_is_unlocked() {
        let storage = RamSecureStorage::new();
        assert_eq!(storage.vendor_lock(), [0xFF; VENDOR_LOCK_LEN]);
        assert_eq!(storage.min_version(VersionSlot::Firmware), 0);
    }

    #[test]
    fn test_vendor_lock_is_one_time() {
        let mut storage = RamSecureStorage::new();
        storage.write_vendor_lock(&[1; VENDOR_LOCK_LEN]).unwrap();
        assert_eq!(
            storage.write_vendor_lock(&[2; VENDOR_LOCK_LEN]),
            Err(StorageError::AlreadyWritten)
        );
        assert_eq!(storage.vendor_lock(), [1; VENDOR_LOCK_LEN]);
    }

    #[test]
    fn test_min_version_never_decreases() {
        let mut storage = RamSecureStorage::new();
        storage.raise_min_version(VersionSlot::Firmware, 5);
        storage.raise_min_version(VersionSlot::Firmware, 3);
        assert_eq!(storage.min_version(VersionSlot::Firmware), 5);
        assert_eq!(storage.min_version(VersionSlot::Bootloader), 0);
    }
}
