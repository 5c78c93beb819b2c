//! Compiled-in constants and overridable boot configuration

use serde::{Deserialize, Serialize};

/// Boot header magic, 'TRZQ'
pub const BOOT_HEADER_MAGIC: u32 = 0x515A_5254;
/// Vendor header magic, 'TRZV'
pub const VENDOR_HEADER_MAGIC: u32 = 0x565A_5254;
/// Firmware image header magic, 'TRZF'
pub const FIRMWARE_IMAGE_MAGIC: u32 = 0x465A_5254;
/// Secure monitor header magic, 'TRZM'
pub const SECMON_IMAGE_MAGIC: u32 = 0x4D5A_5254;

/// Maximum number of Merkle proof nodes
pub const MAX_PROOF_LEN: usize = 16;
/// Boot header sizes are multiples of this
pub const HEADER_ALIGNMENT: u32 = 8 * 1024;
/// Boot header sizes are strictly below this
pub const HEADER_SIZE_LIMIT: u32 = 64 * 1024;
/// Smallest accepted boot code size
pub const MIN_CODE_SIZE: u32 = 8 * 1024;

pub const EC_PUBLIC_KEY_SIZE: usize = 32;
pub const EC_SIGNATURE_SIZE: usize = 64;

/// Signatures carried by a vendor/image/secmon signature block
pub const MAX_BLOCK_SIGNATURES: usize = 3;
/// Sigmask byte followed by the signature slots
pub const SIG_BLOCK_SIZE: usize = 1 + MAX_BLOCK_SIGNATURES * EC_SIGNATURE_SIZE;
/// Number of per-chunk hashes in an image header
pub const IMAGE_CHUNK_HASHES: usize = 16;
/// Maximum number of vendor public keys
pub const MAX_VENDOR_PUBLIC_KEYS: usize = 8;

/// Device identity and boot header policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Hardware model this build runs on
    pub hw_model: u32,
    pub hw_revision: u32,
    /// Largest accepted boot code size
    pub code_size_limit: u32,
    /// Signature pairs every boot header must carry
    pub required_signatures: usize,
    /// Size of one post-quantum signature
    pub pq_signature_size: usize,
    /// Verify a secure-monitor image embedded in the firmware
    pub secmon_verification: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            hw_model: u32::from_le_bytes(*b"T3W1"),
            hw_revision: 0,
            code_size_limit: 256 * 1024,
            required_signatures: 2,
            pq_signature_size: 2420,
            secmon_verification: false,
        }
    }
}

impl BootConfig {
    /// Loads a configuration; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Flash layout of a firmware slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareLayout {
    /// Fixed size of image and secmon headers
    pub image_header_size: usize,
    pub vendor_header_max_size: usize,
    /// Size of the code chunks covered by one hash
    pub chunk_size: usize,
    /// Size of the firmware flash area
    pub firmware_max_size: usize,
}

impl Default for FirmwareLayout {
    fn default() -> Self {
        Self {
            image_header_size: 1024,
            vendor_header_max_size: 64 * 1024,
            chunk_size: 128 * 1024,
            firmware_max_size: 1024 * 1024,
        }
    }
}

impl FirmwareLayout {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
