//! # Secure Boot
//!
//! Authentication of the bootloader and firmware images before they run.
//!
//! ## Philosophy
//!
//! - **Parse, then trust**: Structural checks return a [`HeaderError`] and
//!   never hand out a partially parsed header. Cryptographic checks return
//!   a [`Trust`](core_types::Trust) and never say why they failed.
//! - **One direction only**: Every verification chain is a sequence of
//!   [`Gate`](core_types::Gate)s, each evaluated only after its predecessor
//!   is proven.
//! - **Same bytes both ways**: The [`builder`] module lays out headers for
//!   the signing tool with the exact offsets the parsers read.
//!
//! ## Key Types
//!
//! - [`ParsedHeader`]: A structurally valid boot header
//! - [`BootloaderChecker`]: Boot header, fingerprint, signatures and version
//! - [`FirmwareChecker`]: Vendor header, image header, secure monitor and contents
//! - [`FirmwareInfo`]: The fault-hardened boot decision

pub mod boot_header;
pub mod bootloader;
pub mod builder;
mod codec;
pub mod config;
pub mod contents;
pub mod error;
pub mod fw_check;
pub mod image_header;
pub mod merkle;
pub mod secmon;
pub mod sigmask;
pub mod test_utils;
pub mod vendor_header;

pub use boot_header::{
    parse_header, BootHeader, MerkleProof, ParsedHeader, SignaturePair, UnauthenticatedBlock,
};
pub use bootloader::{BootloaderChecker, BootloaderInfo};
pub use builder::{
    sigmask_for, BootHeaderBuilder, ImageHeaderBuilder, SlotSigner, VendorHeaderBuilder,
};
pub use config::{BootConfig, FirmwareLayout};
pub use contents::{check_image_contents, check_single_hash};
pub use error::HeaderError;
pub use fw_check::{
    check_vendor_lock, FirmwareChecker, FirmwareHeaderInfo, FirmwareInfo, FirmwareKeys,
};
pub use image_header::{read_image_header, ImageHeader, VersionQuad};
pub use merkle::compute_fingerprint;
pub use secmon::read_secmon_header;
pub use sigmask::{verify_signature_block, verify_signatures, KeySet, SignatureBlock};
pub use vendor_header::{read_vendor_header, VendorHeader, VendorTrust};
