//! Firmware validation
//!
//! Runs the vendor header, image header and optional secure monitor checks
//! as one linear chain of [`Gate`]s. A gate is only evaluated when the gate
//! before it holds the proven pattern, so a rejection anywhere leaves every
//! later gate, and both `firmware_present` copies, unproven.

use crate::config::{BootConfig, FirmwareLayout, EC_PUBLIC_KEY_SIZE, FIRMWARE_IMAGE_MAGIC};
use crate::contents::check_image_contents;
use crate::error::{ensure_len, HeaderError};
use crate::image_header::{read_image_header, ImageHeader, VersionQuad};
use crate::secmon::{
    check_secmon_contents, check_secmon_model, check_secmon_signature, read_secmon_header,
};
use crate::vendor_header::{read_vendor_header, VendorHeader};
use core_types::{Gate, Trust};
use hal::{FlashArea, HashEngine, SecureStorage, SignatureVerifier, VersionSlot, DIGEST_LEN};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Keys compiled into the bootloader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareKeys {
    /// Keys that sign vendor headers
    pub vendor_keys: Vec<[u8; EC_PUBLIC_KEY_SIZE]>,
    pub vendor_sig_m: u8,
    /// Keys that sign secure monitor headers
    pub secmon_keys: Vec<[u8; EC_PUBLIC_KEY_SIZE]>,
    pub secmon_sig_m: u8,
}

/// Outcome of [`FirmwareChecker::check_firmware`]
#[derive(Debug, Clone)]
pub struct FirmwareInfo {
    pub vendor: Option<VendorHeader>,
    /// Set only when the image header passed its structural checks
    pub image: Option<ImageHeader>,
    pub secmon: Option<ImageHeader>,
    pub header_present: Trust,
    pub firmware_present: Trust,
    pub firmware_present_backup: Trust,
}

impl FirmwareInfo {
    /// Both independently computed copies must be proven
    pub fn may_boot(&self) -> bool {
        self.firmware_present.is_proven() && self.firmware_present_backup.is_proven()
    }
}

/// Header summary shown by update UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareHeaderInfo {
    pub vendor_string: String,
    pub version: u32,
    pub fix_version: u32,
    /// Image header fingerprint
    pub fingerprint: [u8; DIGEST_LEN],
    /// Hash over the vendor header and the image header
    pub hash: [u8; DIGEST_LEN],
}

impl FirmwareHeaderInfo {
    pub fn version_quad(&self) -> VersionQuad {
        VersionQuad::from_u32(self.version)
    }
}

/// Compares the OTP vendor lock with the vendor header hash
///
/// An erased lock (all 0xFF) accepts any vendor.
pub fn check_vendor_lock<H: HashEngine + ?Sized>(
    hasher: &mut H,
    vendor: &VendorHeader,
    storage: &dyn SecureStorage,
) -> Trust {
    let lock = storage.vendor_lock();
    if lock.iter().all(|b| *b == 0xFF) {
        return Trust::PROVEN;
    }
    let hash = vendor.lock_hash(hasher);
    Trust::from_bool(bool::from(lock[..].ct_eq(&hash[..])))
}

/// Validates the firmware area before the bootloader jumps into it
pub struct FirmwareChecker<'a, H, E> {
    cfg: &'a BootConfig,
    layout: &'a FirmwareLayout,
    keys: &'a FirmwareKeys,
    hasher: H,
    ec: E,
}

impl<'a, H, E> FirmwareChecker<'a, H, E>
where
    H: HashEngine,
    E: SignatureVerifier,
{
    pub fn new(
        cfg: &'a BootConfig,
        layout: &'a FirmwareLayout,
        keys: &'a FirmwareKeys,
        hasher: H,
        ec: E,
    ) -> Self {
        Self {
            cfg,
            layout,
            keys,
            hasher,
            ec,
        }
    }

    /// Hands back the hash engine
    pub fn into_hasher(self) -> H {
        self.hasher
    }

    /// Runs the full gate chain over `area`
    ///
    /// On acceptance the stored minimum versions are raised to the accepted
    /// image's monotonic versions.
    pub fn check_firmware(
        &mut self,
        area: &dyn FlashArea,
        storage: &mut dyn SecureStorage,
    ) -> FirmwareInfo {
        let cfg = self.cfg;
        let layout = self.layout;
        let keys = self.keys;
        let ec = &self.ec;
        let hasher = &mut self.hasher;
        let data = area.read(0, area.size()).unwrap_or(&[]);
        let area_max = layout.firmware_max_size.min(area.size());

        let mut vendor = None;
        let mut image = None;
        let mut secmon = None;

        let vhdr_present = Gate::entry(match read_vendor_header(data, layout) {
            Ok(header) => {
                vendor = Some(header);
                Trust::PROVEN
            }
            Err(err) => {
                debug!("vendor header: {}", err);
                Trust::UNPROVEN
            }
        });

        let mut vhdr_keys_ok = Gate::closed();
        vhdr_keys_ok.pass_after(&vhdr_present, || match &vendor {
            Some(v) => v.check_signature(hasher, keys.vendor_sig_m, &keys.vendor_keys, ec),
            None => Trust::UNPROVEN,
        });

        let mut vhdr_lock_ok = Gate::closed();
        vhdr_lock_ok.pass_after(&vhdr_keys_ok, || match &vendor {
            Some(v) => check_vendor_lock(hasher, v, &*storage),
            None => Trust::UNPROVEN,
        });

        let vhdrlen = vendor.as_ref().map_or(0, |v| v.hdrlen as usize);
        let mut img_hdr_ok = Gate::closed();
        img_hdr_ok.pass_after(&vhdr_lock_ok, || {
            let parsed = data
                .get(vhdrlen..)
                .ok_or(HeaderError::Truncated {
                    needed: vhdrlen,
                    available: data.len(),
                })
                .and_then(|rest| {
                    let max_len = area_max.saturating_sub(vhdrlen);
                    read_image_header(rest, FIRMWARE_IMAGE_MAGIC, max_len, layout)
                });
            match parsed {
                Ok(header) => {
                    image = Some(header);
                    Trust::PROVEN
                }
                Err(err) => {
                    debug!("image header: {}", err);
                    Trust::UNPROVEN
                }
            }
        });

        let mut model_ok = Gate::closed();
        model_ok.pass_after(&img_hdr_ok, || match (&vendor, &image) {
            (Some(v), Some(i)) => v.check_model(cfg).and(i.check_model(cfg)),
            _ => Trust::UNPROVEN,
        });

        let mut signatures_ok = Gate::closed();
        signatures_ok.pass_after(&model_ok, || match (&vendor, &image) {
            (Some(v), Some(i)) => i.check_signature(hasher, v.vsig_m, &v.keys, ec),
            _ => Trust::UNPROVEN,
        });

        let mut version_ok = Gate::closed();
        version_ok.pass_after(&signatures_ok, || match &image {
            Some(i) => {
                Trust::from_bool(i.monotonic_version >= storage.min_version(VersionSlot::Firmware))
            }
            None => Trust::UNPROVEN,
        });

        let mut header_present = Gate::closed();
        header_present.follow(&version_ok);

        let ihdrlen = image.as_ref().map_or(0, |i| i.hdrlen as usize);
        let firstskip = vhdrlen + ihdrlen;

        let mut secmon_valid = Gate::closed();
        let mut secmon_stages = Vec::new();
        if cfg.secmon_verification {
            let codelen = image.as_ref().map_or(0, |i| i.codelen as usize);

            let mut secmon_header_present = Gate::closed();
            secmon_header_present.pass_after(&header_present, || {
                let parsed = data
                    .get(firstskip..)
                    .ok_or(HeaderError::Truncated {
                        needed: firstskip,
                        available: data.len(),
                    })
                    .and_then(|rest| read_secmon_header(rest, codelen, layout));
                match parsed {
                    Ok(header) => {
                        secmon = Some(header);
                        Trust::PROVEN
                    }
                    Err(err) => {
                        debug!("secmon header: {}", err);
                        Trust::UNPROVEN
                    }
                }
            });

            let mut secmon_model_valid = Gate::closed();
            secmon_model_valid.pass_after(&secmon_header_present, || match &secmon {
                Some(s) => check_secmon_model(s, cfg),
                None => Trust::UNPROVEN,
            });

            let mut secmon_header_sig_valid = Gate::closed();
            secmon_header_sig_valid.pass_after(&secmon_model_valid, || match &secmon {
                Some(s) => {
                    check_secmon_signature(hasher, s, keys.secmon_sig_m, &keys.secmon_keys, ec)
                }
                None => Trust::UNPROVEN,
            });

            let mut secmon_version_ok = Gate::closed();
            secmon_version_ok.pass_after(&secmon_header_sig_valid, || match &secmon {
                Some(s) => {
                    let min = storage.min_version(VersionSlot::Secmon);
                    Trust::from_bool(s.monotonic_version >= min)
                }
                None => Trust::UNPROVEN,
            });

            let mut secmon_contents_valid = Gate::closed();
            secmon_contents_valid.pass_after(&secmon_version_ok, || match &secmon {
                Some(s) => check_secmon_contents(hasher, s, firstskip, area),
                None => Trust::UNPROVEN,
            });

            secmon_valid.follow(&secmon_contents_valid);
            secmon_stages = vec![
                ("secmon_header_present", secmon_header_present),
                ("secmon_model_valid", secmon_model_valid),
                ("secmon_header_sig_valid", secmon_header_sig_valid),
                ("secmon_version_ok", secmon_version_ok),
                ("secmon_contents_valid", secmon_contents_valid),
            ];
        } else {
            secmon_valid.follow(&header_present);
        }

        let mut firmware_present = Gate::closed();
        firmware_present.pass_after(&secmon_valid, || match &image {
            Some(i) => check_image_contents(hasher, i, firstskip, area, layout.chunk_size),
            None => Trust::UNPROVEN,
        });

        let mut firmware_present_backup = Gate::closed();
        firmware_present_backup.pass_after(&secmon_valid, || match &image {
            Some(i) => check_image_contents(hasher, i, firstskip, area, layout.chunk_size),
            None => Trust::UNPROVEN,
        });

        let info = FirmwareInfo {
            vendor,
            image,
            secmon,
            header_present: header_present.trust(),
            firmware_present: firmware_present.trust(),
            firmware_present_backup: firmware_present_backup.trust(),
        };

        if info.may_boot() {
            if let Some(i) = &info.image {
                storage.raise_min_version(VersionSlot::Firmware, i.monotonic_version);
                info!(
                    "firmware {} accepted, fingerprint {}",
                    i.version_quad(),
                    hex::encode(i.fingerprint(hasher))
                );
            }
            if let Some(s) = &info.secmon {
                storage.raise_min_version(VersionSlot::Secmon, s.monotonic_version);
            }
        } else {
            let mut stages = vec![
                ("vhdr_present", vhdr_present),
                ("vhdr_keys_ok", vhdr_keys_ok),
                ("vhdr_lock_ok", vhdr_lock_ok),
                ("img_hdr_ok", img_hdr_ok),
                ("model_ok", model_ok),
                ("signatures_ok", signatures_ok),
                ("version_ok", version_ok),
            ];
            stages.extend(secmon_stages);
            stages.push(("firmware_present", firmware_present));
            stages.push(("firmware_present_backup", firmware_present_backup));
            let stage = stages
                .iter()
                .find(|(_, gate)| !gate.is_proven())
                .map_or("unknown", |(name, _)| *name);
            warn!("firmware rejected at {}", stage);
        }
        info
    }

    /// Authenticates the vendor and image headers at the start of `header`
    /// and extracts what an update screen shows
    pub fn check_firmware_header(
        &mut self,
        header: &[u8],
    ) -> Result<FirmwareHeaderInfo, HeaderError> {
        let vendor = read_vendor_header(header, self.layout)?;
        if !vendor
            .check_signature(
                &mut self.hasher,
                self.keys.vendor_sig_m,
                &self.keys.vendor_keys,
                &self.ec,
            )
            .is_proven()
        {
            return Err(HeaderError::Unauthenticated);
        }

        let vhdrlen = vendor.hdrlen as usize;
        ensure_len(header, vhdrlen)?;
        let image = read_image_header(
            &header[vhdrlen..],
            FIRMWARE_IMAGE_MAGIC,
            self.layout.firmware_max_size.saturating_sub(vhdrlen),
            self.layout,
        )?;
        if !image
            .check_signature(&mut self.hasher, vendor.vsig_m, &vendor.keys, &self.ec)
            .is_proven()
        {
            return Err(HeaderError::Unauthenticated);
        }

        self.hasher.init();
        self.hasher.update(vendor.as_bytes());
        self.hasher.update(image.as_bytes());
        let hash = self.hasher.finalize();

        Ok(FirmwareHeaderInfo {
            vendor_string: vendor.vendor_string_lossy(),
            version: image.version,
            fix_version: image.fix_version,
            fingerprint: image.fingerprint(&mut self.hasher),
            hash,
        })
    }
}
