//! Bootloader check
//!
//! Validates the bootloader area (boot header followed by code) before the
//! boardloader jumps into it: structural parse, Merkle fingerprint, the
//! sigmask signature check and downgrade protection, chained through gates.

use crate::boot_header::{parse_header, ParsedHeader};
use crate::config::{BootConfig, HEADER_SIZE_LIMIT};
use crate::sigmask::{verify_signatures, KeySet};
use core_types::{Gate, Trust};
use hal::{FlashArea, HashEngine, SecureStorage, SignatureVerifier, VersionSlot, DIGEST_LEN};
use log::{debug, info, warn};

/// Outcome of [`BootloaderChecker::check`]
#[derive(Debug, Clone)]
pub struct BootloaderInfo {
    pub header: Option<ParsedHeader>,
    pub fingerprint: Option<[u8; DIGEST_LEN]>,
    pub present: Trust,
}

impl BootloaderInfo {
    pub fn may_boot(&self) -> bool {
        self.present.is_proven()
    }
}

pub struct BootloaderChecker<'a, H, E, P> {
    cfg: &'a BootConfig,
    keys: &'a KeySet,
    hasher: H,
    ec: E,
    pq: P,
}

impl<'a, H, E, P> BootloaderChecker<'a, H, E, P>
where
    H: HashEngine,
    E: SignatureVerifier,
    P: SignatureVerifier,
{
    pub fn new(cfg: &'a BootConfig, keys: &'a KeySet, hasher: H, ec: E, pq: P) -> Self {
        Self {
            cfg,
            keys,
            hasher,
            ec,
            pq,
        }
    }

    pub fn check(
        &mut self,
        area: &dyn FlashArea,
        storage: &mut dyn SecureStorage,
    ) -> BootloaderInfo {
        let cfg = self.cfg;
        let keys = self.keys;
        let hasher = &mut self.hasher;

        let header_len = area.size().min(HEADER_SIZE_LIMIT as usize);
        let parsed = area
            .read(0, header_len)
            .map_err(Into::into)
            .and_then(|data| parse_header(data, cfg));

        let mut header = None;
        let header_ok = Gate::entry(match parsed {
            Ok(h) => {
                header = Some(h);
                Trust::PROVEN
            }
            Err(err) => {
                debug!("boot header: {}", err);
                Trust::UNPROVEN
            }
        });

        let mut fingerprint = None;
        let mut fingerprint_ok = Gate::closed();
        fingerprint_ok.pass_after(&header_ok, || {
            match header.as_ref().map(|h| h.fingerprint_from_flash(hasher, area)) {
                Some(Ok(fp)) => {
                    fingerprint = Some(fp);
                    Trust::PROVEN
                }
                _ => Trust::UNPROVEN,
            }
        });

        let mut signatures_ok = Gate::closed();
        signatures_ok.pass_after(&fingerprint_ok, || match (&header, &fingerprint) {
            (Some(h), Some(fp)) => verify_signatures(hasher, h, fp, keys, &self.ec, &self.pq),
            _ => Trust::UNPROVEN,
        });

        let mut version_ok = Gate::closed();
        version_ok.pass_after(&signatures_ok, || match &header {
            Some(h) => Trust::from_bool(
                h.header().monotonic_version >= storage.min_version(VersionSlot::Bootloader),
            ),
            None => Trust::UNPROVEN,
        });

        let mut present = Gate::closed();
        present.follow(&version_ok);

        let info = BootloaderInfo {
            header,
            fingerprint,
            present: present.trust(),
        };

        match (&info.header, &info.fingerprint) {
            (Some(h), Some(fp)) if info.may_boot() => {
                storage.raise_min_version(VersionSlot::Bootloader, h.header().monotonic_version);
                info!(
                    "bootloader {}.{} accepted, fingerprint {}",
                    h.header().version,
                    h.header().fix_version,
                    hex::encode(fp)
                );
            }
            _ => {
                let stage = [
                    ("header_ok", header_ok),
                    ("fingerprint_ok", fingerprint_ok),
                    ("signatures_ok", signatures_ok),
                    ("version_ok", version_ok),
                ]
                .iter()
                .find(|(_, gate)| !gate.is_proven())
                .map_or("present", |(name, _)| *name);
                warn!("bootloader rejected at {}", stage);
            }
        }
        info
    }
}
