//! Resilience Test Utilities
//!
//! Shared helpers for the cross-crate scenarios in `tests/`.
//!
//! ## Test Philosophy
//!
//! - **Fail closed**: Every tampered, truncated or downgraded image must be
//!   refused, whichever check catches it
//! - **Deterministic failures**: Kernel faults are reproducible via `FaultPlan`
//! - **Isolation**: A crashing application task never takes the kernel down

use core_types::{SysEvents, SysHandle, TaskId};
use hal::{Ed25519Verifier, RamFlash, RamSecureStorage, Sha256Engine};
use kernel_api::Instant;
use secure_boot::test_utils::{BootloaderFixture, FirmwareFixture};
use secure_boot::{BootloaderChecker, BootloaderInfo, FirmwareChecker, FirmwareInfo};
use sim_kernel::test_utils::{fn_task, FnTask};
use sim_kernel::{TaskContext, TaskStep};

/// Runs the bootloader check over `image` with fresh secure storage
pub fn check_bootloader(fixture: &BootloaderFixture, image: &[u8]) -> BootloaderInfo {
    let mut storage = RamSecureStorage::new();
    check_bootloader_with(fixture, image, &mut storage)
}

pub fn check_bootloader_with(
    fixture: &BootloaderFixture,
    image: &[u8],
    storage: &mut RamSecureStorage,
) -> BootloaderInfo {
    let keys = fixture.keys();
    let area = RamFlash::with_image(image, image.len());
    let mut checker = BootloaderChecker::new(
        &fixture.cfg,
        &keys,
        Sha256Engine::new(),
        Ed25519Verifier,
        fixture.pq_verifier(),
    );
    checker.check(&area, storage)
}

/// Runs the firmware check over `area`
pub fn check_firmware(
    fixture: &FirmwareFixture,
    area: &RamFlash,
    storage: &mut RamSecureStorage,
) -> FirmwareInfo {
    let keys = fixture.keys();
    let mut checker = FirmwareChecker::new(
        &fixture.cfg,
        &fixture.layout,
        &keys,
        Sha256Engine::new(),
        Ed25519Verifier,
    );
    checker.check_firmware(area, storage)
}

/// Task that registers a buffer for `peer` and answers each request with
/// the payload reversed under `fn + 1`
pub fn echo_task(peer: TaskId) -> FnTask<impl FnMut(&mut TaskContext<'_>) -> TaskStep> {
    let mut registered = false;
    fn_task(move |ctx: &mut TaskContext<'_>| {
        if !registered {
            ctx.ipc_register(peer, None);
            registered = true;
        }
        while let Ok(msg) = ctx.ipc_try_receive_from(peer) {
            let mut reply = msg.data.clone();
            reply.reverse();
            if ctx.ipc_send(peer, msg.fn_id.wrapping_add(1), &reply).is_err() {
                return TaskStep::exit_error("Echo", "reply queue full", "");
            }
            if ctx.ipc_free(&msg).is_err() {
                return TaskStep::exit_fatal("ipc_free", file!(), line!());
            }
        }
        TaskStep::wait(SysEvents::read(SysHandle::ipc(peer)), Instant::INFINITE)
    })
}
