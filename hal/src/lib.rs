//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the collaborator traits consumed by the boot chain and
//! the kernel: flash reads, hashing, signature primitives, one-time
//! programmable storage and a monotonic timer.
//!
//! ## Philosophy
//!
//! **Primitives are black boxes.**
//!
//! The verification state machine never reaches into a driver. It reads
//! bytes through [`FlashArea`], digests them through [`HashEngine`] and asks
//! a [`SignatureVerifier`] for a yes/no answer. Every trait has a host
//! implementation here so the whole chain runs under `cargo test`.
//!
//! ## Design Principles
//!
//! 1. **Pure collaborators**: No trait method has side effects on the caller's state
//! 2. **Trait-based**: Hardware and software backends are interchangeable
//! 3. **Testable**: RAM-backed implementations for every device

pub mod flash;
pub mod hash;
pub mod secure_storage;
pub mod signature;
pub mod timer;

pub use flash::{FlashArea, FlashError, RamFlash};
pub use hash::{HashEngine, Sha256Engine, DIGEST_LEN};
pub use secure_storage::{RamSecureStorage, SecureStorage, StorageError, VersionSlot};
pub use signature::{Ed25519Signer, Ed25519Verifier, MessageSigner, SignatureVerifier};
pub use timer::TimerDevice;
