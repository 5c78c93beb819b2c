//! Boot Header Properties
//!
//! Property tests over generated headers: structural round-trip, tamper
//! sensitivity of the authenticated region, sorted-pair Merkle hashing
//! and sigmask coverage.

use hal::Sha256Engine;
use proptest::prelude::*;
use secure_boot::merkle::{compute_fingerprint, hash_node_pair};
use secure_boot::parse_header;
use secure_boot::test_utils::BootloaderFixture;
use tests_resilience::check_bootloader;

fn digest() -> impl Strategy<Value = [u8; 32]> {
    any::<[u8; 32]>()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_header_round_trip(
        pages in 1u32..=7,
        auth_size in 80u32..=2048,
        code_size in 8192u32..=256 * 1024,
        version in any::<u32>(),
        fix_version in any::<u32>(),
        min_prev_version in any::<u32>(),
        monotonic_version in any::<u32>(),
        storage_address in any::<u32>(),
        sigmask in any::<u32>(),
        nodes in proptest::collection::vec(digest(), 0..=16),
    ) {
        let fixture = BootloaderFixture::new();
        let header_size = pages * 8192;
        let bytes = fixture
            .builder()
            .header_size(header_size)
            .auth_size(auth_size)
            .code_size(code_size)
            .version(version)
            .fix_version(fix_version)
            .min_prev_version(min_prev_version)
            .monotonic_version(monotonic_version)
            .storage_address(storage_address)
            .sigmask(sigmask)
            .proof(nodes.clone())
            .build_unsigned();

        let parsed = parse_header(&bytes, &fixture.cfg).unwrap();
        let header = parsed.header();
        prop_assert_eq!(header.header_size, header_size);
        prop_assert_eq!(header.auth_size, auth_size);
        prop_assert_eq!(header.code_size, code_size);
        prop_assert_eq!(header.version, version);
        prop_assert_eq!(header.fix_version, fix_version);
        prop_assert_eq!(header.min_prev_version, min_prev_version);
        prop_assert_eq!(header.monotonic_version, monotonic_version);
        prop_assert_eq!(header.storage_address, storage_address);
        prop_assert_eq!(header.sigmask, sigmask);
        prop_assert_eq!(parsed.proof().nodes(), nodes.as_slice());
        prop_assert_eq!(parsed.authenticated_bytes(), &bytes[..auth_size as usize]);
    }

    #[test]
    fn prop_pair_hash_is_order_independent(a in digest(), b in digest()) {
        let mut hasher = Sha256Engine::new();
        prop_assert_eq!(
            hash_node_pair(&mut hasher, &a, &b),
            hash_node_pair(&mut hasher, &b, &a)
        );
    }

    #[test]
    fn prop_swapping_equal_nodes_keeps_fingerprint(
        mut nodes in proptest::collection::vec(digest(), 2..=8),
        picks in (any::<prop::sample::Index>(), any::<prop::sample::Index>()),
        auth in proptest::collection::vec(any::<u8>(), 80..=160),
    ) {
        let i = picks.0.index(nodes.len());
        let j = picks.1.index(nodes.len());
        nodes[j] = nodes[i];
        let code = [0xC3u8; 64];

        let mut hasher = Sha256Engine::new();
        let before = compute_fingerprint(&mut hasher, &auth, &nodes, &code);
        nodes.swap(i, j);
        let after = compute_fingerprint(&mut hasher, &auth, &nodes, &code);
        prop_assert_eq!(before, after);
    }

    #[test]
    fn prop_proof_position_matters(a in digest(), b in digest()) {
        prop_assume!(a != b);
        let auth = [0x5Au8; 80];
        let code = [0x00u8; 16];

        let mut hasher = Sha256Engine::new();
        prop_assert_ne!(
            compute_fingerprint(&mut hasher, &auth, &[a, b], &code),
            compute_fingerprint(&mut hasher, &auth, &[b, a], &code)
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_authenticated_bytes_are_tamper_evident(
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let fixture = BootloaderFixture::new();
        let mut image = fixture.signed_image(&[0, 1]);
        prop_assert!(check_bootloader(&fixture, &image).may_boot());

        // default builder authenticates the first 1024 bytes
        image[position.index(1024)] ^= flip;
        prop_assert!(!check_bootloader(&fixture, &image).may_boot());
    }

    #[test]
    fn prop_sigmask_must_match_signature_count(sigmask in any::<u32>()) {
        prop_assume!(sigmask.count_ones() != 2);
        let fixture = BootloaderFixture::new();
        let builder = fixture.builder().sigmask(sigmask);
        let image = fixture.image(&fixture.sign(&builder, &[0, 1]));
        prop_assert!(!check_bootloader(&fixture, &image).may_boot());
    }
}
