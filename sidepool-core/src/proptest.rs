//! Property-based tests for core types.
//!
//! Uses proptest to verify epoch arithmetic and identifier invariants hold
//! for arbitrary inputs.

use proptest::prelude::*;

use crate::crypto::{hash, Hash};
use crate::entry::{ForwardTransfer, MempoolEntry, SidechainAddress};
use crate::sidechain::{EpochSchedule, SidechainId, MIN_EPOCH_LENGTH};

// ============================================================================
// Strategies
// ============================================================================

/// Generate arbitrary 32-byte arrays.
fn arb_bytes32() -> impl Strategy<Value = [u8; 32]> {
    prop::array::uniform32(any::<u8>())
}

/// Generate arbitrary Hash values.
fn arb_hash() -> impl Strategy<Value = Hash> {
    arb_bytes32().prop_map(Hash::from_bytes)
}

/// Generate valid epoch schedules.
fn arb_schedule() -> impl Strategy<Value = EpochSchedule> {
    (0u64..10_000, MIN_EPOCH_LENGTH..200).prop_map(|(c, l)| EpochSchedule::new(c, l))
}

/// Generate forward transfers with positive amounts.
fn arb_forward_transfer() -> impl Strategy<Value = ForwardTransfer> {
    (arb_hash(), 1i64..1_000_000, arb_hash()).prop_map(|(sc, amount, dest)| ForwardTransfer {
        sidechain_id: SidechainId::new(sc),
        amount,
        destination: SidechainAddress(dest),
    })
}

// ============================================================================
// Epoch Schedule Properties
// ============================================================================

proptest! {
    /// Every height past creation lies in exactly one epoch.
    #[test]
    fn epoch_at_is_within_bounds(schedule in arb_schedule(), offset in 0u64..100_000) {
        let height = schedule.creation_height() + offset;
        let epoch = schedule.epoch_at(height).unwrap();
        prop_assert!(schedule.start_height(epoch) <= height);
        prop_assert!(height <= schedule.end_height(epoch));
    }

    /// The open epoch has ended and has not crossed its safeguard.
    #[test]
    fn open_epoch_is_unique_and_consistent(schedule in arb_schedule(), offset in 0u64..100_000) {
        let height = schedule.creation_height() + offset;
        let open: Vec<u32> = (0..=schedule.epoch_at(height).unwrap())
            .filter(|&e| schedule.has_ended(e, height) && !schedule.is_closed(e, height))
            .collect();
        prop_assert!(open.len() <= 1);
        prop_assert_eq!(schedule.open_epoch(height), open.first().copied());
    }

    /// Safeguard heights strictly increase with the epoch number.
    #[test]
    fn safeguard_monotonic(schedule in arb_schedule(), epoch in 0u32..10_000) {
        prop_assert!(schedule.safeguard_height(epoch) < schedule.safeguard_height(epoch + 1));
        prop_assert!(schedule.safeguard_height(epoch) <= schedule.end_height(epoch + 1));
    }

    /// A sidechain ceases right after the pending epoch's safeguard.
    #[test]
    fn ceasing_follows_pending_safeguard(schedule in arb_schedule(), last in proptest::option::of(0u32..1_000)) {
        let pending = last.map_or(0, |e| e + 1);
        prop_assert_eq!(schedule.ceasing_height(last), schedule.safeguard_height(pending) + 1);
    }
}

// ============================================================================
// Identifier Properties
// ============================================================================

proptest! {
    /// Identifiers depend on content only.
    #[test]
    fn entry_id_deterministic(ft in arb_forward_transfer()) {
        let a = MempoolEntry::new(ft.clone());
        let b = MempoolEntry::new(ft);
        prop_assert_eq!(a.id(), b.id());
    }

    /// Different amounts give different identifiers.
    #[test]
    fn entry_id_distinguishes_amounts(ft in arb_forward_transfer(), bump in 1i64..1_000) {
        let mut other = ft.clone();
        other.amount += bump;
        prop_assert_ne!(MempoolEntry::new(ft).id(), MempoolEntry::new(other).id());
    }

    /// Hashing is a function of its input.
    #[test]
    fn hash_deterministic(data in prop::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(hash(&data), hash(&data));
    }
}
