//! Property-based tests for eviction and selection.
//!
//! The eviction engine must give the same answer regardless of the order in
//! which entries reached the pool, and must never leave closed epochs or
//! competing certificates behind.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use sidepool_core::{
    hash, BlockHash, Certificate, ChainTip, EpochNumber, EpochSchedule, Height, MempoolEntry,
    Quality, SidechainFees, SidechainId,
};

use crate::eviction::{EvictionPlan, EvictionPolicyEngine};
use crate::index::MempoolIndex;
use crate::provider::{ConfirmedCertificate, ConfirmedSidechain, ConfirmedSnapshot};
use crate::quality::CertificateQualitySelector;
use crate::registry::SidechainRegistry;

// ============================================================================
// Strategies
// ============================================================================

fn sidechain() -> SidechainId {
    SidechainId::new(hash(b"prop-sc"))
}

/// Certificate parameters: (epoch, quality, salt). First-seen derives from
/// the salt so equal parameters always produce an equal entry.
fn arb_cert_params() -> impl Strategy<Value = (EpochNumber, Quality, u8)> {
    (0u32..6, 0u64..12, any::<u8>())
}

fn arb_cert_set() -> impl Strategy<Value = (Vec<(EpochNumber, Quality, u8)>, Vec<(EpochNumber, Quality, u8)>)> {
    prop::collection::vec(arb_cert_params(), 0..24)
        .prop_flat_map(|certs| (Just(certs.clone()), Just(certs).prop_shuffle()))
}

fn cert_entry((epoch, quality, salt): (EpochNumber, Quality, u8)) -> MempoolEntry {
    let cert = Certificate::builder(sidechain(), epoch)
        .quality(quality)
        .cumulative_tree_hash(hash(&[salt]))
        .build();
    MempoolEntry::builder(cert)
        .seen_at(Utc.timestamp_opt(i64::from(salt % 4), 0).unwrap())
        .build()
}

/// Registry at `height` with the epoch before the current one certified.
fn registry_at(height: Height) -> SidechainRegistry {
    let schedule = EpochSchedule::new(100, 10);
    let last = schedule.epoch_at(height).unwrap_or(1).saturating_sub(1);
    let mut registry = SidechainRegistry::new();
    registry
        .refresh(
            height,
            ConfirmedSnapshot {
                tip: ChainTip::new(height, BlockHash(hash(&height.to_le_bytes()))),
                sidechains: vec![ConfirmedSidechain {
                    id: sidechain(),
                    schedule,
                    ceasing_height: schedule.ceasing_height(Some(last)),
                    balance: 1_000,
                    immature_amounts: BTreeMap::new(),
                    last_certificate: Some(ConfirmedCertificate {
                        epoch: last,
                        quality: 5,
                        backward_transfer_total: 0,
                    }),
                    fees: SidechainFees::default(),
                    request_data_length: 1,
                }],
            },
        )
        .unwrap();
    registry
}

fn build_index(params: &[(EpochNumber, Quality, u8)]) -> MempoolIndex {
    let mut index = MempoolIndex::new();
    for p in params {
        let _ = index.insert(cert_entry(*p));
    }
    index
}

fn apply(plan: &EvictionPlan, mut index: MempoolIndex) -> MempoolIndex {
    for id in plan.evictions.keys() {
        index.remove(id);
    }
    index
}

// ============================================================================
// Eviction Properties
// ============================================================================

proptest! {
    /// Insertion order never changes the plan.
    #[test]
    fn eviction_is_order_independent((certs, shuffled) in arb_cert_set(), height in 110u64..170) {
        let registry = registry_at(height);
        let engine = EvictionPolicyEngine::new();
        let a = engine.apply_tip_change(None, height, &registry, &build_index(&certs));
        let b = engine.apply_tip_change(None, height, &registry, &build_index(&shuffled));
        prop_assert_eq!(a, b);
    }

    /// Nothing survives for an epoch past its safeguard.
    #[test]
    fn no_closed_epoch_survivors(certs in prop::collection::vec(arb_cert_params(), 0..24), height in 110u64..170) {
        let registry = registry_at(height);
        let index = build_index(&certs);
        let plan = EvictionPolicyEngine::new().apply_tip_change(None, height, &registry, &index);
        let remaining = apply(&plan, index);

        let schedule = registry.get(&sidechain()).unwrap().schedule;
        for entry in remaining.iter() {
            let epoch = entry.epoch().unwrap();
            prop_assert!(!schedule.is_closed(epoch, height));
        }
    }

    /// At most one certificate per epoch remains.
    #[test]
    fn single_certificate_per_epoch(certs in prop::collection::vec(arb_cert_params(), 0..24), height in 110u64..170) {
        let registry = registry_at(height);
        let index = build_index(&certs);
        let plan = EvictionPolicyEngine::new().apply_tip_change(None, height, &registry, &index);
        let remaining = apply(&plan, index);

        let mut epochs = BTreeSet::new();
        for entry in remaining.iter() {
            prop_assert!(epochs.insert(entry.epoch().unwrap()));
        }
    }

    /// A second pass over the result evicts nothing.
    #[test]
    fn eviction_is_idempotent(certs in prop::collection::vec(arb_cert_params(), 0..24), height in 110u64..170) {
        let registry = registry_at(height);
        let engine = EvictionPolicyEngine::new();
        let index = build_index(&certs);
        let plan = engine.apply_tip_change(None, height, &registry, &index);
        let remaining = apply(&plan, index);

        let again = engine.apply_tip_change(Some(height), height, &registry, &remaining);
        prop_assert!(again.is_empty());
    }
}

// ============================================================================
// Selector Properties
// ============================================================================

proptest! {
    /// The winner has maximal quality and does not depend on order.
    #[test]
    fn selector_picks_maximum((certs, shuffled) in arb_cert_set()) {
        let a: Vec<MempoolEntry> = certs.into_iter().map(cert_entry).collect();
        let b: Vec<MempoolEntry> = shuffled.into_iter().map(cert_entry).collect();
        let selector = CertificateQualitySelector::new();

        let wa = selector.select_active(a.iter()).map(|e| e.id());
        let wb = selector.select_active(b.iter()).map(|e| e.id());
        prop_assert_eq!(wa, wb);

        if let Some(winner) = selector.select_active(a.iter()) {
            let best = a.iter().filter_map(|e| e.certificate()).map(|c| c.quality).max();
            prop_assert_eq!(winner.certificate().map(|c| c.quality), best);
        }
    }
}
