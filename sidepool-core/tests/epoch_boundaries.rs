//! Boundary condition tests for epoch arithmetic.
//!
//! These tests pin exact safeguard and ceasing heights, where an
//! off-by-one would either keep stale artifacts or drop valid ones.

use sidepool_core::{
    hash, Certificate, EpochSchedule, Error, ErrorCode, MempoolEntry, SidechainId,
};

fn schedule() -> EpochSchedule {
    EpochSchedule::new(100, 10)
}

// === Safeguard boundaries ===

/// `safeguard <= height` closes the epoch, so the safeguard height itself is closed.
#[test]
fn epoch_closed_at_exact_safeguard() {
    let s = schedule();
    let sg = s.safeguard_height(3);

    // One block BEFORE safeguard: still open
    assert!(!s.is_closed(3, sg - 1));

    // AT safeguard: closed (next block is outside the window)
    assert!(s.is_closed(3, sg));

    // AFTER safeguard: closed
    assert!(s.is_closed(3, sg + 1));
}

/// A certificate may be submitted from the epoch's last block onwards.
#[test]
fn epoch_ended_at_exact_end_height() {
    let s = schedule();
    let end = s.end_height(3);

    assert!(!s.has_ended(3, end - 1));
    assert!(s.has_ended(3, end));
}

/// The window never overlaps the next epoch's window.
#[test]
fn windows_do_not_overlap() {
    for length in 2..40u32 {
        let s = EpochSchedule::new(0, length);
        for epoch in 0..5 {
            assert!(
                s.safeguard_height(epoch) <= s.end_height(epoch + 1),
                "length {length} epoch {epoch}"
            );
        }
    }
}

// === Ceasing boundaries ===

/// A sidechain without any certificate ceases right after epoch 0's window.
#[test]
fn ceasing_height_without_certificates() {
    let s = schedule();
    assert_eq!(s.ceasing_height(None), s.safeguard_height(0) + 1);
}

/// Each confirmed epoch pushes ceasing one epoch further.
#[test]
fn ceasing_height_advances_per_epoch() {
    let s = schedule();
    let step = s.ceasing_height(Some(3)) - s.ceasing_height(Some(2));
    assert_eq!(step, u64::from(s.epoch_length()));
}

// === Parameter validation ===

#[test]
fn epoch_length_one_rejected() {
    let sc = SidechainId::new(hash(b"short"));
    let err = EpochSchedule::new(0, 1).validate(sc).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidSidechainParams);
    assert!(matches!(err, Error::InvalidSidechainParams { sidechain, .. } if sidechain == sc));
}

// === Identifiers ===

/// Certificates differing only in quality are distinct entries.
#[test]
fn certificate_quality_changes_identifier() {
    let sc = SidechainId::new(hash(b"sc"));
    let a = MempoolEntry::new(Certificate::builder(sc, 1).quality(5).build());
    let b = MempoolEntry::new(Certificate::builder(sc, 1).quality(10).build());
    assert_ne!(a.id(), b.id());
}
