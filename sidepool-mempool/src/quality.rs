//! Certificate quality selection.
//!
//! Only one certificate per (sidechain, epoch) may be active. The winner is
//! the highest quality; ties go to the certificate seen first, then to the
//! smallest identifier, so the choice never depends on arrival order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use sidepool_core::{EntryId, MempoolEntry, Quality};

/// Total order over certificate entries. Greater ranks win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateRank {
    /// Certificate quality.
    pub quality: Quality,
    /// First-seen time of the entry.
    pub first_seen: DateTime<Utc>,
    /// Entry identifier.
    pub id: EntryId,
}

impl CertificateRank {
    /// Rank of a certificate entry; `None` for other entry kinds.
    pub fn of(entry: &MempoolEntry) -> Option<Self> {
        entry.certificate().map(|cert| Self {
            quality: cert.quality,
            first_seen: entry.first_seen(),
            id: entry.id(),
        })
    }
}

impl Ord for CertificateRank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.quality
            .cmp(&other.quality)
            // Earlier first-seen wins
            .then_with(|| other.first_seen.cmp(&self.first_seen))
            // Smaller id wins
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for CertificateRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Picks the single active certificate among candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateQualitySelector;

impl CertificateQualitySelector {
    /// Create a selector.
    pub fn new() -> Self {
        Self
    }

    /// The winning certificate, or `None` for an empty candidate set.
    ///
    /// Entries that are not certificates are ignored.
    pub fn select_active<'a, I>(&self, candidates: I) -> Option<&'a MempoolEntry>
    where
        I: IntoIterator<Item = &'a MempoolEntry>,
    {
        candidates
            .into_iter()
            .filter_map(|entry| CertificateRank::of(entry).map(|rank| (rank, entry)))
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, entry)| entry)
    }

    /// Split candidates into the winner and the superseded rest (ordered by id).
    pub fn partition<'a, I>(&self, candidates: I) -> Option<(&'a MempoolEntry, Vec<&'a MempoolEntry>)>
    where
        I: IntoIterator<Item = &'a MempoolEntry>,
    {
        let mut certificates: Vec<&'a MempoolEntry> = candidates
            .into_iter()
            .filter(|entry| entry.certificate().is_some())
            .collect();
        let winner = self.select_active(certificates.iter().copied())?;
        certificates.retain(|entry| entry.id() != winner.id());
        certificates.sort_by_key(|entry| entry.id());
        Some((winner, certificates))
    }
}
