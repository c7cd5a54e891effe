//! Admission checks for new submissions.
//!
//! Checks run in three stages, cheapest and most permanent first:
//! 1. [`check_stateless`] - malformed input and proof attestation
//! 2. [`check_chain_state`] - confirmed sidechain state from the registry
//! 3. [`check_pool`] - duplicates, capacity and certificate competition
//!
//! A submission that fails stage 2 with a state-dependent error is kept in
//! a [`RejectedCache`] and re-checked on later tip changes.

use std::collections::{BTreeMap, VecDeque};

use sidepool_core::{
    Artifact, EntryId, Error, Height, MempoolEntry, Result,
};

use crate::index::MempoolIndex;
use crate::provider::ProofOracle;
use crate::quality::CertificateRank;
use crate::registry::SidechainRegistry;

/// Reject malformed artifacts and unattested certificates.
pub fn check_stateless(entry: &MempoolEntry, oracle: &dyn ProofOracle) -> Result<()> {
    match entry.artifact() {
        Artifact::ForwardTransfer(ft) => {
            if ft.amount <= 0 {
                return Err(Error::InvalidAmount { amount: ft.amount });
            }
        }
        Artifact::BackwardTransferRequest(req) => {
            if req.fee < 0 {
                return Err(Error::InvalidAmount { amount: req.fee });
            }
        }
        Artifact::Certificate(cert) => {
            if let Some(bt) = cert.backward_transfers.iter().find(|bt| bt.amount <= 0) {
                return Err(Error::InvalidAmount { amount: bt.amount });
            }
            for fee in [cert.fees.forward_transfer, cert.fees.btr_request] {
                if fee < 0 {
                    return Err(Error::InvalidAmount { amount: fee });
                }
            }
            oracle
                .attest(cert)
                .map_err(|reason| Error::InvalidProofReference {
                    sidechain: cert.sidechain_id,
                    epoch: cert.epoch,
                    reason,
                })?;
        }
    }
    Ok(())
}

/// Check an entry against confirmed sidechain state.
pub fn check_chain_state(entry: &MempoolEntry, registry: &SidechainRegistry) -> Result<()> {
    let sidechain = entry.sidechain_id();
    let state = registry.get(&sidechain)?;
    let height = registry.height().unwrap_or(0);

    if !state.is_alive() {
        return Err(Error::SidechainNotAlive {
            sidechain,
            ceasing_height: state.ceasing_height,
        });
    }

    match entry.artifact() {
        Artifact::ForwardTransfer(ft) => {
            if ft.amount <= state.fees.forward_transfer {
                return Err(Error::FeeTooLow {
                    sidechain,
                    fee: ft.amount,
                    minimum: state.fees.forward_transfer,
                });
            }
        }
        Artifact::BackwardTransferRequest(req) => {
            if state.request_data_length == 0 || req.request_data.len() != state.request_data_length {
                return Err(Error::InvalidRequestData {
                    sidechain,
                    expected: state.request_data_length,
                    got: req.request_data.len(),
                });
            }
            if req.fee < state.fees.btr_request {
                return Err(Error::FeeTooLow {
                    sidechain,
                    fee: req.fee,
                    minimum: state.fees.btr_request,
                });
            }
            check_epoch_open(state.schedule.is_closed(req.target_epoch, height), entry, registry, height)?;
            let next_epoch = state.schedule.epoch_at(height + 1).unwrap_or(0);
            if req.target_epoch > next_epoch {
                return Err(Error::EpochNotReached {
                    sidechain,
                    epoch: req.target_epoch,
                    height,
                });
            }
        }
        Artifact::Certificate(cert) => {
            if !state.schedule.has_ended(cert.epoch, height) {
                return Err(Error::EpochNotReached {
                    sidechain,
                    epoch: cert.epoch,
                    height,
                });
            }
            check_epoch_open(state.schedule.is_closed(cert.epoch, height), entry, registry, height)?;
            if let Some(best) = state.confirmed_quality(cert.epoch) {
                if cert.quality <= best {
                    return Err(Error::QualityTooLow {
                        sidechain,
                        epoch: cert.epoch,
                        quality: cert.quality,
                        best,
                        confirmed: true,
                    });
                }
            }
            let balance = state.available_balance(cert.epoch);
            let requested = cert.backward_transfer_total();
            if requested > balance {
                return Err(Error::InsufficientBalance {
                    sidechain,
                    requested,
                    balance,
                });
            }
        }
    }
    Ok(())
}

fn check_epoch_open(
    closed: bool,
    entry: &MempoolEntry,
    registry: &SidechainRegistry,
    height: Height,
) -> Result<()> {
    match entry.epoch() {
        Some(epoch) if closed => Err(Error::EpochAlreadyClosed {
            sidechain: entry.sidechain_id(),
            epoch,
            safeguard_height: registry.safeguard_height(&entry.sidechain_id(), epoch)?,
            height,
        }),
        _ => Ok(()),
    }
}

/// Check an entry against the current mempool contents.
///
/// Returns the certificates the entry supersedes, ordered by id.
pub fn check_pool(entry: &MempoolEntry, index: &MempoolIndex, capacity: usize) -> Result<Vec<EntryId>> {
    if index.contains(&entry.id()) {
        return Err(Error::DuplicateEntry(entry.id()));
    }
    if index.len() >= capacity {
        return Err(Error::PoolFull { capacity });
    }

    let (Some(rank), Some(epoch)) = (CertificateRank::of(entry), entry.epoch()) else {
        return Ok(Vec::new());
    };
    let sidechain = entry.sidechain_id();
    let rivals = index.certificates_for_epoch(&sidechain, epoch);

    if let Some(best) = rivals
        .iter()
        .filter_map(|rival| CertificateRank::of(rival))
        .max()
        .filter(|best| *best > rank)
    {
        return Err(Error::QualityTooLow {
            sidechain,
            epoch,
            quality: rank.quality,
            best: best.quality,
            confirmed: false,
        });
    }
    Ok(rivals.iter().map(|rival| rival.id()).collect())
}

/// Bounded memory of submissions rejected by confirmed state alone.
///
/// When full, the oldest remembered submission is forgotten.
#[derive(Debug, Clone)]
pub struct RejectedCache {
    capacity: usize,
    entries: BTreeMap<EntryId, MempoolEntry>,
    order: VecDeque<EntryId>,
}

impl RejectedCache {
    /// Create a cache holding at most `capacity` submissions.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Remember a rejected submission.
    pub fn remember(&mut self, entry: MempoolEntry) {
        if self.capacity == 0 || self.entries.contains_key(&entry.id()) {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(entry.id());
        self.entries.insert(entry.id(), entry);
    }

    /// Forget a submission, returning it if it was remembered.
    pub fn take(&mut self, id: &EntryId) -> Option<MempoolEntry> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|queued| queued != id);
        Some(entry)
    }

    /// Whether a submission is remembered.
    pub fn contains(&self, id: &EntryId) -> bool {
        self.entries.contains_key(id)
    }

    /// Remembered submissions, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    /// Number of remembered submissions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
