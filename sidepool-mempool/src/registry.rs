//! Sidechain registry.
//!
//! The registry is a pure function of confirmed chain state: every tip
//! change rebuilds it from a [`ConfirmedSnapshot`] and it never looks at
//! the mempool. It answers the questions eviction and admission ask:
//! is the sidechain alive, which epoch is open, where is the safeguard.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sidepool_core::{
    Amount, ChainTip, EpochNumber, EpochSchedule, Error, Height, Quality, Result, SidechainFees,
    SidechainId, SidechainStatus,
};
use tracing::debug;

use crate::provider::{ConfirmedCertificate, ConfirmedSidechain, ConfirmedSnapshot};

/// Derived state of one sidechain at the registry's tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidechainState {
    /// Sidechain id.
    pub id: SidechainId,
    /// Epoch boundaries.
    pub schedule: EpochSchedule,
    /// Lifecycle state at the tip.
    pub status: SidechainStatus,
    /// Mature balance.
    pub balance: Amount,
    /// Amounts maturing at the given height.
    pub immature_amounts: BTreeMap<Height, Amount>,
    /// Epoch containing the tip.
    pub current_epoch: Option<EpochNumber>,
    /// Epoch whose certificate the next block may carry.
    pub open_epoch: Option<EpochNumber>,
    /// Safeguard height of the first epoch still waiting for a certificate.
    pub safeguard_height: Height,
    /// First ceased height.
    pub ceasing_height: Height,
    /// Last confirmed certificate.
    pub last_certificate: Option<ConfirmedCertificate>,
    /// Minimum fees.
    pub fees: SidechainFees,
    /// Field elements per backward-transfer request.
    pub request_data_length: usize,
}

impl SidechainState {
    fn derive(confirmed: ConfirmedSidechain, height: Height) -> Result<Self> {
        confirmed.schedule.validate(confirmed.id)?;

        let schedule = confirmed.schedule;
        let pending = confirmed
            .last_certificate
            .map_or(0, |cert| cert.epoch + 1);
        let status = if height >= confirmed.ceasing_height {
            SidechainStatus::Ceased
        } else {
            SidechainStatus::Alive
        };

        Ok(Self {
            id: confirmed.id,
            schedule,
            status,
            balance: confirmed.balance,
            immature_amounts: confirmed.immature_amounts,
            current_epoch: schedule.epoch_at(height),
            open_epoch: schedule.open_epoch(height),
            safeguard_height: schedule.safeguard_height(pending),
            ceasing_height: confirmed.ceasing_height,
            last_certificate: confirmed.last_certificate,
            fees: confirmed.fees,
            request_data_length: confirmed.request_data_length,
        })
    }

    /// Whether the sidechain is alive.
    pub fn is_alive(&self) -> bool {
        self.status == SidechainStatus::Alive
    }

    /// Sum of all immature amounts.
    pub fn immature_total(&self) -> Amount {
        self.immature_amounts
            .values()
            .fold(0, |acc: Amount, v| acc.saturating_add(*v))
    }

    /// Balance available to a certificate for `epoch`.
    ///
    /// A certificate superseding the confirmed one for the same epoch gets
    /// the confirmed backward transfers back.
    pub fn available_balance(&self, epoch: EpochNumber) -> Amount {
        match self.last_certificate {
            Some(cert) if cert.epoch == epoch => {
                self.balance.saturating_add(cert.backward_transfer_total)
            }
            _ => self.balance,
        }
    }

    /// Quality a certificate for `epoch` must exceed, if one is confirmed.
    pub fn confirmed_quality(&self, epoch: EpochNumber) -> Option<Quality> {
        self.last_certificate
            .filter(|cert| cert.epoch == epoch)
            .map(|cert| cert.quality)
    }
}

/// What changed between two refreshes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDelta {
    /// Sidechains that appeared.
    pub added: BTreeSet<SidechainId>,
    /// Sidechains that disappeared (creation rolled back).
    pub removed: BTreeSet<SidechainId>,
    /// Sidechains whose status changed.
    pub status_changed: BTreeSet<SidechainId>,
}

impl RegistryDelta {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.status_changed.is_empty()
    }
}

/// Per-sidechain state derived from the confirmed chain.
#[derive(Debug, Clone, Default)]
pub struct SidechainRegistry {
    tip: Option<ChainTip>,
    sidechains: BTreeMap<SidechainId, SidechainState>,
}

impl SidechainRegistry {
    /// Create an empty registry (no tip seen yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a confirmed snapshot taken at `chain_height`.
    ///
    /// On error the registry is left untouched.
    pub fn refresh(&mut self, chain_height: Height, snapshot: ConfirmedSnapshot) -> Result<RegistryDelta> {
        if snapshot.tip.height != chain_height {
            return Err(Error::SnapshotMismatch {
                expected: chain_height,
                got: snapshot.tip.height,
            });
        }

        let mut sidechains = BTreeMap::new();
        for confirmed in snapshot.sidechains {
            let state = SidechainState::derive(confirmed, chain_height)?;
            sidechains.insert(state.id, state);
        }

        let mut delta = RegistryDelta::default();
        for (id, state) in &sidechains {
            match self.sidechains.get(id) {
                None => {
                    delta.added.insert(*id);
                }
                Some(previous) if previous.status != state.status => {
                    delta.status_changed.insert(*id);
                }
                Some(_) => {}
            }
        }
        delta.removed = self
            .sidechains
            .keys()
            .filter(|id| !sidechains.contains_key(id))
            .copied()
            .collect();

        debug!(
            height = chain_height,
            sidechains = sidechains.len(),
            added = delta.added.len(),
            removed = delta.removed.len(),
            "Refreshed sidechain registry"
        );

        self.tip = Some(snapshot.tip);
        self.sidechains = sidechains;
        Ok(delta)
    }

    /// Tip the registry describes.
    pub fn tip(&self) -> Option<ChainTip> {
        self.tip
    }

    /// Chain height the registry describes.
    pub fn height(&self) -> Option<Height> {
        self.tip.map(|tip| tip.height)
    }

    /// State of a sidechain.
    pub fn get(&self, id: &SidechainId) -> Result<&SidechainState> {
        self.sidechains.get(id).ok_or(Error::UnknownSidechain(*id))
    }

    /// Whether the sidechain exists in confirmed state.
    pub fn contains(&self, id: &SidechainId) -> bool {
        self.sidechains.contains_key(id)
    }

    /// Lifecycle state of a sidechain.
    pub fn status(&self, id: &SidechainId) -> Result<SidechainStatus> {
        Ok(self.get(id)?.status)
    }

    /// Safeguard height of `epoch` for a sidechain.
    pub fn safeguard_height(&self, id: &SidechainId, epoch: EpochNumber) -> Result<Height> {
        Ok(self.get(id)?.schedule.safeguard_height(epoch))
    }

    /// Whether `epoch` has crossed its safeguard at the registry's tip.
    pub fn is_epoch_closed(&self, id: &SidechainId, epoch: EpochNumber) -> Result<bool> {
        let state = self.get(id)?;
        let height = self.height().unwrap_or(0);
        Ok(state.schedule.is_closed(epoch, height))
    }

    /// All sidechains, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &SidechainState> {
        self.sidechains.values()
    }

    /// Number of known sidechains.
    pub fn len(&self) -> usize {
        self.sidechains.len()
    }

    /// Whether no sidechain is known.
    pub fn is_empty(&self) -> bool {
        self.sidechains.is_empty()
    }
}
