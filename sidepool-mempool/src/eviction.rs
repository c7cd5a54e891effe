//! Eviction policy.
//!
//! [`EvictionPolicyEngine::apply_tip_change`] is a pure decision function:
//! given the new height, the refreshed registry and the current index it
//! returns which entries must go and why. It never mutates anything; the
//! coordinator applies the plan.
//!
//! Rules, per sidechain present in the index:
//! 1. Sidechain unknown to confirmed state or ceased: evict everything.
//! 2. Epoch past its safeguard: evict its certificates and requests.
//! 3. Open epoch: drop certificates that cannot win on chain, then keep
//!    only the selector's winner.
//! 4. Forward transfers are untouched by epoch logic.
//! 5. Evictions cascade to mempool descendants.
//!
//! [`EvictionPolicyEngine::readmission`] makes the matching decision for
//! submissions rejected earlier: which ones the new confirmed state allows.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sidepool_core::{
    Amount, ChainTip, EntryId, EpochNumber, Height, MempoolEntry, Quality, SidechainId,
};
use tracing::debug;

use crate::admission::{check_chain_state, RejectedCache};
use crate::index::MempoolIndex;
use crate::quality::CertificateQualitySelector;
use crate::registry::{SidechainRegistry, SidechainState};

/// Why an entry left the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvictionReason {
    /// The sidechain no longer exists in confirmed state.
    SidechainRemoved,
    /// The sidechain has ceased.
    SidechainCeased,
    /// The bound epoch crossed its safeguard height.
    EpochClosed {
        /// Closed epoch.
        epoch: EpochNumber,
        /// Its safeguard height.
        safeguard_height: Height,
    },
    /// Lost the quality competition to another mempool certificate.
    Superseded {
        /// The winning certificate.
        by: EntryId,
    },
    /// Quality does not beat the certificate already confirmed for the epoch.
    SupersededByConfirmed {
        /// Confirmed quality.
        confirmed_quality: Quality,
    },
    /// Backward transfers exceed the balance available to the epoch.
    ExceedsBalance {
        /// Available balance.
        balance: Amount,
    },
    /// An entry it spends from was evicted.
    DependsOn {
        /// The evicted ancestor.
        parent: EntryId,
    },
    /// Failed re-admission while the pool was rebuilt after a halt.
    Reconciled,
}

impl EvictionReason {
    /// Whether the entry lost a quality competition.
    pub fn is_supersession(&self) -> bool {
        matches!(
            self,
            EvictionReason::Superseded { .. } | EvictionReason::SupersededByConfirmed { .. }
        )
    }
}

/// Decisions for one tip change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Entries to evict, cascaded descendants included.
    pub evictions: BTreeMap<EntryId, EvictionReason>,
}

impl EvictionPlan {
    /// Whether nothing is evicted.
    pub fn is_empty(&self) -> bool {
        self.evictions.is_empty()
    }

    /// Number of evicted entries.
    pub fn len(&self) -> usize {
        self.evictions.len()
    }

    /// Whether `id` is evicted.
    pub fn contains(&self, id: &EntryId) -> bool {
        self.evictions.contains_key(id)
    }

    /// Record an eviction unless one is already recorded for `id`.
    pub fn evict(&mut self, id: EntryId, reason: EvictionReason) {
        self.evictions.entry(id).or_insert(reason);
    }
}

/// Outcome of a mempool transition, published to the relay sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Tip before the transition (`None` for the first tip or for submissions).
    pub previous_tip: Option<ChainTip>,
    /// Tip the mempool is consistent with afterwards.
    pub tip: ChainTip,
    /// Every removed entry.
    pub evicted: BTreeSet<EntryId>,
    /// Removed entries that lost a quality competition (subset of `evicted`).
    pub superseded: BTreeSet<EntryId>,
    /// Previously rejected submissions admitted by this transition.
    pub readmitted: BTreeSet<EntryId>,
    /// Reason per removed entry.
    pub reasons: BTreeMap<EntryId, EvictionReason>,
}

impl EvictionReport {
    /// A report with no changes.
    pub fn empty(previous_tip: Option<ChainTip>, tip: ChainTip) -> Self {
        Self {
            previous_tip,
            tip,
            evicted: BTreeSet::new(),
            superseded: BTreeSet::new(),
            readmitted: BTreeSet::new(),
            reasons: BTreeMap::new(),
        }
    }

    /// Build a report from an applied plan.
    pub fn from_plan(
        previous_tip: Option<ChainTip>,
        tip: ChainTip,
        plan: &EvictionPlan,
        readmitted: BTreeSet<EntryId>,
    ) -> Self {
        Self {
            previous_tip,
            tip,
            evicted: plan.evictions.keys().copied().collect(),
            superseded: plan
                .evictions
                .iter()
                .filter(|(_, reason)| reason.is_supersession())
                .map(|(id, _)| *id)
                .collect(),
            readmitted,
            reasons: plan.evictions.clone(),
        }
    }

    /// Whether the transition changed nothing.
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.readmitted.is_empty()
    }
}

/// Remembered rejections re-checked against new confirmed state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readmission {
    /// Entries the confirmed state now allows, in id order.
    pub eligible: Vec<EntryId>,
    /// Entries whose rejection can no longer be lifted by a tip change.
    pub expired: Vec<EntryId>,
}

impl Readmission {
    /// Whether nothing changes for the rejected cache.
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty() && self.expired.is_empty()
    }
}

/// Decides evictions for a tip change.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionPolicyEngine {
    selector: CertificateQualitySelector,
}

impl EvictionPolicyEngine {
    /// Create an engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// The certificate selector in use.
    pub fn selector(&self) -> &CertificateQualitySelector {
        &self.selector
    }

    /// Compute evictions for a transition to `new_height`.
    ///
    /// `registry` must already describe `new_height`. The result depends
    /// only on the new height, the candidate set, first-seen times and ids.
    pub fn apply_tip_change(
        &self,
        old_height: Option<Height>,
        new_height: Height,
        registry: &SidechainRegistry,
        index: &MempoolIndex,
    ) -> EvictionPlan {
        let mut plan = EvictionPlan::default();

        for sidechain in index.sidechains() {
            match registry.get(sidechain) {
                Err(_) => self.evict_sidechain(&mut plan, index, sidechain, EvictionReason::SidechainRemoved),
                Ok(state) if !state.is_alive() => {
                    self.evict_sidechain(&mut plan, index, sidechain, EvictionReason::SidechainCeased)
                }
                Ok(state) => self.evict_epochs(&mut plan, index, state, new_height),
            }
        }

        // Cascade in id order so the recorded parent is deterministic.
        let roots: Vec<EntryId> = plan.evictions.keys().copied().collect();
        for root in roots {
            for child in index.descendants(&root) {
                plan.evict(child, EvictionReason::DependsOn { parent: root });
            }
        }

        debug!(
            old_height = ?old_height,
            new_height,
            evicted = plan.len(),
            "Computed eviction plan"
        );
        plan
    }

    /// Decide which remembered rejections `registry` now admits.
    ///
    /// Only confirmed-state rules are consulted; pool capacity and rival
    /// certificates are left to the caller inserting the entries.
    pub fn readmission(&self, registry: &SidechainRegistry, rejected: &RejectedCache) -> Readmission {
        let mut out = Readmission::default();
        for entry in rejected.iter() {
            match check_chain_state(entry, registry) {
                Ok(()) => out.eligible.push(entry.id()),
                Err(err) if err.is_state_dependent() => {}
                Err(_) => out.expired.push(entry.id()),
            }
        }
        debug!(
            eligible = out.eligible.len(),
            expired = out.expired.len(),
            waiting = rejected.len() - out.eligible.len() - out.expired.len(),
            "Checked remembered rejections"
        );
        out
    }

    fn evict_sidechain(
        &self,
        plan: &mut EvictionPlan,
        index: &MempoolIndex,
        sidechain: &SidechainId,
        reason: EvictionReason,
    ) {
        for entry in index.entries_for_sidechain(sidechain) {
            plan.evict(entry.id(), reason);
        }
    }

    fn evict_epochs(
        &self,
        plan: &mut EvictionPlan,
        index: &MempoolIndex,
        state: &SidechainState,
        height: Height,
    ) {
        for epoch in index.epochs_for_sidechain(&state.id) {
            if state.schedule.is_closed(epoch, height) {
                let reason = EvictionReason::EpochClosed {
                    epoch,
                    safeguard_height: state.schedule.safeguard_height(epoch),
                };
                for entry in index.entries_for_epoch(&state.id, epoch) {
                    plan.evict(entry.id(), reason);
                }
            } else {
                self.select_certificates(plan, index.certificates_for_epoch(&state.id, epoch), state, epoch);
            }
        }
    }

    fn select_certificates(
        &self,
        plan: &mut EvictionPlan,
        certificates: Vec<Arc<MempoolEntry>>,
        state: &SidechainState,
        epoch: EpochNumber,
    ) {
        let confirmed_quality = state.confirmed_quality(epoch);
        let balance = state.available_balance(epoch);

        let mut contenders = Vec::with_capacity(certificates.len());
        for entry in &certificates {
            let Some(cert) = entry.certificate() else {
                continue;
            };
            if let Some(confirmed) = confirmed_quality.filter(|q| cert.quality <= *q) {
                plan.evict(
                    entry.id(),
                    EvictionReason::SupersededByConfirmed {
                        confirmed_quality: confirmed,
                    },
                );
            } else if cert.backward_transfer_total() > balance {
                plan.evict(entry.id(), EvictionReason::ExceedsBalance { balance });
            } else {
                contenders.push(entry.as_ref());
            }
        }

        if let Some((winner, losers)) = self.selector.partition(contenders) {
            for loser in losers {
                plan.evict(loser.id(), EvictionReason::Superseded { by: winner.id() });
            }
        }
    }
}
