//! Reorg coordination.
//!
//! The coordinator turns a chain-tip notification into one atomic pool
//! transition:
//!
//! ```text
//!   TipChange ──► snapshot ──► registry.refresh ──► engine.apply_tip_change
//!                                                          │
//!        commit ◄── relay.publish ◄── invariants ◄── readmit ◄── index.remove
//! ```
//!
//! Every step works on copies of the registry, index and rejected cache.
//! Nothing is committed until the relay sink has accepted the report, so a
//! failure anywhere leaves the pool exactly as it was.

use std::collections::BTreeSet;
use std::sync::Arc;

use sidepool_core::{ChainTip, EntryId, Error, MempoolEntry, Result, TipChange};
use tracing::{debug, error, info, warn};

use crate::admission::{check_chain_state, check_pool, RejectedCache};
use crate::config::MempoolConfig;
use crate::eviction::{EvictionPlan, EvictionPolicyEngine, EvictionReason, EvictionReport, Readmission};
use crate::index::MempoolIndex;
use crate::invariants::{InvariantChecker, PoolView};
use crate::provider::{ChainSnapshotProvider, RelaySink};
use crate::registry::SidechainRegistry;

/// Everything a transition may change.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub(crate) registry: SidechainRegistry,
    pub(crate) index: MempoolIndex,
    pub(crate) rejected: RejectedCache,
}

impl PoolState {
    /// Empty state with a rejected cache of the configured size.
    pub fn new(config: &MempoolConfig) -> Self {
        Self {
            registry: SidechainRegistry::new(),
            index: MempoolIndex::new(),
            rejected: RejectedCache::new(config.rejected_cache_size),
        }
    }

    /// Sidechain registry.
    pub fn registry(&self) -> &SidechainRegistry {
        &self.registry
    }

    /// Pool contents.
    pub fn index(&self) -> &MempoolIndex {
        &self.index
    }

    /// Submissions waiting for the confirmed state to allow them.
    pub fn rejected(&self) -> &RejectedCache {
        &self.rejected
    }
}

/// Applies tip changes to the pool.
pub struct ReorgCoordinator {
    snapshots: Arc<dyn ChainSnapshotProvider>,
    relay: Arc<dyn RelaySink>,
    engine: EvictionPolicyEngine,
    invariants: InvariantChecker,
    last_tip: Option<ChainTip>,
}

impl ReorgCoordinator {
    /// Create a coordinator that has not seen any tip.
    pub fn new(snapshots: Arc<dyn ChainSnapshotProvider>, relay: Arc<dyn RelaySink>) -> Self {
        Self {
            snapshots,
            relay,
            engine: EvictionPolicyEngine::new(),
            invariants: InvariantChecker::standard(),
            last_tip: None,
        }
    }

    /// Replace the invariant set.
    pub fn with_invariants(mut self, invariants: InvariantChecker) -> Self {
        self.invariants = invariants;
        self
    }

    /// Last applied tip.
    pub fn last_tip(&self) -> Option<ChainTip> {
        self.last_tip
    }

    /// Whether the change's target tip is already applied.
    ///
    /// Tips are compared by height and hash, so a competing block at the
    /// applied height is not mistaken for it.
    pub fn is_applied(&self, change: &TipChange) -> bool {
        self.last_tip == Some(change.new)
    }

    /// Send a report to the relay sink.
    pub fn publish(&self, report: &EvictionReport) -> Result<()> {
        self.relay.publish(report)
    }

    /// Apply a tip change to `state`.
    ///
    /// Re-applying the current tip is a no-op returning an empty report. On
    /// error `state` is unchanged.
    pub fn chain_tip_changed(
        &mut self,
        change: TipChange,
        state: &mut PoolState,
        config: &MempoolConfig,
    ) -> Result<EvictionReport> {
        if self.is_applied(&change) {
            debug!(tip = %change.new, "Tip already applied");
            return Ok(EvictionReport::empty(Some(change.old), change.new));
        }
        if let Some(last) = self.last_tip.filter(|last| *last != change.old) {
            warn!(
                last_applied = %last,
                reported_old = %change.old,
                new = %change.new,
                "Tip change does not start at the last applied tip"
            );
        }

        let registry = self.refreshed_registry(&change.new, &state.registry)?;
        let old_height = self.last_tip.map(|tip| tip.height);
        let mut plan = self
            .engine
            .apply_tip_change(old_height, change.new.height, &registry, &state.index);

        let mut index = state.index.clone();
        for id in plan.evictions.keys() {
            index.remove(id);
        }

        let mut rejected = state.rejected.clone();
        let readmitted = if config.readmit_rejected {
            let candidates = self.engine.readmission(&registry, &rejected);
            readmit(candidates, &mut index, &mut rejected, &mut plan, config.max_entries)
        } else {
            BTreeSet::new()
        };

        if config.verify_invariants {
            self.verify(&PoolView::new(&state.registry, &state.index), &PoolView::new(&registry, &index))?;
        }

        let report = EvictionReport::from_plan(self.last_tip, change.new, &plan, readmitted);
        if let Err(err) = self.relay.publish(&report) {
            warn!(tip = %change.new, error = %err, "Relay refused eviction report, tip change rolled back");
            return Err(err);
        }

        self.commit(change.new, state, PoolState { registry, index, rejected });
        info!(
            height = change.new.height,
            hash = %change.new.hash,
            evicted = report.evicted.len(),
            superseded = report.superseded.len(),
            readmitted = report.readmitted.len(),
            "Applied tip change"
        );
        Ok(report)
    }

    /// Rebuild the pool from scratch at `tip`.
    ///
    /// Every held entry is re-admitted against fresh confirmed state in
    /// first-seen order; entries that no longer qualify are evicted.
    pub fn rebuild(&mut self, tip: ChainTip, state: &mut PoolState, config: &MempoolConfig) -> Result<EvictionReport> {
        let registry = self.refreshed_registry(&tip, &SidechainRegistry::new())?;

        let mut entries: Vec<Arc<MempoolEntry>> = state.index.iter().cloned().collect();
        entries.sort_by_key(|entry| (entry.first_seen(), entry.id()));

        let mut plan = EvictionPlan::default();
        let mut index = MempoolIndex::new();
        for entry in entries {
            if let Some(parent) = entry.depends_on().iter().find(|parent| plan.contains(parent)) {
                plan.evict(entry.id(), EvictionReason::DependsOn { parent: *parent });
                continue;
            }
            let admitted = check_chain_state(&entry, &registry)
                .and_then(|()| check_pool(&entry, &index, config.max_entries))
                .and_then(|superseded| {
                    supersede(&mut index, &mut plan, &superseded, entry.id());
                    index.insert(MempoolEntry::clone(&entry))
                });
            if let Err(err) = admitted {
                let id = entry.id();
                debug!(%id, error = %err, "Entry dropped during rebuild");
                plan.evict(id, EvictionReason::Reconciled);
                // Children seen earlier were re-admitted while waiting for this one.
                for child in index.descendants(&id) {
                    index.remove(&child);
                    plan.evict(child, EvictionReason::DependsOn { parent: id });
                }
            }
        }

        if config.verify_invariants {
            self.invariants
                .check_all(&PoolView::new(&registry, &index))
                .map_err(|violation| {
                    error!(invariant = %violation.name, height = tip.height, "Pool still inconsistent after rebuild: {}", violation.message);
                    Error::from(violation)
                })?;
        }

        let report = EvictionReport::from_plan(self.last_tip, tip, &plan, BTreeSet::new());
        self.relay.publish(&report)?;

        let rejected = state.rejected.clone();
        self.commit(tip, state, PoolState { registry, index, rejected });
        warn!(height = tip.height, evicted = report.evicted.len(), "Pool rebuilt");
        Ok(report)
    }

    fn refreshed_registry(&self, tip: &ChainTip, current: &SidechainRegistry) -> Result<SidechainRegistry> {
        let snapshot = self.snapshots.snapshot(tip)?;
        if snapshot.tip.height == tip.height && snapshot.tip.hash != tip.hash {
            return Err(Error::snapshot(format!(
                "snapshot describes {} instead of {}",
                snapshot.tip, tip
            )));
        }
        let mut registry = current.clone();
        let delta = registry.refresh(tip.height, snapshot)?;
        if !delta.is_empty() {
            debug!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                status_changed = delta.status_changed.len(),
                "Sidechain set changed"
            );
        }
        Ok(registry)
    }

    fn verify(&self, old: &PoolView<'_>, new: &PoolView<'_>) -> Result<()> {
        self.invariants.check_transition(old, new).map_err(|violation| {
            error!(
                invariant = %violation.name,
                height = ?violation.state_height,
                "Invariant violated, tip change refused: {}",
                violation.message
            );
            Error::from(violation)
        })
    }

    fn commit(&mut self, tip: ChainTip, state: &mut PoolState, next: PoolState) {
        *state = next;
        self.last_tip = Some(tip);
    }
}

impl std::fmt::Debug for ReorgCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReorgCoordinator")
            .field("last_tip", &self.last_tip)
            .field("invariants", &self.invariants)
            .finish_non_exhaustive()
    }
}

/// Insert the rejections the engine found eligible, in id order.
fn readmit(
    candidates: Readmission,
    index: &mut MempoolIndex,
    rejected: &mut RejectedCache,
    plan: &mut EvictionPlan,
    capacity: usize,
) -> BTreeSet<EntryId> {
    for id in &candidates.expired {
        if rejected.take(id).is_some() {
            debug!(%id, "Forgetting rejected submission");
        }
    }

    let mut readmitted = BTreeSet::new();
    for id in candidates.eligible {
        let Some(entry) = rejected.take(&id) else { continue };
        match check_pool(&entry, index, capacity) {
            Ok(superseded) => {
                supersede(index, plan, &superseded, id);
                if index.insert(entry).is_ok() {
                    readmitted.insert(id);
                }
            }
            Err(Error::PoolFull { .. }) => rejected.remember(entry),
            Err(err) => {
                debug!(%id, error = %err, "Forgetting rejected submission");
            }
        }
    }
    readmitted
}

/// Remove certificates beaten by `winner`, with their descendants.
pub(crate) fn supersede(index: &mut MempoolIndex, plan: &mut EvictionPlan, superseded: &[EntryId], winner: EntryId) {
    for loser in superseded {
        let mut removed = index.remove(loser).into_iter();
        if removed.next().is_some() {
            plan.evict(*loser, EvictionReason::Superseded { by: winner });
        }
        for child in removed {
            plan.evict(child.id(), EvictionReason::DependsOn { parent: *loser });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockChain, RecordingSink};
    use chrono::{TimeZone, Utc};
    use sidepool_core::{hash, Certificate, ErrorCode, ForwardTransfer, SidechainAddress, SidechainId};

    struct Setup {
        chain: MockChain,
        relay: Arc<RecordingSink>,
        coordinator: ReorgCoordinator,
        state: PoolState,
        config: MempoolConfig,
        sidechain: SidechainId,
    }

    fn setup() -> Setup {
        let chain = MockChain::new();
        let sidechain = chain.create_sidechain(b"sc", 10, 1_000);
        // Created at height 1; epoch 0 spans 1..=10 and is certified at 11.
        chain.mine_to(10);
        chain.certify(sidechain, 0, 1, 0);
        chain.mine_to(12);
        let relay = Arc::new(RecordingSink::new());
        let coordinator = ReorgCoordinator::new(Arc::new(chain.clone()), relay.clone());
        let config = MempoolConfig::for_testing();
        let state = PoolState::new(&config);
        Setup {
            chain,
            relay,
            coordinator,
            state,
            config,
            sidechain,
        }
    }

    fn apply(s: &mut Setup, change: TipChange) -> Result<EvictionReport> {
        s.coordinator.chain_tip_changed(change, &mut s.state, &s.config)
    }

    fn first_change(s: &Setup) -> TipChange {
        let tip = s.chain.tip();
        TipChange::new(tip, tip)
    }

    #[test]
    fn test_first_tip_populates_registry() {
        let mut s = setup();
        let change = first_change(&s);
        let report = apply(&mut s, change).unwrap();

        assert!(report.is_empty());
        assert_eq!(s.coordinator.last_tip(), Some(change.new));
        assert!(s.state.registry().contains(&s.sidechain));
        assert_eq!(s.relay.reports().len(), 1);
    }

    #[test]
    fn test_reapplying_tip_is_noop() {
        let mut s = setup();
        let change = first_change(&s);
        apply(&mut s, change).unwrap();
        let report = apply(&mut s, change).unwrap();

        assert!(report.is_empty());
        assert_eq!(s.relay.reports().len(), 1);
    }

    #[test]
    fn test_competing_tip_at_same_height_is_applied() {
        let mut s = setup();
        let change = first_change(&s);
        apply(&mut s, change).unwrap();

        let fork = s.chain.fork();
        fork.disconnect();
        fork.mine();
        let change = s.chain.adopt(&fork);
        assert_eq!(change.old.height, change.new.height);
        assert_ne!(change.old.hash, change.new.hash);

        assert!(!s.coordinator.is_applied(&change));
        apply(&mut s, change).unwrap();
        assert_eq!(s.coordinator.last_tip(), Some(change.new));
        assert_eq!(s.relay.reports().len(), 2);

        assert!(s.coordinator.is_applied(&change));
        assert!(apply(&mut s, change).unwrap().is_empty());
        assert_eq!(s.relay.reports().len(), 2);
    }

    #[test]
    fn test_certificate_evicted_at_safeguard() {
        let mut s = setup();
        let change = first_change(&s);
        apply(&mut s, change).unwrap();

        // Epoch 1 spans 11..=20 and closes at 22.
        let old = s.chain.tip();
        s.chain.mine_to(21);
        let change = TipChange::new(old, s.chain.tip());
        apply(&mut s, change).unwrap();

        let cert = MempoolEntry::new(Certificate::builder(s.sidechain, 1).quality(3).build());
        let cert_id = cert.id();
        check_chain_state(&cert, s.state.registry()).unwrap();
        s.state.index.insert(cert).unwrap();

        let old = s.chain.tip();
        s.chain.mine_to(22);
        let new = s.chain.tip();
        let report = apply(&mut s, TipChange::new(old, new)).unwrap();
        assert!(report.evicted.contains(&cert_id));
        assert!(matches!(
            report.reasons[&cert_id],
            EvictionReason::EpochClosed { epoch: 1, safeguard_height: 22 }
        ));
        assert!(s.state.index().is_empty());
    }

    #[test]
    fn test_relay_failure_rolls_back() {
        let mut s = setup();
        let change = first_change(&s);
        apply(&mut s, change).unwrap();
        let before = s.coordinator.last_tip();

        let ft = MempoolEntry::new(ForwardTransfer {
            sidechain_id: s.sidechain,
            amount: 5,
            destination: SidechainAddress(hash(b"d")),
        });
        s.state.index.insert(ft).unwrap();

        let old = s.chain.tip();
        s.chain.mine_to(13);
        s.relay.fail_next("relay offline");
        let new = s.chain.tip();
        let err = apply(&mut s, TipChange::new(old, new)).unwrap_err();

        assert_eq!(err.code(), ErrorCode::Relay);
        assert_eq!(s.coordinator.last_tip(), before);
        assert_eq!(s.state.registry().height(), Some(12));
        assert_eq!(s.state.index().len(), 1);
    }

    #[test]
    fn test_invariant_violation_refuses_transition() {
        let mut s = setup();
        let change = first_change(&s);
        apply(&mut s, change).unwrap();

        let ft = MempoolEntry::new(ForwardTransfer {
            sidechain_id: s.sidechain,
            amount: 5,
            destination: SidechainAddress(hash(b"d")),
        });
        let entry = s.state.index.insert(ft).unwrap();
        s.state
            .index
            .corrupt_for_test(SidechainId::new(hash(b"elsewhere")), entry.id());

        let old = s.chain.tip();
        s.chain.mine_to(13);
        let new = s.chain.tip();
        let err = apply(&mut s, TipChange::new(old, new)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvariantViolation);
        assert_eq!(s.state.registry().height(), Some(12));
    }

    #[test]
    fn test_readmission_after_reorg() {
        let mut s = setup();
        let change = first_change(&s);
        apply(&mut s, change).unwrap();

        // Certificate for epoch 1 before it ends: rejected but remembered.
        let cert = MempoolEntry::new(Certificate::builder(s.sidechain, 1).quality(3).build());
        let err = check_chain_state(&cert, s.state.registry()).unwrap_err();
        assert!(err.is_state_dependent());
        let cert_id = cert.id();
        s.state.rejected.remember(cert);

        let old = s.chain.tip();
        s.chain.mine_to(20);
        let new = s.chain.tip();
        let report = apply(&mut s, TipChange::new(old, new)).unwrap();

        assert!(report.readmitted.contains(&cert_id));
        assert!(s.state.index().contains(&cert_id));
        assert!(s.state.rejected().is_empty());
    }

    #[test]
    fn test_rebuild_drops_stale_entries() {
        let mut s = setup();
        let change = first_change(&s);
        apply(&mut s, change).unwrap();

        let ft = MempoolEntry::new(ForwardTransfer {
            sidechain_id: s.sidechain,
            amount: 5,
            destination: SidechainAddress(hash(b"d")),
        });
        let ft_id = ft.id();
        s.state.index.insert(ft).unwrap();
        // Epoch 0 is closed at 12.
        let stale = MempoolEntry::new(Certificate::builder(s.sidechain, 0).quality(1).build());
        let stale_id = stale.id();
        s.state.index.insert(stale).unwrap();

        let tip = s.chain.tip();
        let report = s.coordinator.rebuild(tip, &mut s.state, &s.config).unwrap();
        assert!(report.evicted.contains(&stale_id));
        assert_eq!(report.reasons[&stale_id], EvictionReason::Reconciled);
        assert!(s.state.index().contains(&ft_id));
    }

    #[test]
    fn test_rebuild_drops_children_of_stale_parent() {
        let mut s = setup();
        let change = first_change(&s);
        apply(&mut s, change).unwrap();

        // Epoch 0 is closed at 12; the child was seen before its parent.
        let stale = MempoolEntry::builder(Certificate::builder(s.sidechain, 0).quality(1).build())
            .seen_at(Utc.timestamp_opt(20, 0).unwrap())
            .build();
        let stale_id = stale.id();
        let child = MempoolEntry::builder(ForwardTransfer {
            sidechain_id: s.sidechain,
            amount: 5,
            destination: SidechainAddress(hash(b"d")),
        })
        .depends_on([stale_id])
        .seen_at(Utc.timestamp_opt(10, 0).unwrap())
        .build();
        let child_id = child.id();
        s.state.index.insert(child).unwrap();
        s.state.index.insert(stale).unwrap();

        let tip = s.chain.tip();
        let report = s.coordinator.rebuild(tip, &mut s.state, &s.config).unwrap();
        assert_eq!(report.reasons[&stale_id], EvictionReason::Reconciled);
        assert_eq!(report.reasons[&child_id], EvictionReason::DependsOn { parent: stale_id });
        assert!(s.state.index().is_empty());
    }
}
