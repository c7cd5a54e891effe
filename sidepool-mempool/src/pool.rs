//! The sidechain mempool facade.
//!
//! All mutation goes through one write lock: submissions and tip changes
//! never interleave. Queries take the read lock and return owned snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sidepool_core::{
    BackwardTransferRequest, Certificate, ChainTip, EntryId, EntryKind, Error, ErrorCode,
    ForwardTransfer, MempoolEntry, Result, SidechainId, TipChange,
};
use tracing::{debug, error, info, warn};

use crate::admission::{check_chain_state, check_pool, check_stateless};
use crate::config::MempoolConfig;
use crate::coordinator::{PoolState, ReorgCoordinator};
use crate::eviction::{EvictionPlan, EvictionReason, EvictionReport};
use crate::provider::{ChainSnapshotProvider, ProofOracle, RelaySink};
use crate::registry::SidechainState;

/// Why the pool stopped accepting mutations.
#[derive(Debug, Clone)]
struct Halt {
    reason: String,
    /// Latest tip notified while halted.
    tip: ChainTip,
}

struct PoolInner {
    state: PoolState,
    coordinator: ReorgCoordinator,
    halt: Option<Halt>,
}

/// Sidechain-aware mempool.
pub struct SidechainMempool {
    config: MempoolConfig,
    oracle: Arc<dyn ProofOracle>,
    inner: RwLock<PoolInner>,
    total_submitted: AtomicU64,
    total_admitted: AtomicU64,
    total_rejected: AtomicU64,
    total_evicted: AtomicU64,
}

impl SidechainMempool {
    /// Create an empty mempool. It accepts nothing until the first tip change.
    pub fn new(
        config: MempoolConfig,
        snapshots: Arc<dyn ChainSnapshotProvider>,
        oracle: Arc<dyn ProofOracle>,
        relay: Arc<dyn RelaySink>,
    ) -> Self {
        let state = PoolState::new(&config);
        Self {
            config,
            oracle,
            inner: RwLock::new(PoolInner {
                state,
                coordinator: ReorgCoordinator::new(snapshots, relay),
                halt: None,
            }),
            total_submitted: AtomicU64::new(0),
            total_admitted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Tip changes
    // ------------------------------------------------------------------------

    /// Bring the pool in line with a new confirmed tip.
    ///
    /// An invariant violation halts the pool; every later mutation fails with
    /// [`Error::Halted`] until [`reconcile`](Self::reconcile) succeeds.
    pub fn notify_chain_tip_changed(&self, change: TipChange) -> Result<EvictionReport> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        if let Some(halt) = inner.halt.as_mut() {
            halt.tip = change.new;
            return Err(Error::Halted(halt.reason.clone()));
        }

        match inner
            .coordinator
            .chain_tip_changed(change, &mut inner.state, &self.config)
        {
            Ok(report) => {
                self.total_evicted
                    .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);
                Ok(report)
            }
            Err(err) => {
                if err.code() == ErrorCode::InvariantViolation {
                    error!(tip = %change.new, error = %err, "Mempool halted");
                    inner.halt = Some(Halt {
                        reason: err.to_string(),
                        tip: change.new,
                    });
                }
                Err(err)
            }
        }
    }

    /// Rebuild the pool against the latest known tip and lift a halt.
    pub fn reconcile(&self) -> Result<EvictionReport> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let tip = inner
            .halt
            .as_ref()
            .map(|halt| halt.tip)
            .or_else(|| inner.coordinator.last_tip())
            .ok_or_else(|| Error::snapshot("no chain tip to reconcile against"))?;

        let report = inner
            .coordinator
            .rebuild(tip, &mut inner.state, &self.config)?;
        if inner.halt.take().is_some() {
            info!(tip = %tip, evicted = report.evicted.len(), "Mempool reconciled, halt lifted");
        }
        self.total_evicted
            .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Submissions
    // ------------------------------------------------------------------------

    /// Submit a forward transfer.
    pub fn submit_forward_transfer(&self, transfer: ForwardTransfer) -> Result<EntryId> {
        self.submit(MempoolEntry::new(transfer))
    }

    /// Submit a backward-transfer request.
    pub fn submit_backward_transfer_request(&self, request: BackwardTransferRequest) -> Result<EntryId> {
        self.submit(MempoolEntry::new(request))
    }

    /// Submit an attested certificate.
    pub fn submit_certificate(&self, certificate: Certificate) -> Result<EntryId> {
        self.submit(MempoolEntry::new(certificate))
    }

    /// Submit any entry.
    ///
    /// A duplicate is accepted as a no-op and returns the existing id. A
    /// certificate that beats the pool's certificate for the same epoch
    /// replaces it; the relay is told before the pool changes.
    pub fn submit(&self, entry: MempoolEntry) -> Result<EntryId> {
        self.total_submitted.fetch_add(1, Ordering::Relaxed);
        let id = entry.id();

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if let Some(halt) = &inner.halt {
            return Err(Error::Halted(halt.reason.clone()));
        }
        if inner.state.index.contains(&id) {
            debug!(%id, "Duplicate submission ignored");
            return Ok(id);
        }

        match self.admit(inner, entry) {
            Ok(()) => {
                self.total_admitted.fetch_add(1, Ordering::Relaxed);
                Ok(id)
            }
            Err(err) => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(%id, code = err.code().code(), error = %err, "Submission rejected");
                Err(err)
            }
        }
    }

    fn admit(&self, inner: &mut PoolInner, entry: MempoolEntry) -> Result<()> {
        check_stateless(&entry, self.oracle.as_ref())?;
        if let Err(err) = check_chain_state(&entry, &inner.state.registry) {
            if err.is_state_dependent() {
                inner.state.rejected.remember(entry);
            }
            return Err(err);
        }

        let id = entry.id();
        let superseded = check_pool(&entry, &inner.state.index, self.config.max_entries)?;
        if !superseded.is_empty() {
            self.announce_supersession(inner, id, &superseded)?;
            for loser in &superseded {
                inner.state.index.remove(loser);
            }
        }
        inner.state.index.insert(entry)?;
        debug!(%id, "Entry admitted");
        Ok(())
    }

    fn announce_supersession(&self, inner: &PoolInner, winner: EntryId, superseded: &[EntryId]) -> Result<()> {
        let Some(tip) = inner.state.registry.tip() else {
            return Ok(());
        };
        let mut plan = EvictionPlan::default();
        for loser in superseded {
            plan.evict(*loser, EvictionReason::Superseded { by: winner });
            for child in inner.state.index.descendants(loser) {
                plan.evict(child, EvictionReason::DependsOn { parent: *loser });
            }
        }
        let report = EvictionReport::from_plan(None, tip, &plan, BTreeSet::new());
        if let Err(err) = inner.coordinator.publish(&report) {
            warn!(%winner, error = %err, "Relay refused supersession report");
            return Err(err);
        }
        self.total_evicted
            .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);
        info!(%winner, superseded = superseded.len(), "Certificate superseded pool rivals");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current entries for a sidechain, ordered by id.
    pub fn query_mempool_entries(&self, sidechain: &SidechainId) -> EntrySnapshot {
        EntrySnapshot {
            entries: self.inner.read().state.index.entries_for_sidechain(sidechain),
        }
    }

    /// Confirmed state of a sidechain at the pool's tip.
    pub fn query_sidechain_state(&self, sidechain: &SidechainId) -> Result<SidechainState> {
        self.inner.read().state.registry.get(sidechain).cloned()
    }

    /// Whether an entry is held.
    pub fn contains(&self, id: &EntryId) -> bool {
        self.inner.read().state.index.contains(id)
    }

    /// A held entry.
    pub fn get(&self, id: &EntryId) -> Option<Arc<MempoolEntry>> {
        self.inner.read().state.index.get(id).cloned()
    }

    /// Number of held entries.
    pub fn len(&self) -> usize {
        self.inner.read().state.index.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tip the pool is consistent with.
    pub fn tip(&self) -> Option<ChainTip> {
        self.inner.read().coordinator.last_tip()
    }

    /// Whether mutations are refused.
    pub fn is_halted(&self) -> bool {
        self.inner.read().halt.is_some()
    }

    /// Why the pool halted.
    pub fn halt_reason(&self) -> Option<String> {
        self.inner.read().halt.as_ref().map(|halt| halt.reason.clone())
    }

    /// Get pool statistics.
    pub fn stats(&self) -> MempoolStats {
        let inner = self.inner.read();
        MempoolStats {
            size: inner.state.index.len(),
            capacity: self.config.max_entries,
            by_kind: inner.state.index.count_by_kind(),
            sidechains: inner.state.registry.len(),
            rejected_cached: inner.state.rejected.len(),
            tip: inner.coordinator.last_tip(),
            halted: inner.halt.is_some(),
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
            total_admitted: self.total_admitted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SidechainMempool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidechainMempool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a sidechain's entries.
///
/// Iteration can be restarted any number of times and always yields the
/// same entries.
#[derive(Debug, Clone, Default)]
pub struct EntrySnapshot {
    entries: Vec<Arc<MempoolEntry>>,
}

impl EntrySnapshot {
    /// Iterate over the entries.
    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.iter().map(Arc::as_ref)
    }

    /// Identifiers, ordered.
    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|entry| entry.id()).collect()
    }

    /// Entries of one kind.
    pub fn of_kind(&self, kind: EntryKind) -> impl Iterator<Item = &MempoolEntry> {
        self.iter().filter(move |entry| entry.kind() == kind)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for EntrySnapshot {
    type Item = Arc<MempoolEntry>;
    type IntoIter = std::vec::IntoIter<Arc<MempoolEntry>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a EntrySnapshot {
    type Item = &'a Arc<MempoolEntry>;
    type IntoIter = std::slice::Iter<'a, Arc<MempoolEntry>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Mempool statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolStats {
    /// Current number of entries.
    pub size: usize,
    /// Maximum capacity.
    pub capacity: usize,
    /// Entries per kind.
    pub by_kind: BTreeMap<EntryKind, usize>,
    /// Sidechains in the registry.
    pub sidechains: usize,
    /// Rejected submissions awaiting reconsideration.
    pub rejected_cached: usize,
    /// Tip the pool is consistent with.
    pub tip: Option<ChainTip>,
    /// Whether mutations are refused.
    pub halted: bool,
    /// Submissions received.
    pub total_submitted: u64,
    /// Submissions admitted.
    pub total_admitted: u64,
    /// Submissions rejected.
    pub total_rejected: u64,
    /// Entries evicted by tip changes and supersession.
    pub total_evicted: u64,
}
