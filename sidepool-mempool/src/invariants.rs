//! Pool invariants checked after every tip change.
//!
//! A violation means the eviction engine and the index disagree about the
//! state of the pool. The coordinator refuses to commit such a transition
//! and the pool halts until reconciled.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sidepool_core::{EntryKind, Height};
use thiserror::Error;

use crate::index::MempoolIndex;
use crate::registry::SidechainRegistry;

/// Read-only view of pool state.
#[derive(Debug, Clone, Copy)]
pub struct PoolView<'a> {
    /// Registry at the tip being checked.
    pub registry: &'a SidechainRegistry,
    /// Pool contents.
    pub index: &'a MempoolIndex,
}

impl<'a> PoolView<'a> {
    /// Create a view.
    pub fn new(registry: &'a SidechainRegistry, index: &'a MempoolIndex) -> Self {
        Self { registry, index }
    }

    /// Height of the view.
    pub fn height(&self) -> Height {
        self.registry.height().unwrap_or(0)
    }
}

/// An invariant that must hold for the pool.
pub trait Invariant: Send + Sync {
    /// Name of this invariant.
    fn name(&self) -> &str;

    /// Check a single state.
    fn check(&self, view: &PoolView<'_>) -> Result<(), InvariantViolation>;

    /// Check a transition between two states.
    fn check_transition(&self, _old: &PoolView<'_>, _new: &PoolView<'_>) -> Result<(), InvariantViolation> {
        Ok(())
    }
}

/// Violation of an invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("invariant '{name}' violated: {message}")]
pub struct InvariantViolation {
    /// Invariant name.
    pub name: String,
    /// Violation message.
    pub message: String,
    /// Height at violation (if available).
    pub state_height: Option<Height>,
}

impl InvariantViolation {
    /// Create a new violation.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            state_height: None,
        }
    }

    /// Add height context.
    pub fn at_height(mut self, height: Height) -> Self {
        self.state_height = Some(height);
        self
    }
}

impl From<InvariantViolation> for sidepool_core::Error {
    fn from(violation: InvariantViolation) -> Self {
        sidepool_core::Error::invariant(
            violation.name,
            violation.message,
            violation.state_height.unwrap_or(0),
        )
    }
}

/// No certificate or request targets an epoch past its safeguard.
#[derive(Debug, Clone, Copy)]
pub struct NoClosedEpochEntries;

impl Invariant for NoClosedEpochEntries {
    fn name(&self) -> &str {
        "no_closed_epoch_entries"
    }

    fn check(&self, view: &PoolView<'_>) -> Result<(), InvariantViolation> {
        let height = view.height();
        for entry in view.index.iter() {
            let Some(epoch) = entry.epoch() else { continue };
            let Ok(state) = view.registry.get(&entry.sidechain_id()) else {
                continue;
            };
            if state.schedule.is_closed(epoch, height) {
                return Err(InvariantViolation::new(
                    self.name(),
                    format!(
                        "{} {} targets epoch {} of {}, closed at {}",
                        entry.kind(),
                        entry.id(),
                        epoch,
                        state.id,
                        state.schedule.safeguard_height(epoch)
                    ),
                )
                .at_height(height));
            }
        }
        Ok(())
    }
}

/// At most one certificate per (sidechain, epoch).
#[derive(Debug, Clone, Copy)]
pub struct SingleCertificatePerEpoch;

impl Invariant for SingleCertificatePerEpoch {
    fn name(&self) -> &str {
        "single_certificate_per_epoch"
    }

    fn check(&self, view: &PoolView<'_>) -> Result<(), InvariantViolation> {
        let mut seen = BTreeSet::new();
        for entry in view.index.iter() {
            let Some(cert) = entry.certificate() else { continue };
            if !seen.insert((cert.sidechain_id, cert.epoch)) {
                return Err(InvariantViolation::new(
                    self.name(),
                    format!(
                        "more than one certificate for epoch {} of {}",
                        cert.epoch, cert.sidechain_id
                    ),
                )
                .at_height(view.height()));
            }
        }
        Ok(())
    }
}

/// Every entry belongs to a sidechain that exists and is alive.
#[derive(Debug, Clone, Copy)]
pub struct NoDeadSidechainEntries;

impl Invariant for NoDeadSidechainEntries {
    fn name(&self) -> &str {
        "no_dead_sidechain_entries"
    }

    fn check(&self, view: &PoolView<'_>) -> Result<(), InvariantViolation> {
        for sidechain in view.index.sidechains() {
            let alive = view
                .registry
                .get(sidechain)
                .map(|state| state.is_alive())
                .unwrap_or(false);
            if !alive {
                return Err(InvariantViolation::new(
                    self.name(),
                    format!("entries held for missing or ceased sidechain {}", sidechain),
                )
                .at_height(view.height()));
            }
        }
        Ok(())
    }
}

/// Secondary indices agree with the primary map.
#[derive(Debug, Clone, Copy)]
pub struct IndexConsistency;

impl Invariant for IndexConsistency {
    fn name(&self) -> &str {
        "index_consistency"
    }

    fn check(&self, view: &PoolView<'_>) -> Result<(), InvariantViolation> {
        view.index
            .verify_indices()
            .map_err(|message| InvariantViolation::new(self.name(), message).at_height(view.height()))
    }
}

/// Forward transfers leave only with their sidechain or an evicted parent.
#[derive(Debug, Clone, Copy)]
pub struct ForwardTransferRetention;

impl Invariant for ForwardTransferRetention {
    fn name(&self) -> &str {
        "forward_transfer_retention"
    }

    fn check(&self, _view: &PoolView<'_>) -> Result<(), InvariantViolation> {
        Ok(())
    }

    fn check_transition(&self, old: &PoolView<'_>, new: &PoolView<'_>) -> Result<(), InvariantViolation> {
        for entry in old.index.iter() {
            if entry.kind() != EntryKind::ForwardTransfer || new.index.contains(&entry.id()) {
                continue;
            }
            let alive = new
                .registry
                .get(&entry.sidechain_id())
                .map(|state| state.is_alive())
                .unwrap_or(false);
            let parent_evicted = entry
                .depends_on()
                .iter()
                .any(|parent| old.index.contains(parent) && !new.index.contains(parent));
            if alive && !parent_evicted {
                return Err(InvariantViolation::new(
                    self.name(),
                    format!(
                        "forward transfer {} removed while {} is alive",
                        entry.id(),
                        entry.sidechain_id()
                    ),
                )
                .at_height(new.height()));
            }
        }
        Ok(())
    }
}

/// Runs a set of invariants.
pub struct InvariantChecker {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantChecker {
    /// A checker with no invariants.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Every pool invariant.
    pub fn standard() -> Self {
        Self::new()
            .with(IndexConsistency)
            .with(NoDeadSidechainEntries)
            .with(NoClosedEpochEntries)
            .with(SingleCertificatePerEpoch)
            .with(ForwardTransferRetention)
    }

    /// Add an invariant.
    pub fn with(mut self, invariant: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(invariant));
        self
    }

    /// Names of the registered invariants.
    pub fn names(&self) -> Vec<&str> {
        self.invariants.iter().map(|i| i.name()).collect()
    }

    /// Check a single state; stops at the first violation.
    pub fn check_all(&self, view: &PoolView<'_>) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            invariant.check(view)?;
        }
        Ok(())
    }

    /// Check a transition, including the new state itself.
    pub fn check_transition(&self, old: &PoolView<'_>, new: &PoolView<'_>) -> Result<(), InvariantViolation> {
        self.check_all(new)?;
        for invariant in &self.invariants {
            invariant.check_transition(old, new)?;
        }
        Ok(())
    }
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for InvariantChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvariantChecker")
            .field("invariants", &self.names())
            .finish()
    }
}
