//! Sidechain-aware mempool.
//!
//! This crate keeps pending sidechain artifacts consistent with the
//! confirmed chain:
//! - Sidechain registry (confirmed state derived per tip)
//! - Certificate quality selection (one active certificate per epoch)
//! - Mempool index (lookups by sidechain, epoch and dependency)
//! - Eviction policy (safeguard crossing, supersession, cascades)
//! - Reorg coordination (atomic, idempotent tip transitions)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SidechainMempool                       │
//! │  (Submissions, queries, halt/reconcile, one RwLock)     │
//! └─────────────────────────────────────────────────────────┘
//!               │ submit                  │ tip change
//!               ▼                         ▼
//! ┌──────────────────────────┐ ┌───────────────────────────┐
//! │        admission         │ │     ReorgCoordinator      │
//! │ (stateless, chain, pool) │ │ (snapshot, commit, relay) │
//! └──────────────────────────┘ └───────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                EvictionPolicyEngine                     │
//! │  (Pure decisions using CertificateQualitySelector)      │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          SidechainRegistry   +   MempoolIndex           │
//! │  (Confirmed sidechain state)     (Pending entries)      │
//! └─────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod admission;
pub mod config;
pub mod coordinator;
pub mod eviction;
pub mod index;
pub mod invariants;
pub mod listener;
pub mod pool;
pub mod provider;
pub mod quality;
pub mod registry;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(test)]
mod proptest;

pub use admission::RejectedCache;
pub use config::MempoolConfig;
pub use coordinator::{PoolState, ReorgCoordinator};
pub use eviction::{EvictionPlan, EvictionPolicyEngine, EvictionReason, EvictionReport, Readmission};
pub use index::MempoolIndex;
pub use invariants::{Invariant, InvariantChecker, InvariantViolation, PoolView};
pub use listener::TipListener;
pub use pool::{EntrySnapshot, MempoolStats, SidechainMempool};
pub use provider::{
    ChainSnapshotProvider, ConfirmedCertificate, ConfirmedSidechain, ConfirmedSnapshot,
    NullRelay, ProofOracle, RelaySink,
};
pub use quality::{CertificateQualitySelector, CertificateRank};
pub use registry::{RegistryDelta, SidechainRegistry, SidechainState};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockChain, MockOracle, MockSidechainParams, RecordingSink};
