//! Collaborator interfaces consumed by the mempool.
//!
//! The mempool never reads chain storage, verifies proofs or talks to
//! peers itself. The embedding node supplies these services:
//!
//! - [`ChainSnapshotProvider`] - confirmed sidechain state at a tip
//! - [`ProofOracle`] - attestation of certificate validity tokens
//! - [`RelaySink`] - receiver of eviction reports for peer relay

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sidepool_core::{
    Amount, Certificate, ChainTip, EpochNumber, EpochSchedule, Height, Quality, Result,
    SidechainFees, SidechainId,
};

use crate::eviction::EvictionReport;

/// The highest-quality certificate confirmed for a sidechain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmedCertificate {
    /// Certified epoch.
    pub epoch: EpochNumber,
    /// Quality of the confirmed certificate.
    pub quality: Quality,
    /// Backward transfers already deducted from the balance.
    pub backward_transfer_total: Amount,
}

/// Confirmed state of one sidechain at a tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedSidechain {
    /// Sidechain id.
    pub id: SidechainId,
    /// Creation height and epoch length.
    pub schedule: EpochSchedule,
    /// First height at which the sidechain counts as ceased.
    pub ceasing_height: Height,
    /// Mature balance.
    pub balance: Amount,
    /// Amounts that mature at the given height.
    pub immature_amounts: BTreeMap<Height, Amount>,
    /// Last confirmed certificate, if any.
    pub last_certificate: Option<ConfirmedCertificate>,
    /// Fees set by the last confirmed certificate.
    pub fees: SidechainFees,
    /// Field elements per backward-transfer request; 0 disables requests.
    pub request_data_length: usize,
}

/// Confirmed state of every sidechain at one tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedSnapshot {
    /// Tip the snapshot describes.
    pub tip: ChainTip,
    /// All sidechains that exist at the tip.
    pub sidechains: Vec<ConfirmedSidechain>,
}

/// Supplies confirmed sidechain state.
pub trait ChainSnapshotProvider: Send + Sync {
    /// Confirmed state at `tip`.
    fn snapshot(&self, tip: &ChainTip) -> Result<ConfirmedSnapshot>;
}

/// Attests certificate validity tokens issued by the proof layer.
pub trait ProofOracle: Send + Sync {
    /// `Err` carries the reason the token was not accepted.
    fn attest(&self, certificate: &Certificate) -> std::result::Result<(), String>;
}

/// Receives eviction reports for relay to peers.
pub trait RelaySink: Send + Sync {
    /// Publish a report. A failure aborts the transition that produced it.
    fn publish(&self, report: &EvictionReport) -> Result<()>;
}

/// Relay sink for nodes that do not relay evictions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRelay;

impl RelaySink for NullRelay {
    fn publish(&self, _report: &EvictionReport) -> Result<()> {
        Ok(())
    }
}
