//! Sidepool Core - Fundamental types for the sidechain-aware mempool.
//!
//! This crate provides the data structures shared by every sidepool
//! component:
//!
//! - [`crypto`] - Hashing (BLAKE3) and the 32-byte [`Hash`] type
//! - [`sidechain`] - Sidechain identity, status and epoch arithmetic
//! - [`chain`] - Chain tips and tip transitions
//! - [`entry`] - Mempool entries and the artifacts they carry
//! - [`error`] - Error taxonomy with stable numeric codes
//!
//! # Example
//!
//! ```rust
//! use sidepool_core::{
//!     hash, Certificate, EpochSchedule, MempoolEntry, SidechainId,
//! };
//!
//! let sidechain = SidechainId::new(hash(b"my-sidechain"));
//! let schedule = EpochSchedule::new(100, 10);
//!
//! // Epoch 3 spans heights 130..=139; its certificate window closes at 141.
//! assert_eq!(schedule.safeguard_height(3), 141);
//!
//! let cert = Certificate::builder(sidechain, 3).quality(10).build();
//! let entry = MempoolEntry::new(cert);
//! assert_eq!(entry.epoch(), Some(3));
//! ```

pub mod chain;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod sidechain;

#[cfg(test)]
mod proptest;

// Re-exports for convenience
pub use chain::{BlockHash, ChainTip, TipChange};
pub use crypto::{hash, hash_all, Hash};
pub use entry::{
    Artifact, BackwardTransfer, BackwardTransferRequest, Certificate, CertificateBuilder,
    EntryId, EntryKind, ForwardTransfer, MainchainAddress, MempoolEntry, MempoolEntryBuilder,
    ProofReference, SidechainAddress,
};
pub use error::{Error, ErrorCode, Result};
pub use sidechain::{
    Amount, EpochNumber, EpochSchedule, Height, Quality, SidechainFees, SidechainId,
    SidechainStatus, MIN_EPOCH_LENGTH,
};
