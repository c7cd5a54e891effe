//! Sidechain identity and epoch arithmetic.
//!
//! A sidechain created at height `c` with epoch length `L` partitions the
//! chain into epochs `[c + e*L, c + (e+1)*L - 1]`. After an epoch ends, a
//! certificate for it may be mined during a short submission window; the
//! last height of that window is the epoch's *safeguard height*.
//!
//! ```text
//!   epoch e                     epoch e+1
//! ├──────────────────────────┤├───────────────────────────┤
//! start(e)              end(e) end(e)+1 .. end(e)+W
//!                              └── certificate window ──┘
//!                                          safeguard(e) = end(e) + W
//! ```
//!
//! Once the chain height reaches `safeguard(e)` the next block can no
//! longer carry a certificate for `e`, so the epoch is closed for good.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::error::{Error, Result};

/// Chain height.
pub type Height = u64;

/// Epoch number, counted from the sidechain's creation height.
pub type EpochNumber = u32;

/// Certificate quality score. Higher wins.
pub type Quality = u64;

/// Coin amount in the smallest unit. Signed so that malformed input can be represented and rejected.
pub type Amount = i64;

/// Smallest accepted epoch length.
///
/// Below this the submission window would overlap the next epoch's window.
pub const MIN_EPOCH_LENGTH: u32 = 2;

/// Smallest certificate submission window, in blocks.
pub const MIN_SUBMISSION_WINDOW: u32 = 2;

/// Submission window is this fraction of the epoch length (when larger than the minimum).
pub const SUBMISSION_WINDOW_DIVISOR: u32 = 5;

/// Opaque sidechain identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SidechainId(pub Hash);

impl SidechainId {
    /// Wrap a hash.
    pub fn new(hash: Hash) -> Self {
        Self(hash)
    }

    /// Get the underlying hash.
    pub fn as_hash(&self) -> &Hash {
        &self.0
    }
}

impl fmt::Debug for SidechainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SidechainId({})", &self.0.to_hex()[..16])
    }
}

impl fmt::Display for SidechainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a sidechain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SidechainStatus {
    /// Certificates are arriving on schedule.
    Alive,
    /// An epoch went uncertified past its safeguard height.
    Ceased,
}

/// Minimum fees a sidechain charges, as set by its last confirmed certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SidechainFees {
    /// Forward transfer amounts must exceed this.
    pub forward_transfer: Amount,
    /// Backward-transfer requests must pay at least this.
    pub btr_request: Amount,
}

/// Epoch boundaries and safeguard heights for one sidechain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpochSchedule {
    creation_height: Height,
    epoch_length: u32,
}

impl EpochSchedule {
    /// Create a schedule. Call [`validate`](Self::validate) before relying on it.
    pub fn new(creation_height: Height, epoch_length: u32) -> Self {
        Self {
            creation_height,
            epoch_length,
        }
    }

    /// Reject schedules whose windows would overlap.
    pub fn validate(&self, sidechain: SidechainId) -> Result<()> {
        if self.epoch_length < MIN_EPOCH_LENGTH {
            return Err(Error::InvalidSidechainParams {
                sidechain,
                message: format!(
                    "epoch length {} below minimum {}",
                    self.epoch_length, MIN_EPOCH_LENGTH
                ),
            });
        }
        Ok(())
    }

    /// Height of the block that created the sidechain.
    pub fn creation_height(&self) -> Height {
        self.creation_height
    }

    /// Epoch length in blocks.
    pub fn epoch_length(&self) -> u32 {
        self.epoch_length
    }

    /// Number of blocks after an epoch's end that may carry its certificate.
    pub fn submission_window(&self) -> Height {
        Height::from((self.epoch_length / SUBMISSION_WINDOW_DIVISOR).max(MIN_SUBMISSION_WINDOW))
    }

    /// First height of `epoch`.
    pub fn start_height(&self, epoch: EpochNumber) -> Height {
        self.creation_height + Height::from(epoch) * Height::from(self.epoch_length)
    }

    /// Last height of `epoch`.
    pub fn end_height(&self, epoch: EpochNumber) -> Height {
        self.start_height(epoch) + Height::from(self.epoch_length) - 1
    }

    /// Last height that can still confirm a certificate for `epoch`.
    pub fn safeguard_height(&self, epoch: EpochNumber) -> Height {
        self.end_height(epoch) + self.submission_window()
    }

    /// Epoch containing `height`, or `None` before creation.
    pub fn epoch_at(&self, height: Height) -> Option<EpochNumber> {
        if height < self.creation_height {
            return None;
        }
        let epoch = (height - self.creation_height) / Height::from(self.epoch_length);
        EpochNumber::try_from(epoch).ok()
    }

    /// Epoch whose certificate the next block may carry, if any.
    ///
    /// With the minimum epoch length at most one window is open at a time.
    pub fn open_epoch(&self, height: Height) -> Option<EpochNumber> {
        let current = self.epoch_at(height)?;
        if height == self.end_height(current) {
            return Some(current);
        }
        let previous = current.checked_sub(1)?;
        (height < self.safeguard_height(previous)).then_some(previous)
    }

    /// Whether `epoch` has ended at `height`.
    pub fn has_ended(&self, epoch: EpochNumber, height: Height) -> bool {
        self.end_height(epoch) <= height
    }

    /// Whether `epoch` has crossed its safeguard at `height`.
    pub fn is_closed(&self, epoch: EpochNumber, height: Height) -> bool {
        self.safeguard_height(epoch) <= height
    }

    /// First height at which the sidechain is ceased, given its last certified epoch.
    pub fn ceasing_height(&self, last_certified: Option<EpochNumber>) -> Height {
        let pending = last_certified.map_or(0, |epoch| epoch + 1);
        self.safeguard_height(pending) + 1
    }
}
