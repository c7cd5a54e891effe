//! Error types for sidepool.
//!
//! Provides structured errors with:
//! - Unique error codes for API responses
//! - Client vs server error categorization
//! - A marker for rejections that depend only on confirmed chain state

use thiserror::Error;

use crate::entry::EntryId;
use crate::sidechain::{Amount, EpochNumber, Height, Quality, SidechainId};

/// Result type for sidepool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes for API responses.
///
/// Codes are structured as:
/// - 1xxx: Validation errors (client)
/// - 2xxx: Not found errors (client)
/// - 3xxx: Conflict errors (client)
/// - 4xxx: Chain state errors (client)
/// - 6xxx: Internal errors (server)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Validation errors (1xxx)
    InvalidAmount = 1002,
    InvalidRequestData = 1003,
    InvalidProofReference = 1004,
    InvalidSidechainParams = 1005,

    // Not found errors (2xxx)
    UnknownSidechain = 2001,

    // Conflict errors (3xxx)
    DuplicateEntry = 3001,
    QualityTooLow = 3002,

    // Chain state errors (4xxx)
    SidechainNotAlive = 4001,
    EpochAlreadyClosed = 4002,
    EpochNotReached = 4003,
    FeeTooLow = 4004,
    InsufficientBalance = 4005,
    PoolFull = 4006,

    // Internal errors (6xxx)
    SnapshotMismatch = 6001,
    Snapshot = 6002,
    Relay = 6003,
    InvariantViolation = 6004,
    Halted = 6005,
}

impl ErrorCode {
    /// Get the numeric code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Check if this is a client error (4xx equivalent).
    pub fn is_client_error(self) -> bool {
        (1000..5000).contains(&self.code())
    }

    /// Check if this is a server error (5xx equivalent).
    pub fn is_server_error(self) -> bool {
        self.code() >= 5000
    }

    /// Check if this error is retryable.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Snapshot | ErrorCode::Relay | ErrorCode::PoolFull
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

/// Errors that can occur in sidepool.
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Validation Errors (client errors)
    // ========================================================================
    /// Amount is zero or negative.
    #[error("invalid amount {amount}: must be positive")]
    InvalidAmount { amount: Amount },

    /// Backward-transfer request data does not match the sidechain's declared length.
    #[error("invalid request data for sidechain {sidechain}: expected {expected} field elements, got {got}")]
    InvalidRequestData {
        sidechain: SidechainId,
        expected: usize,
        got: usize,
    },

    /// The proof oracle did not attest the certificate's validity token.
    #[error("invalid proof reference for sidechain {sidechain} epoch {epoch}: {reason}")]
    InvalidProofReference {
        sidechain: SidechainId,
        epoch: EpochNumber,
        reason: String,
    },

    /// Confirmed state describes a sidechain with unusable parameters.
    #[error("invalid parameters for sidechain {sidechain}: {message}")]
    InvalidSidechainParams {
        sidechain: SidechainId,
        message: String,
    },

    // ========================================================================
    // Not Found Errors (client errors)
    // ========================================================================
    /// Sidechain id absent from the confirmed state.
    #[error("unknown sidechain {0}")]
    UnknownSidechain(SidechainId),

    // ========================================================================
    // Conflict Errors (client errors)
    // ========================================================================
    /// Entry already present in the mempool.
    #[error("duplicate entry {0}")]
    DuplicateEntry(EntryId),

    /// A certificate of equal or better rank already holds the epoch.
    ///
    /// `confirmed` is set when the rival is the certificate already on chain.
    #[error("certificate quality {quality} for sidechain {sidechain} epoch {epoch} does not beat {best}")]
    QualityTooLow {
        sidechain: SidechainId,
        epoch: EpochNumber,
        quality: Quality,
        best: Quality,
        confirmed: bool,
    },

    // ========================================================================
    // Chain State Errors (client errors)
    // ========================================================================
    /// The sidechain has ceased.
    #[error("sidechain {sidechain} is not alive (ceased at height {ceasing_height})")]
    SidechainNotAlive {
        sidechain: SidechainId,
        ceasing_height: Height,
    },

    /// The referenced epoch has crossed its safeguard height.
    #[error("epoch {epoch} of sidechain {sidechain} closed at safeguard height {safeguard_height} (chain height {height})")]
    EpochAlreadyClosed {
        sidechain: SidechainId,
        epoch: EpochNumber,
        safeguard_height: Height,
        height: Height,
    },

    /// The referenced epoch cannot be targeted yet at the current height.
    #[error("epoch {epoch} of sidechain {sidechain} not reached at chain height {height}")]
    EpochNotReached {
        sidechain: SidechainId,
        epoch: EpochNumber,
        height: Height,
    },

    /// Fee or amount below the sidechain's confirmed minimum.
    #[error("fee {fee} below sidechain {sidechain} minimum {minimum}")]
    FeeTooLow {
        sidechain: SidechainId,
        fee: Amount,
        minimum: Amount,
    },

    /// Backward transfers exceed the sidechain's mature balance.
    #[error("backward transfers of {requested} exceed sidechain {sidechain} balance {balance}")]
    InsufficientBalance {
        sidechain: SidechainId,
        requested: Amount,
        balance: Amount,
    },

    /// The mempool is at capacity.
    #[error("mempool full ({capacity} entries)")]
    PoolFull { capacity: usize },

    // ========================================================================
    // Internal Errors (server errors)
    // ========================================================================
    /// Confirmed snapshot does not describe the requested tip.
    #[error("snapshot height mismatch: expected {expected}, got {got}")]
    SnapshotMismatch { expected: Height, got: Height },

    /// The confirmed-state provider failed.
    #[error("snapshot provider error: {0}")]
    Snapshot(String),

    /// The relay sink failed to accept an eviction report.
    #[error("relay sink error: {0}")]
    Relay(String),

    /// An internal consistency check failed after a tip transition.
    #[error("invariant '{invariant}' violated at height {height}: {message}")]
    InvariantViolation {
        invariant: String,
        message: String,
        height: Height,
    },

    /// Mutation refused until the pool is reconciled.
    #[error("mempool halted: {0}")]
    Halted(String),
}

impl Error {
    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidAmount { .. } => ErrorCode::InvalidAmount,
            Error::InvalidRequestData { .. } => ErrorCode::InvalidRequestData,
            Error::InvalidProofReference { .. } => ErrorCode::InvalidProofReference,
            Error::InvalidSidechainParams { .. } => ErrorCode::InvalidSidechainParams,
            Error::UnknownSidechain(_) => ErrorCode::UnknownSidechain,
            Error::DuplicateEntry(_) => ErrorCode::DuplicateEntry,
            Error::QualityTooLow { .. } => ErrorCode::QualityTooLow,
            Error::SidechainNotAlive { .. } => ErrorCode::SidechainNotAlive,
            Error::EpochAlreadyClosed { .. } => ErrorCode::EpochAlreadyClosed,
            Error::EpochNotReached { .. } => ErrorCode::EpochNotReached,
            Error::FeeTooLow { .. } => ErrorCode::FeeTooLow,
            Error::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            Error::PoolFull { .. } => ErrorCode::PoolFull,
            Error::SnapshotMismatch { .. } => ErrorCode::SnapshotMismatch,
            Error::Snapshot(_) => ErrorCode::Snapshot,
            Error::Relay(_) => ErrorCode::Relay,
            Error::InvariantViolation { .. } => ErrorCode::InvariantViolation,
            Error::Halted(_) => ErrorCode::Halted,
        }
    }

    /// Check if this is a client error.
    pub fn is_client_error(&self) -> bool {
        self.code().is_client_error()
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        self.code().is_server_error()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Check if the rejection was decided by confirmed chain state alone.
    ///
    /// Such a submission may become admissible after a tip change, so the
    /// mempool remembers it for reconsideration. Unknown sidechains and
    /// closed epochs are final for the submission and never retried.
    pub fn is_state_dependent(&self) -> bool {
        matches!(
            self,
            Error::SidechainNotAlive { .. }
                | Error::EpochNotReached { .. }
                | Error::InsufficientBalance { .. }
                | Error::QualityTooLow {
                    confirmed: true,
                    ..
                }
        )
    }
}

// ============================================================================
// Convenience constructors
// ============================================================================

impl Error {
    /// Create a Snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Error::Snapshot(message.into())
    }

    /// Create a Relay error.
    pub fn relay(message: impl Into<String>) -> Self {
        Error::Relay(message.into())
    }

    /// Create an InvariantViolation error.
    pub fn invariant(invariant: impl Into<String>, message: impl Into<String>, height: Height) -> Self {
        Error::InvariantViolation {
            invariant: invariant.into(),
            message: message.into(),
            height,
        }
    }
}
