//! Chain tip types supplied by the block-processing layer.

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::sidechain::Height;

/// Hash of a mainchain block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub Hash);

impl BlockHash {
    /// Get the underlying hash.
    pub fn as_hash(&self) -> &Hash {
        &self.0
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The active chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainTip {
    /// Height of the tip block.
    pub height: Height,
    /// Hash of the tip block.
    pub hash: BlockHash,
}

impl ChainTip {
    /// Create a tip.
    pub fn new(height: Height, hash: BlockHash) -> Self {
        Self { height, hash }
    }
}

impl std::fmt::Display for ChainTip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.height, &self.hash.0.to_hex()[..16])
    }
}

/// A transition of the active tip, possibly across a reorg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipChange {
    /// Tip before the transition.
    pub old: ChainTip,
    /// Tip after the transition.
    pub new: ChainTip,
}

impl TipChange {
    /// Create a tip change.
    pub fn new(old: ChainTip, new: ChainTip) -> Self {
        Self { old, new }
    }

    /// Whether the tip moved to a lower height.
    pub fn is_rollback(&self) -> bool {
        self.new.height < self.old.height
    }
}
