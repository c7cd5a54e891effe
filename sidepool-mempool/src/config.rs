//! Mempool configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the sidechain mempool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum number of entries in the pool.
    pub max_entries: usize,
    /// Maximum number of rejected submissions remembered for reconsideration.
    pub rejected_cache_size: usize,
    /// Re-admit remembered submissions once the confirmed state allows them.
    pub readmit_rejected: bool,
    /// Run consistency checks after every tip change.
    pub verify_invariants: bool,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_entries: 50_000,
            rejected_cache_size: 1_000,
            readmit_rejected: true,
            verify_invariants: true,
        }
    }
}

impl MempoolConfig {
    /// Configuration for tests: small pool, everything checked.
    pub fn for_testing() -> Self {
        Self {
            max_entries: 1_000,
            rejected_cache_size: 100,
            readmit_rejected: true,
            verify_invariants: true,
        }
    }
}
