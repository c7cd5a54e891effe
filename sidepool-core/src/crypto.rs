//! Content hashing for sidepool.
//!
//! All identifiers in the mempool are BLAKE3 digests over canonical
//! (bincode) bytes, so two submissions of the same artifact always map to
//! the same identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 32-byte hash value.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The zero hash (used as a sentinel).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a hash from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash arbitrary data with BLAKE3.
pub fn hash(data: &[u8]) -> Hash {
    Hash(*blake3::hash(data).as_bytes())
}

/// Hash multiple items as one concatenated message.
pub fn hash_all<T: AsRef<[u8]>>(items: &[T]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for item in items {
        hasher.update(item.as_ref());
    }
    Hash(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"sidechain"), hash(b"sidechain"));
        assert_ne!(hash(b"sidechain"), hash(b"mainchain"));
    }

    #[test]
    fn test_hash_all_matches_concatenation() {
        assert_eq!(hash_all(&[b"side".as_slice(), b"chain"]), hash(b"sidechain"));
    }

    #[test]
    fn test_display_is_full_hex() {
        let h = hash(b"epoch");
        assert_eq!(h.to_string().len(), 64);
        assert_eq!(h.to_string(), h.to_hex());
    }

    #[test]
    fn test_debug_is_truncated() {
        let dbg = format!("{:?}", Hash::ZERO);
        assert_eq!(dbg, "Hash(0000000000000000)");
    }
}
