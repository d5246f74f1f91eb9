//! Stable digests of device state.
//!
//! Used to compare pool occupancy before and after an operation: a rejected
//! or rolled-back call must leave the digest unchanged.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    Hash256(blake3::hash(bytes).into())
}

/// Hash any serde-serializable value deterministically (via JSON).
pub fn hash_serde<T: Serialize>(v: &T) -> crate::Result<Hash256> {
    let bytes =
        serde_json::to_vec(v).map_err(|e| crate::Error::Config(format!("digest encode: {e}")))?;
    Ok(hash_bytes(&bytes))
}

/// Incremental digest over labelled sections.
pub struct StateHasher {
    inner: Hasher,
}

impl Default for StateHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHasher {
    pub fn new() -> Self {
        Self {
            inner: Hasher::new(),
        }
    }

    /// Feed one labelled list of indices. Labels keep adjacent sections
    /// from aliasing each other.
    pub fn section(&mut self, label: &str, indices: &[u32]) -> &mut Self {
        self.inner.update(label.as_bytes());
        self.inner.update(&(indices.len() as u64).to_le_bytes());
        for i in indices {
            self.inner.update(&i.to_le_bytes());
        }
        self
    }

    pub fn finish(&self) -> Hash256 {
        Hash256(self.inner.finalize().into())
    }
}
