//! Mutation proofs: a keyed BLAKE3 tag over the mutation and the log tip it was
//! derived against.
//!
//! ```text
//! tag = blake3::keyed_hash(key, prior_hash || mutation_hash)
//! ```
//!
//! A proof is only valid while `prior_hash` is still the log tip, so a proof cannot
//! be replayed after any other mutation has been admitted.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{InitializationError, Result};

/// Prior hash of the first log entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// 32-byte secret shared by whoever signs mutations and the guard that checks them.
#[derive(Clone, PartialEq, Eq)]
pub struct ProofKey([u8; 32]);

impl ProofKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim()).map_err(|e| {
            InitializationError::InvalidConfiguration(format!("guard key is not hex: {e}"))
        })?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            InitializationError::InvalidConfiguration(format!(
                "guard key must be 32 bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for ProofKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProofKey(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationProof {
    /// Log tip the proof was derived against.
    pub prior_hash: String,
    /// Hex-encoded keyed hash.
    pub tag: String,
}

impl MutationProof {
    /// Fingerprint used to refer to this proof in errors and the rejection journal.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.prior_hash.as_bytes());
        hasher.update(b"|");
        hasher.update(self.tag.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ProofSigner {
    key: ProofKey,
}

impl ProofSigner {
    pub fn new(key: ProofKey) -> Self {
        Self { key }
    }

    fn tag(&self, mutation_hash: &str, prior_hash: &str) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(&self.key.0);
        hasher.update(prior_hash.as_bytes());
        hasher.update(mutation_hash.as_bytes());
        hasher.finalize()
    }

    pub fn sign(&self, mutation_hash: &str, tip: &str) -> MutationProof {
        MutationProof {
            prior_hash: tip.to_string(),
            tag: self.tag(mutation_hash, tip).to_hex().to_string(),
        }
    }

    /// `Err(reason)` when the proof is stale or does not match the mutation.
    pub fn verify(
        &self,
        mutation_hash: &str,
        proof: &MutationProof,
        tip: &str,
    ) -> std::result::Result<(), String> {
        if proof.prior_hash != tip {
            return Err(format!(
                "stale proof: derived against {}, log tip is {}",
                short(&proof.prior_hash),
                short(tip)
            ));
        }
        let given = blake3::Hash::from_hex(&proof.tag).map_err(|_| "malformed proof tag".to_string())?;
        // blake3::Hash equality is constant-time
        if given != self.tag(mutation_hash, tip) {
            return Err("proof does not match mutation".into());
        }
        Ok(())
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
