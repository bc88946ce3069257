//! Proof-gated mutation admission.
//!
//! Every write goes through [`MutationGuard::apply`]:
//!
//! ```text
//! Idle → ProofPending → Verified → Applied      proof matches the log tip
//! Idle → ProofPending → Rejected                 stale or forged proof; backend untouched
//! ```
//!
//! One mutation is in flight at a time. A second caller arriving while the slot is
//! taken gets [`VectorError::MutationInProgress`] immediately instead of waiting, so
//! two proof windows never overlap and a caller always knows its proof was checked
//! against the tip it saw.
//!
//! Reads never pass through the guard.

pub mod attestation;
pub mod proof;

pub use attestation::{AttestationLog, LogEntry, Outcome, Rejection};
pub use proof::{MutationProof, ProofKey, ProofSigner, GENESIS_HASH};

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError, RwLock, TryLockError};
use tracing::{debug, warn};

use crate::error::{Result, VectorError};
use crate::types::VectorRecord;

/// A write request, hashed canonically for proofs and the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Insert(VectorRecord),
    InsertBatch(Vec<VectorRecord>),
    Remove(String),
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::InsertBatch(_) => "insert_batch",
            Self::Remove(_) => "remove",
        }
    }

    /// BLAKE3 over a length-prefixed encoding of the mutation. Metadata keys are
    /// hashed in sorted order, so equal mutations always hash equal.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind().as_bytes());
        match self {
            Self::Insert(record) => hash_record(&mut hasher, record),
            Self::InsertBatch(records) => {
                hasher.update(&(records.len() as u64).to_le_bytes());
                for record in records {
                    hash_record(&mut hasher, record);
                }
            }
            Self::Remove(id) => hash_str(&mut hasher, id),
        }
        hasher.finalize().to_hex().to_string()
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_record(hasher: &mut blake3::Hasher, record: &VectorRecord) {
    hash_str(hasher, &record.id);
    hasher.update(&(record.embedding.len() as u64).to_le_bytes());
    for x in &record.embedding {
        hasher.update(&x.to_le_bytes());
    }
    match &record.metadata {
        Some(meta) => {
            let sorted: std::collections::BTreeMap<_, _> = meta.iter().collect();
            hash_str(hasher, &serde_json::to_string(&sorted).unwrap_or_default());
        }
        None => {
            hasher.update(&[0u8]);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    Idle,
    ProofPending,
    Verified,
    Applied,
    Rejected,
}

#[derive(Debug)]
pub struct MutationGuard {
    signer: ProofSigner,
    log: RwLock<AttestationLog>,
    in_flight: Mutex<()>,
    state: Mutex<GuardState>,
}

impl MutationGuard {
    pub fn new(key: ProofKey, log: AttestationLog) -> Self {
        Self {
            signer: ProofSigner::new(key),
            log: RwLock::new(log),
            in_flight: Mutex::new(()),
            state: Mutex::new(GuardState::Idle),
        }
    }

    pub fn state(&self) -> GuardState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: GuardState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = ?*state, to = ?next, "guard state");
        *state = next;
    }

    pub fn tip(&self) -> Result<String> {
        Ok(self.read_log()?.tip())
    }

    /// Proof for `mutation` against the current tip.
    pub fn prove(&self, mutation: &Mutation) -> Result<MutationProof> {
        let tip = self.tip()?;
        Ok(self.signer.sign(&mutation.hash(), &tip))
    }

    pub fn read_log(&self) -> Result<std::sync::RwLockReadGuard<'_, AttestationLog>> {
        self.log
            .read()
            .map_err(|_| VectorError::LockPoisoned("attestation log"))
    }

    fn write_log(&self) -> Result<std::sync::RwLockWriteGuard<'_, AttestationLog>> {
        self.log
            .write()
            .map_err(|_| VectorError::LockPoisoned("attestation log"))
    }

    /// Verify `proof`, chain a log entry, run `apply`, and record its outcome.
    ///
    /// `apply` is never called when the proof fails. Its error, if any, is returned
    /// after the entry has been marked failed.
    pub fn apply<T>(
        &self,
        mutation: &Mutation,
        proof: &MutationProof,
        apply: impl FnOnce(&Mutation) -> Result<T>,
    ) -> Result<T> {
        let _slot = match self.in_flight.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::WouldBlock) => return Err(VectorError::MutationInProgress),
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };
        self.set_state(GuardState::ProofPending);
        let result = self.admit(mutation, proof, apply);
        self.set_state(GuardState::Idle);
        result
    }

    fn admit<T>(
        &self,
        mutation: &Mutation,
        proof: &MutationProof,
        apply: impl FnOnce(&Mutation) -> Result<T>,
    ) -> Result<T> {
        let mutation_hash = mutation.hash();
        let tip = self.tip()?;
        if let Err(reason) = self.signer.verify(&mutation_hash, proof, &tip) {
            let proof_hash = proof.hash();
            self.set_state(GuardState::Rejected);
            warn!(kind = mutation.kind(), %reason, proof = %proof_hash, "mutation rejected");
            let rejection = Rejection {
                mutation_hash,
                proof_hash: proof_hash.clone(),
                reason: reason.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            if let Err(e) = self.write_log()?.record_rejection(rejection) {
                warn!(error = %e, "could not journal rejection");
            }
            return Err(VectorError::MutationRejected { reason, proof_hash });
        }

        self.set_state(GuardState::Verified);
        let sequence = self.write_log()?.append(&mutation_hash)?;

        let result = apply(mutation);
        let outcome = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        if let Err(e) = self.write_log()?.resolve(sequence, outcome) {
            warn!(error = %e, sequence, "could not journal mutation outcome");
        }
        match &result {
            Ok(_) => {
                self.set_state(GuardState::Applied);
                debug!(kind = mutation.kind(), sequence, "mutation applied");
            }
            Err(e) => warn!(kind = mutation.kind(), sequence, error = %e, "admitted mutation failed"),
        }
        result
    }
}
