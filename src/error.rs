//! Error taxonomy for the engine.
//!
//! Every fallible library operation returns [`Result`]. The binary and config loader
//! wrap these in `anyhow` with context, the library never does.

use thiserror::Error;

/// Why a backend could not be brought up.
///
/// The two cases are distinct so callers can decide whether retrying with the portable
/// backend makes sense (`MissingCapability`) or the configuration must be fixed first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitializationError {
    #[error("native backend unavailable: {0}")]
    MissingCapability(String),

    #[error("invalid backend configuration: {0}")]
    InvalidConfiguration(String),
}

#[derive(Error, Debug)]
pub enum VectorError {
    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error("dimension mismatch{}: expected {expected}, got {actual}", id_suffix(.id))]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        id: Option<String>,
    },

    #[error("backend not initialized")]
    NotInitialized,

    #[error("quantizer not trained")]
    QuantizerUntrained,

    #[error("insufficient training data: need at least {required} vectors, got {actual}")]
    InsufficientTrainingData { required: usize, actual: usize },

    #[error("quantizer training cancelled")]
    TrainingCancelled,

    #[error("mutation rejected ({reason}), proof {proof_hash}")]
    MutationRejected { reason: String, proof_hash: String },

    #[error("another mutation is in progress")]
    MutationInProgress,

    #[error("capacity exhausted: index holds at most {capacity} vectors")]
    CapacityExhausted { capacity: usize },

    #[error("attestation chain broken at sequence {sequence}")]
    ChainBroken { sequence: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("attention failed: {0}")]
    Attention(String),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),
}

impl VectorError {
    pub(crate) fn dimension(expected: usize, actual: usize, id: Option<&str>) -> Self {
        Self::DimensionMismatch {
            expected,
            actual,
            id: id.map(str::to_string),
        }
    }

    /// `true` when the guard refused the mutation before it reached the backend.
    pub fn is_not_admitted(&self) -> bool {
        matches!(self, Self::MutationRejected { .. } | Self::MutationInProgress)
    }
}

pub type Result<T> = std::result::Result<T, VectorError>;

fn id_suffix(id: &Option<String>) -> String {
    id.as_deref()
        .map(|i| format!(" for id {i}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_message_names_the_id() {
        let err = VectorError::dimension(128, 3, Some("doc-7"));
        assert_eq!(
            err.to_string(),
            "dimension mismatch for id doc-7: expected 128, got 3"
        );
        let err = VectorError::dimension(4, 3, None);
        assert_eq!(err.to_string(), "dimension mismatch: expected 4, got 3");
    }

    #[test]
    fn initialization_errors_are_distinguishable() {
        let err: VectorError = InitializationError::MissingCapability("no simd".into()).into();
        assert!(matches!(
            err,
            VectorError::Initialization(InitializationError::MissingCapability(_))
        ));
    }
}
