//! Append-only, hash-chained record of admitted mutations.
//!
//! ```text
//! entry_hash(n) = blake3(sequence || mutation_hash || timestamp || prior_hash)
//! entry[n].prior_hash == entry_hash(n - 1)      entry[1].prior_hash == GENESIS_HASH
//! ```
//!
//! The outcome of an entry (`pending` → `applied` | `failed`) is an annotation outside
//! the hashed fields, so resolving an entry never rewrites the chain. Refused
//! mutations go to a separate rejection journal and never move the tip.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use super::proof::GENESIS_HASH;
use crate::db;
use crate::error::{Result, VectorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Applied,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub mutation_hash: String,
    pub timestamp: String,
    pub prior_hash: String,
    pub outcome: Outcome,
    /// Backend error text for `Failed` entries.
    pub failure: Option<String>,
    pub resolved_at: Option<String>,
}

impl LogEntry {
    pub fn entry_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.sequence.to_le_bytes());
        hasher.update(self.mutation_hash.as_bytes());
        hasher.update(b"|");
        hasher.update(self.timestamp.as_bytes());
        hasher.update(b"|");
        hasher.update(self.prior_hash.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub mutation_hash: String,
    pub proof_hash: String,
    pub reason: String,
    pub timestamp: String,
}

/// In-memory chain, optionally mirrored to the `attestation_*` tables of a journal
/// database.
#[derive(Debug, Default)]
pub struct AttestationLog {
    entries: Vec<LogEntry>,
    rejections: Vec<Rejection>,
    journal: Option<Mutex<Connection>>,
}

impl AttestationLog {
    /// A log that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) the journal at `path`, load it, and verify the chain.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = db::open_database(path)?;
        let entries = load_entries(&conn)?;
        let rejections = load_rejections(&conn)?;
        let log = Self {
            entries,
            rejections,
            journal: Some(Mutex::new(conn)),
        };
        log.verify_chain()?;
        tracing::info!(
            path = %path.display(),
            entries = log.entries.len(),
            rejections = log.rejections.len(),
            "attestation journal loaded"
        );
        Ok(log)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Hash of the newest entry, or [`GENESIS_HASH`] for an empty log.
    pub fn tip(&self) -> String {
        self.entries
            .last()
            .map(LogEntry::entry_hash)
            .unwrap_or_else(|| GENESIS_HASH.to_string())
    }

    /// Chain a `pending` entry for `mutation_hash`. Nothing is appended if the
    /// journal write fails.
    pub fn append(&mut self, mutation_hash: &str) -> Result<u64> {
        let entry = LogEntry {
            sequence: self.entries.last().map_or(1, |e| e.sequence + 1),
            mutation_hash: mutation_hash.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            prior_hash: self.tip(),
            outcome: Outcome::Pending,
            failure: None,
            resolved_at: None,
        };
        self.with_journal(|conn| {
            conn.execute(
                "INSERT INTO attestation_log
                 (sequence, mutation_hash, timestamp, prior_hash, entry_hash, outcome)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.sequence as i64,
                    entry.mutation_hash,
                    entry.timestamp,
                    entry.prior_hash,
                    entry.entry_hash(),
                    entry.outcome.as_str(),
                ],
            )?;
            Ok(())
        })?;
        let sequence = entry.sequence;
        self.entries.push(entry);
        Ok(sequence)
    }

    /// Record the backend outcome for a pending entry.
    pub fn resolve(&mut self, sequence: u64, result: std::result::Result<(), String>) -> Result<()> {
        let (outcome, failure) = match result {
            Ok(()) => (Outcome::Applied, None),
            Err(reason) => (Outcome::Failed, Some(reason)),
        };
        let resolved_at = chrono::Utc::now().to_rfc3339();
        self.with_journal(|conn| {
            conn.execute(
                "UPDATE attestation_log SET outcome = ?1, failure = ?2, resolved_at = ?3
                 WHERE sequence = ?4",
                params![outcome.as_str(), failure, resolved_at, sequence as i64],
            )?;
            Ok(())
        })?;
        let entry = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.sequence == sequence)
            .ok_or_else(|| VectorError::InvalidInput(format!("no log entry {sequence}")))?;
        entry.outcome = outcome;
        entry.failure = failure;
        entry.resolved_at = Some(resolved_at);
        Ok(())
    }

    pub fn record_rejection(&mut self, rejection: Rejection) -> Result<()> {
        self.with_journal(|conn| {
            conn.execute(
                "INSERT INTO attestation_rejections (mutation_hash, proof_hash, reason, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    rejection.mutation_hash,
                    rejection.proof_hash,
                    rejection.reason,
                    rejection.timestamp,
                ],
            )?;
            Ok(())
        })?;
        self.rejections.push(rejection);
        Ok(())
    }

    /// Walk the chain from genesis. Fails at the first entry whose sequence or
    /// prior hash does not follow from its predecessor.
    pub fn verify_chain(&self) -> Result<()> {
        verify_entries(&self.entries)
    }

    fn with_journal(&self, f: impl FnOnce(&Connection) -> Result<()>) -> Result<()> {
        match &self.journal {
            Some(conn) => {
                let conn = conn
                    .lock()
                    .map_err(|_| VectorError::LockPoisoned("attestation journal"))?;
                f(&conn)
            }
            None => Ok(()),
        }
    }
}

pub fn verify_entries(entries: &[LogEntry]) -> Result<()> {
    let mut expected_prior = GENESIS_HASH.to_string();
    for (i, entry) in entries.iter().enumerate() {
        if entry.sequence != i as u64 + 1 || entry.prior_hash != expected_prior {
            return Err(VectorError::ChainBroken {
                sequence: entry.sequence,
            });
        }
        expected_prior = entry.entry_hash();
    }
    Ok(())
}

fn load_entries(conn: &Connection) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT sequence, mutation_hash, timestamp, prior_hash, entry_hash, outcome, failure, resolved_at
         FROM attestation_log ORDER BY sequence",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut entries = Vec::with_capacity(rows.len());
    for (sequence, mutation_hash, timestamp, prior_hash, stored_hash, outcome, failure, resolved_at) in rows {
        let entry = LogEntry {
            sequence: sequence as u64,
            mutation_hash,
            timestamp,
            prior_hash,
            outcome: outcome.parse().map_err(VectorError::InvalidInput)?,
            failure,
            resolved_at,
        };
        // The stored hash must match what the fields hash to.
        if entry.entry_hash() != stored_hash {
            return Err(VectorError::ChainBroken {
                sequence: entry.sequence,
            });
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn load_rejections(conn: &Connection) -> Result<Vec<Rejection>> {
    let mut stmt = conn.prepare(
        "SELECT mutation_hash, proof_hash, reason, timestamp FROM attestation_rejections ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Rejection {
                mutation_hash: row.get(0)?,
                proof_hash: row.get(1)?,
                reason: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
