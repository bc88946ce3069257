//! SQL DDL for agentdb tables.
//!
//! Defines `index_header`, `index_nodes` (portable index snapshot),
//! `attestation_log`, `attestation_rejections` (mutation audit journal), and
//! `schema_meta`. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// Version 1 layout. Later changes go through [`super::migrations`].
const SCHEMA_SQL: &str = r#"
-- Graph-wide state of a saved portable index (single row)
CREATE TABLE IF NOT EXISTS index_header (
    id INTEGER PRIMARY KEY CHECK(id = 1),
    config TEXT NOT NULL,
    entry_point INTEGER,
    max_level INTEGER NOT NULL,
    saved_at TEXT NOT NULL
);

-- One row per live graph node
CREATE TABLE IF NOT EXISTS index_nodes (
    slot INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    embedding BLOB NOT NULL,
    links TEXT NOT NULL
);

-- Hash-chained log of admitted mutations
CREATE TABLE IF NOT EXISTS attestation_log (
    sequence INTEGER PRIMARY KEY,
    mutation_hash TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    prior_hash TEXT NOT NULL,
    entry_hash TEXT NOT NULL,
    outcome TEXT NOT NULL CHECK(outcome IN ('pending','applied','failed')),
    failure TEXT
);

-- Mutations refused by the guard; never part of the chain
CREATE TABLE IF NOT EXISTS attestation_rejections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mutation_hash TEXT NOT NULL,
    proof_hash TEXT NOT NULL,
    reason TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
