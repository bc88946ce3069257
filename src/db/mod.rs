//! SQLite plumbing shared by the portable index file and the attestation journal.

pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;

use crate::error::{Result, VectorError};

/// Open (or create) a database at `path` with schema and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;

    // WAL keeps readers unblocked while a snapshot is being written
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    schema::init_schema(&conn)?;
    migrations::run_migrations(&conn)?;

    tracing::debug!(path = %path.display(), "database opened");
    Ok(conn)
}

/// In-memory database with schema and migrations applied.
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn)?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

/// Little-endian `f32` bytes.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(VectorError::InvalidInput(format!(
            "embedding blob of {} bytes is not a whole number of f32s",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Refresh query planner statistics after a bulk rewrite.
pub fn optimize_database(conn: &Connection) -> Result<()> {
    conn.execute_batch("ANALYZE; PRAGMA optimize;")?;
    Ok(())
}

/// Bytes in use, excluding free pages.
pub fn database_size(conn: &Connection) -> Result<u64> {
    let pragma = |name: &str| -> Result<i64> {
        Ok(conn.query_row(&format!("PRAGMA {name}"), [], |r| r.get(0))?)
    };
    let used = (pragma("page_count")? - pragma("freelist_count")?) * pragma("page_size")?;
    Ok(used.max(0) as u64)
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub schema_version: u32,
    pub node_count: usize,
    pub log_count: usize,
    pub rejection_count: usize,
    pub size_bytes: u64,
    pub integrity_ok: bool,
    pub integrity_details: String,
}

/// Row counts plus `PRAGMA integrity_check`.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let count = |table: &str| -> Result<usize> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
        Ok(n as usize)
    };
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    Ok(HealthReport {
        schema_version: migrations::get_schema_version(conn)?,
        node_count: count("index_nodes")?,
        log_count: count("attestation_log")?,
        rejection_count: count("attestation_rejections")?,
        size_bytes: database_size(conn)?,
        integrity_ok: integrity == "ok",
        integrity_details: integrity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![1.5f32, -0.25, 0.0, f32::MAX];
        let bytes = embedding_to_bytes(&v);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes_to_embedding(&bytes).unwrap(), v);
        assert!(bytes_to_embedding(&bytes[..3]).is_err());
    }

    #[test]
    fn open_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");
        let conn = open_database(&path).unwrap();
        let report = check_database_health(&conn).unwrap();
        assert!(report.integrity_ok);
        assert_eq!(report.node_count, 0);
        assert_eq!(report.schema_version, migrations::CURRENT_SCHEMA_VERSION);
        assert!(report.size_bytes > 0);
    }

    #[test]
    fn optimize_runs_on_populated_database() {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO index_nodes (slot, id, embedding, links) VALUES (0, 'a', x'0000803f', '[]')",
            [],
        )
        .unwrap();
        optimize_database(&conn).unwrap();
        let analyzed: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 'sqlite_stat1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(analyzed, 1);
    }
}
