//! Scalar-kernel backend persisted as SQLite rows.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::info;

use super::metadata::MetadataStore;
use super::shared::IndexCore;
use super::{BackendKind, BackendStats, VectorBackend};
use crate::config::IndexConfig;
use crate::db::{self, bytes_to_embedding, embedding_to_bytes};
use crate::error::{Result, VectorError};
use crate::index::{HnswIndex, HnswSnapshot, SnapshotNode};
use crate::simd::Kernel;
use crate::types::{SearchOptions, SearchResult, VectorRecord};

/// Runs anywhere: scalar distance loop, no quantized scan.
#[derive(Debug, Default)]
pub struct PortableBackend {
    core: Option<IndexCore>,
}

impl PortableBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a saved index on a blocking task.
    pub async fn load_async(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        tokio::task::spawn_blocking(move || {
            let mut backend = Self::new();
            backend.load(&path)?;
            Ok(backend)
        })
        .await
        .map_err(|e| VectorError::Io(std::io::Error::other(e)))?
    }

    fn core(&self) -> Result<&IndexCore> {
        self.core.as_ref().ok_or(VectorError::NotInitialized)
    }

    fn core_mut(&mut self) -> Result<&mut IndexCore> {
        self.core.as_mut().ok_or(VectorError::NotInitialized)
    }
}

/// Replace the stored snapshot in one transaction.
pub(crate) fn write_snapshot(conn: &mut Connection, snapshot: &HnswSnapshot) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM index_nodes", [])?;
    tx.execute(
        "INSERT OR REPLACE INTO index_header (id, config, entry_point, max_level, saved_at)
         VALUES (1, ?1, ?2, ?3, ?4)",
        params![
            serde_json::to_string(&snapshot.config)?,
            snapshot.entry_point,
            snapshot.max_level as i64,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO index_nodes (slot, id, embedding, links) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for node in &snapshot.nodes {
            stmt.execute(params![
                node.slot,
                node.id,
                embedding_to_bytes(&node.vector),
                serde_json::to_string(&node.links)?,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// `None` when nothing has been saved to this database yet.
pub(crate) fn read_snapshot(conn: &Connection) -> Result<Option<HnswSnapshot>> {
    let header = conn
        .query_row(
            "SELECT config, entry_point, max_level FROM index_header WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<u32>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((config, entry_point, max_level)) = header else {
        return Ok(None);
    };
    let config: IndexConfig = serde_json::from_str(&config)?;

    let mut stmt = conn.prepare("SELECT slot, id, embedding, links FROM index_nodes ORDER BY slot")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut nodes = Vec::with_capacity(rows.len());
    for (slot, id, embedding, links) in rows {
        nodes.push(SnapshotNode {
            slot,
            id,
            vector: bytes_to_embedding(&embedding)?,
            links: serde_json::from_str(&links)?,
        });
    }
    Ok(Some(HnswSnapshot {
        config,
        entry_point,
        max_level: max_level.max(0) as usize,
        nodes,
    }))
}

impl VectorBackend for PortableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Portable
    }

    fn initialize(&mut self, config: &IndexConfig) -> Result<()> {
        self.core = Some(IndexCore::new(config, Kernel::scalar())?);
        info!(dimension = config.dimension, metric = %config.metric, "portable backend initialized");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.core.is_some()
    }

    fn insert(&mut self, record: VectorRecord) -> Result<()> {
        self.core_mut()?.insert(record)
    }

    fn insert_batch(&mut self, records: Vec<VectorRecord>) -> Result<()> {
        let core = self.core_mut()?;
        core.check_batch(&records)?;
        for record in records {
            core.insert(record)?;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.core()?.search(query, k, options)
    }

    fn remove(&mut self, id: &str) -> Result<bool> {
        Ok(self.core_mut()?.remove(id))
    }

    fn get_vector(&self, id: &str) -> Result<Option<VectorRecord>> {
        Ok(self.core()?.get_vector(id))
    }

    fn stats(&self) -> Result<BackendStats> {
        Ok(self.core()?.stats(BackendKind::Portable))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let core = self.core()?;
        let mut conn = db::open_database(path)?;
        write_snapshot(&mut conn, &core.index.snapshot())?;
        db::optimize_database(&conn)?;
        core.metadata.save(path)?;
        info!(path = %path.display(), count = core.index.len(), "portable index saved");
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(VectorError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no index at {}", path.display()),
            )));
        }
        let conn = db::open_database(path)?;
        let Some(snapshot) = read_snapshot(&conn)? else {
            return Err(VectorError::InvalidInput(format!(
                "{} holds no saved index",
                path.display()
            )));
        };
        let core = IndexCore {
            index: HnswIndex::restore(snapshot, Kernel::scalar())?,
            metadata: MetadataStore::load(path)?,
        };
        core.check_loaded_shape(self.core.as_ref().map(|c| c.index.config()))?;
        info!(path = %path.display(), count = core.index.len(), "portable index loaded");
        self.core = Some(core);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.core = None;
        Ok(())
    }
}
