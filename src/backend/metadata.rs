//! Per-vector key/value attributes, kept outside the index.
//!
//! Persisted as a JSON object `{ id: { key: value } }` in `<path>.meta`, so the
//! index file format can change without touching metadata.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::config::sidecar_path;
use crate::error::Result;
use crate::types::Metadata;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    entries: HashMap<String, Metadata>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Metadata> {
        self.entries.get(id)
    }

    /// Replace the metadata for `id`; `None` clears it.
    pub fn set(&mut self, id: &str, metadata: Option<Metadata>) {
        match metadata {
            Some(m) if !m.is_empty() => {
                self.entries.insert(id.to_string(), m);
            }
            _ => {
                self.entries.remove(id);
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Metadata> {
        self.entries.remove(id)
    }

    /// Every filter key is present on `id` with an equal value. An empty filter
    /// matches everything, including ids without metadata.
    pub fn matches(&self, id: &str, filter: &Metadata) -> bool {
        if filter.is_empty() {
            return true;
        }
        let Some(meta) = self.entries.get(id) else {
            return false;
        };
        filter.iter().all(|(k, v)| meta.get(k) == Some(v))
    }

    /// Write the sidecar next to `index_path`. Written to a temp file and renamed.
    pub fn save(&self, index_path: &Path) -> Result<()> {
        let path = sidecar_path(index_path, "meta");
        let ordered: BTreeMap<&String, &Metadata> = self.entries.iter().collect();
        let tmp = sidecar_path(&path, "tmp");
        std::fs::write(&tmp, serde_json::to_vec(&ordered)?)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "metadata saved");
        Ok(())
    }

    /// Read the sidecar next to `index_path`; a missing sidecar is an empty store.
    pub fn load(index_path: &Path) -> Result<Self> {
        let path = sidecar_path(index_path, "meta");
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(&path)?;
        let entries: HashMap<String, Metadata> = serde_json::from_slice(&bytes)?;
        Ok(Self { entries })
    }
}
