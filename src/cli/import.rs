use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;

use agentdb::config::AgentDbConfig;
use agentdb::types::{Metadata, VectorRecord};

/// One line of an import file. A missing id gets a generated one.
#[derive(Debug, Deserialize)]
struct ImportLine {
    id: Option<String>,
    embedding: Vec<f32>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

impl From<ImportLine> for VectorRecord {
    fn from(line: ImportLine) -> Self {
        let record = match line.id {
            Some(id) => VectorRecord::new(id, line.embedding),
            None => VectorRecord::generated(line.embedding),
        };
        match line.metadata {
            Some(meta) => record.with_metadata(meta),
            None => record,
        }
    }
}

/// Import vectors from a JSON Lines file, `batch_size` records per mutation.
///
/// A malformed line aborts the import before anything from its batch is written;
/// earlier batches stay applied and are saved.
pub async fn import(config: &AgentDbConfig, file: &Path, batch_size: usize) -> Result<()> {
    let reader = std::io::BufReader::new(
        std::fs::File::open(file)
            .with_context(|| format!("failed to open import file: {}", file.display()))?,
    );
    let lines: Vec<String> = reader
        .lines()
        .collect::<std::io::Result<_>>()
        .context("failed to read import file")?;
    let lines: Vec<(usize, String)> = lines
        .into_iter()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .collect();

    let db = super::open(config).await?;
    println!("Importing {} vectors...", lines.len());

    let pb = ProgressBar::new(lines.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );

    let mut imported = 0u64;
    let mut outcome = Ok(());
    for chunk in lines.chunks(batch_size.max(1)) {
        let batch = chunk
            .iter()
            .map(|(n, line)| {
                serde_json::from_str::<ImportLine>(line)
                    .map(VectorRecord::from)
                    .with_context(|| format!("line {}: invalid record", n + 1))
            })
            .collect::<Result<Vec<_>>>();
        let result = batch.and_then(|records| {
            let count = records.len() as u64;
            db.insert_batch(records).context("batch insert failed")?;
            Ok(count)
        });
        match result {
            Ok(count) => {
                imported += count;
                pb.inc(count);
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    pb.finish_and_clear();

    if imported > 0 {
        db.save().context("failed to save index")?;
    }
    println!("Import complete:");
    println!("  Vectors imported:    {imported}");
    println!("  Index size:          {}", db.stats()?.backend.count);

    outcome
}
