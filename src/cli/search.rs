use anyhow::{Context, Result};

use agentdb::config::AgentDbConfig;
use agentdb::types::{Metadata, SearchOptions};

pub struct SearchArgs {
    pub vector: String,
    pub k: usize,
    pub threshold: Option<f32>,
    /// JSON object; every key must match a result's metadata.
    pub filter: Option<String>,
    pub attention: Option<bool>,
    pub json: bool,
}

/// Run a nearest-neighbor query from the terminal.
pub async fn search(config: &AgentDbConfig, args: SearchArgs) -> Result<()> {
    let query = super::parse_vector(&args.vector)?;
    let mut options = SearchOptions {
        threshold: args.threshold,
        attention: args.attention,
        ..SearchOptions::default()
    };
    if let Some(raw) = &args.filter {
        let filter: Metadata =
            serde_json::from_str(raw).context("filter must be a JSON object")?;
        options.filter = Some(filter);
    }

    let db = super::open(config).await?;
    let results = db.search(&query, args.k, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", results.len());
    for (i, result) in results.iter().enumerate() {
        let attention = result
            .attention_weight
            .map(|w| format!(", attention: {w:.4}"))
            .unwrap_or_default();
        println!(
            "  {}. {} (similarity: {:.4}, distance: {:.4}{attention})",
            i + 1,
            result.id,
            result.similarity,
            result.distance
        );
        if let Some(meta) = &result.metadata {
            println!("     {}", serde_json::Value::Object(meta.clone()));
        }
    }

    Ok(())
}
