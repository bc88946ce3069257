pub mod doctor;
pub mod import;
pub mod remove;
pub mod search;
pub mod stats;
pub mod train;

use anyhow::{Context, Result};

use agentdb::config::AgentDbConfig;
use agentdb::engine::AgentDb;

/// Open the configured database for a one-shot command.
pub(crate) async fn open(config: &AgentDbConfig) -> Result<AgentDb> {
    let path = config.resolved_path();
    AgentDb::open_async(config.clone())
        .await
        .with_context(|| format!("failed to open index at {}", path.display()))
}

/// Parse `0.1,0.2,0.3` or `[0.1, 0.2, 0.3]` into a vector.
pub(crate) fn parse_vector(raw: &str) -> Result<Vec<f32>> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("vector is not a JSON array of numbers");
    }
    trimmed
        .split(',')
        .map(|x| {
            x.trim()
                .parse::<f32>()
                .with_context(|| format!("invalid vector component: {x:?}"))
        })
        .collect()
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
