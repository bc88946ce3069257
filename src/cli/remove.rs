use anyhow::{Context, Result};

use agentdb::config::AgentDbConfig;

/// Remove one vector and save the index.
pub async fn remove(config: &AgentDbConfig, id: &str) -> Result<()> {
    let db = super::open(config).await?;
    let removed = db
        .remove(id)
        .with_context(|| format!("failed to remove {id}"))?;
    if removed {
        db.save().context("failed to save index")?;
        println!("Removed {id}");
    } else {
        println!("No vector with id {id}");
    }
    Ok(())
}
