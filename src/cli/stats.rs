use anyhow::Result;

use agentdb::config::AgentDbConfig;

/// Display index, cache, quantizer and audit statistics.
pub async fn stats(config: &AgentDbConfig) -> Result<()> {
    let db = super::open(config).await?;
    let stats = db.stats()?;

    println!("Index Statistics");
    println!("{}", "=".repeat(40));
    println!("  Path:                {}", db.path().display());
    println!("  Backend:             {}", stats.backend.backend);
    println!("  Vectors:             {}", stats.backend.count);
    println!("  Dimension:           {}", stats.backend.dimension);
    println!("  Metric:              {}", stats.backend.metric);
    println!(
        "  Memory (est.):       {}",
        super::format_bytes(stats.backend.memory_usage as u64)
    );
    println!();

    println!("Quantizer:");
    match &stats.quantizer {
        Some(q) => {
            println!("  Strategy:            {}", q.strategy);
            println!("  Training samples:    {}", q.training_samples);
            println!("  Compression ratio:   {:.1}x", q.compression_ratio);
            println!("  Est. error rate:     {:.4}", q.estimated_error_rate);
        }
        None => println!("  (none)"),
    }
    println!();

    if let Some(cache) = &stats.cache {
        println!("Query cache:           {}/{} entries", cache.size, cache.capacity);
    }
    println!("Attention backend:     {}", stats.attention_backend);
    println!("Attestation entries:   {}", stats.log_entries);
    println!("Rejections:            {}", stats.log_rejections);
    println!("Log tip:               {}", stats.log_tip);

    Ok(())
}
