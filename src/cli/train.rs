use anyhow::Result;
use std::time::Duration;

use agentdb::backend::TrainOutcome;
use agentdb::config::AgentDbConfig;
use agentdb::quantization::TrainContext;

/// Train the configured quantizer against the stored vectors and report its quality.
pub async fn train(config: &AgentDbConfig, timeout: Option<Duration>) -> Result<()> {
    let db = super::open(config).await?;
    let mut ctx = TrainContext::new();
    if let Some(timeout) = timeout {
        ctx = ctx.with_timeout(timeout);
    }

    match db.train_quantizer(&ctx)? {
        TrainOutcome::Trained(stats) => {
            println!("Quantizer trained");
            println!("  Strategy:            {}", stats.strategy);
            println!("  Training samples:    {}", stats.training_samples);
            println!("  Compression ratio:   {:.1}x", stats.compression_ratio);
            println!("  Est. error rate:     {:.4}", stats.estimated_error_rate);
        }
        TrainOutcome::Skipped(reason) => println!("Training skipped: {reason}"),
    }
    Ok(())
}
