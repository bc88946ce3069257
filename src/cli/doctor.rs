//! CLI `doctor` command: capability probe, backend selection, audit chain and
//! journal health.

use anyhow::{Context, Result};

use agentdb::backend::{NativeFactory, SimdNativeFactory};
use agentdb::config::{sidecar_path, AgentDbConfig};
use agentdb::db;
use agentdb::simd::Kernel;

/// Run diagnostics and print a health report.
pub async fn doctor(config: &AgentDbConfig) -> Result<()> {
    let path = config.resolved_path();
    let kernel = Kernel::detect();

    println!("AgentDB Health Report");
    println!("=====================");
    println!();
    println!("SIMD kernel:       {} ({} lanes)", kernel.name(), kernel.lanes());
    match SimdNativeFactory.probe(&config.index, &path) {
        Ok(()) => println!("Native backend:    available"),
        Err(e) => println!("Native backend:    unavailable ({e})"),
    }
    println!("Backend choice:    {:?}", config.storage.backend);
    println!();

    if !path.exists() {
        println!("Index:             not found at {}", path.display());
        println!("Run `agentdb import <file>` to create it.");
        return Ok(());
    }
    let file_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    println!("Index:             {}", path.display());
    println!("File size:         {}", super::format_bytes(file_size));

    let engine = super::open(config)
        .await
        .context("index could not be opened (may be corrupt)")?;
    println!("Selected backend:  {}", engine.backend_kind()?);
    println!("Vectors:           {}", engine.stats()?.backend.count);
    println!();

    match engine.verify_log() {
        Ok(()) => println!("Attestation chain: VERIFIED"),
        Err(e) => println!("Attestation chain: BROKEN ({e})"),
    }

    let audit_path = sidecar_path(&path, "audit");
    let conn = db::open_database(&audit_path).context("failed to open audit journal")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;
    println!("Journal schema:    v{}", report.schema_version);
    println!("  Log entries:     {}", report.log_count);
    println!("  Rejections:      {}", report.rejection_count);
    println!("  Size in use:     {}", super::format_bytes(report.size_bytes));
    if report.integrity_ok {
        println!("  Integrity check: PASSED");
    } else {
        println!("  Integrity check: FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore {} from a backup", audit_path.display());
        println!("  2. The index itself is unaffected; re-import to rebuild history");
    }

    Ok(())
}
