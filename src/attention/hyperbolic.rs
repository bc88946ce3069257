//! Hierarchy-aware bias.
//!
//! Adding `-level * decay` to a logit multiplies that key's unnormalized weight by
//! `exp(-level * decay)`, so shallow candidates win over deep ones of equal score.

use ndarray::Array1;

use crate::types::Metadata;

/// Metadata key holding a result's depth in a hierarchy (0 = root).
pub const LEVEL_KEY: &str = "hierarchy_level";

/// `-level * decay` per key.
pub fn level_bias(levels: &[f32], decay: f32) -> Array1<f32> {
    levels.iter().map(|l| -l.max(0.0) * decay).collect()
}

/// Level from metadata; absent, non-numeric, or negative values count as 0.
pub fn hierarchy_level(metadata: Option<&Metadata>) -> f32 {
    metadata
        .and_then(|m| m.get(LEVEL_KEY))
        .and_then(serde_json::Value::as_f64)
        .map(|l| l.max(0.0) as f32)
        .unwrap_or(0.0)
}
