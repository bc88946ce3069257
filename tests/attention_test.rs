mod helpers;

use agentdb::attention::{AttentionBackend, AttentionInput, AttentionOutput};
use agentdb::backend::BackendChoice;
use agentdb::{SearchOptions, VectorError, VectorRecord};
use helpers::{metadata, open, test_config, unit_vectors};
use serde_json::json;

#[derive(Debug)]
struct BrokenAttention;

impl AttentionBackend for BrokenAttention {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn attend(&self, _input: &AttentionInput) -> agentdb::Result<AttentionOutput> {
        Err(VectorError::Attention("device lost".into()))
    }
}

fn filled(config: agentdb::AgentDbConfig) -> agentdb::AgentDb {
    let db = open(config);
    for (i, v) in unit_vectors(30, 8, 4).into_iter().enumerate() {
        let meta = metadata(json!({"hierarchy_level": i % 3}));
        db.insert(VectorRecord::new(format!("v{i}"), v).with_metadata(meta)).unwrap();
    }
    db
}

#[test]
fn failing_attention_falls_back_to_similarity_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 8, BackendChoice::Native);
    config.attention.enabled = true;
    let db = filled(config).with_attention_backend(Box::new(BrokenAttention));

    let query = &unit_vectors(1, 8, 99)[0];
    let with = db.search(query, 10, &SearchOptions::default()).unwrap();
    let without = db
        .search(query, 10, &SearchOptions::default().with_attention(false))
        .unwrap();
    assert_eq!(with, without);
    assert!(with.iter().all(|r| r.attention_weight.is_none()));
}

#[test]
fn attention_reranks_the_same_result_set() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 8, BackendChoice::Portable);
    config.attention.blend = 0.8;
    config.attention.decay_factor = 3.0;
    let db = filled(config);

    let query = &unit_vectors(1, 8, 99)[0];
    let plain = db.search(query, 10, &SearchOptions::default()).unwrap();
    let attended = db
        .search(query, 10, &SearchOptions::default().with_attention(true))
        .unwrap();

    let mut a: Vec<_> = plain.iter().map(|r| r.id.clone()).collect();
    let mut b: Vec<_> = attended.iter().map(|r| r.id.clone()).collect();
    a.sort();
    b.sort();
    assert_eq!(a, b);

    let weights: f32 = attended.iter().filter_map(|r| r.attention_weight).sum();
    assert!((weights - 1.0).abs() < 1e-4);
    for r in &attended {
        let expected = plain.iter().find(|p| p.id == r.id).unwrap();
        assert_eq!(r.distance, expected.distance);
    }
}

#[test]
fn flash_and_naive_engines_agree() {
    let query = &unit_vectors(1, 8, 7)[0];
    let mut runs = Vec::new();
    for flash in [true, false] {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 8, BackendChoice::Native);
        config.attention.enabled = true;
        config.attention.flash = flash;
        config.attention.block_size = 4;
        let db = filled(config);
        assert_eq!(
            db.stats().unwrap().attention_backend,
            if flash { "flash" } else { "naive" }
        );
        let hits = db.search(query, 12, &SearchOptions::default()).unwrap();
        runs.push(hits.into_iter().map(|h| h.id).collect::<Vec<_>>());
    }
    assert_eq!(runs[0], runs[1]);
}
