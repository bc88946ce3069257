mod helpers;

use agentdb::backend::{BackendChoice, TrainOutcome};
use agentdb::quantization::{QuantizationStrategy, Quantizer, ScalarQuantizer, TrainContext};
use agentdb::{SearchOptions, SearchStrategy, VectorRecord};
use helpers::{open, test_config, unit_vectors};

fn scan() -> SearchOptions {
    SearchOptions::default().with_strategy(SearchStrategy::QuantizedScan { rerank: 4 })
}

#[test]
fn scalar_reconstruction_stays_within_bound() {
    let sample = unit_vectors(200, 32, 1);
    for bits in [8u8, 4] {
        let mut q = ScalarQuantizer::new(32, bits).unwrap();
        q.train(&sample, &TrainContext::new()).unwrap();
        let levels = ((1u32 << bits) - 1) as f32;

        for v in &sample {
            let decoded = q.decode(&q.encode(v).unwrap()).unwrap();
            for (d, (x, y)) in v.iter().zip(&decoded).enumerate() {
                let (lo, hi) = sample
                    .iter()
                    .map(|s| s[d])
                    .fold((f32::MAX, f32::MIN), |(lo, hi), x| (lo.min(x), hi.max(x)));
                let bound = (hi - lo) / (2.0 * levels) + 1e-6;
                assert!((x - y).abs() <= bound, "{bits} bits, dim {d}: {x} vs {y}");
            }
        }
    }
}

#[test]
fn every_strategy_serves_quantized_scans() {
    let vectors = unit_vectors(300, 32, 3);
    for strategy in [
        QuantizationStrategy::Scalar,
        QuantizationStrategy::Product,
        QuantizationStrategy::Binary,
    ] {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 32, BackendChoice::Native);
        config.quantization.strategy = strategy;
        config.quantization.subspaces = 8;
        config.quantization.centroids = 16;
        let db = open(config);
        let records = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| VectorRecord::new(format!("v{i}"), v.clone()))
            .collect();
        db.insert_batch(records).unwrap();

        match db.train_quantizer(&TrainContext::new()).unwrap() {
            TrainOutcome::Trained(stats) => {
                assert_eq!(stats.training_samples, 300);
                assert!(stats.compression_ratio > 1.0);
            }
            TrainOutcome::Skipped(reason) => panic!("{strategy}: {reason}"),
        }

        for i in [0, 150, 299] {
            let hits = db.search(&vectors[i], 5, &scan()).unwrap();
            assert_eq!(hits[0].id, format!("v{i}"), "{strategy}");
            assert!(hits[0].distance.abs() < 1e-5);
        }

        // inserts after training are encoded too
        let late = unit_vectors(1, 32, 40).remove(0);
        db.insert(VectorRecord::new("late", late.clone())).unwrap();
        assert_eq!(db.search(&late, 1, &scan()).unwrap()[0].id, "late");
    }
}

#[test]
fn too_small_sample_is_skipped_and_scan_uses_graph() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 8, BackendChoice::Native);
    config.quantization.strategy = QuantizationStrategy::Product;
    config.quantization.subspaces = 2;
    config.quantization.centroids = 64;
    let db = open(config);
    let vectors = unit_vectors(10, 8, 8);
    for (i, v) in vectors.iter().enumerate() {
        db.insert(VectorRecord::new(format!("v{i}"), v.clone())).unwrap();
    }

    assert!(matches!(
        db.train_quantizer(&TrainContext::new()).unwrap(),
        TrainOutcome::Skipped(_)
    ));
    assert!(db.stats().unwrap().quantizer.is_none());
    let hits = db.search(&vectors[4], 1, &scan()).unwrap();
    assert_eq!(hits[0].id, "v4");
}

#[test]
fn portable_backend_does_not_quantize() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 8, BackendChoice::Portable);
    config.quantization.strategy = QuantizationStrategy::Scalar;
    let db = open(config);
    let vectors = unit_vectors(20, 8, 2);
    for (i, v) in vectors.iter().enumerate() {
        db.insert(VectorRecord::new(format!("v{i}"), v.clone())).unwrap();
    }
    assert!(matches!(
        db.train_quantizer(&TrainContext::new()).unwrap(),
        TrainOutcome::Skipped(_)
    ));
    assert_eq!(db.search(&vectors[3], 1, &scan()).unwrap()[0].id, "v3");
}

#[test]
fn quantizer_is_retrained_when_index_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 16, BackendChoice::Native);
    config.quantization.strategy = QuantizationStrategy::Binary;
    {
        let db = open(config.clone());
        let records = unit_vectors(50, 16, 12)
            .into_iter()
            .enumerate()
            .map(|(i, v)| VectorRecord::new(format!("v{i}"), v))
            .collect();
        db.insert_batch(records).unwrap();
        db.save().unwrap();
    }

    let db = open(config);
    let stats = db.stats().unwrap().quantizer.unwrap();
    assert_eq!(stats.strategy, "binary");
    assert_eq!(stats.training_samples, 50);
}

#[test]
fn cancelled_training_keeps_previous_quantizer() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 16, BackendChoice::Native);
    config.quantization.strategy = QuantizationStrategy::Product;
    config.quantization.subspaces = 4;
    config.quantization.centroids = 8;
    let db = open(config);
    let records = unit_vectors(64, 16, 13)
        .into_iter()
        .enumerate()
        .map(|(i, v)| VectorRecord::new(format!("v{i}"), v))
        .collect();
    db.insert_batch(records).unwrap();
    assert!(matches!(
        db.train_quantizer(&TrainContext::new()).unwrap(),
        TrainOutcome::Trained(_)
    ));

    let ctx = TrainContext::new();
    ctx.cancel();
    assert!(matches!(db.train_quantizer(&ctx).unwrap(), TrainOutcome::Skipped(_)));
    assert!(db.stats().unwrap().quantizer.is_some());
}
