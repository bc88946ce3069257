mod helpers;

use agentdb::backend::{BackendChoice, BackendKind};
use agentdb::{SearchOptions, VectorError, VectorRecord};
use helpers::{backends, metadata, open, spike, test_config};
use serde_json::json;

#[test]
fn insert_then_search_finds_exact_match() {
    for choice in backends() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(test_config(dir.path(), 16, choice));
        for i in 0..16 {
            db.insert(VectorRecord::new(format!("v{i}"), spike(16, i))).unwrap();
        }

        let hits = db.search(&spike(16, 7), 3, &SearchOptions::default()).unwrap();
        assert_eq!(hits[0].id, "v7", "{choice:?}");
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits.len(), 3);
    }
}

#[test]
fn backend_choice_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let native = open(test_config(&dir.path().join("n"), 4, BackendChoice::Native));
    assert_eq!(native.backend_kind().unwrap(), BackendKind::Native);
    let portable = open(test_config(&dir.path().join("p"), 4, BackendChoice::Portable));
    assert_eq!(portable.backend_kind().unwrap(), BackendKind::Portable);
}

#[test]
fn get_returns_vector_and_metadata() {
    for choice in backends() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(test_config(dir.path(), 4, choice));
        let meta = metadata(json!({"source": "notes", "hierarchy_level": 1}));
        db.insert(VectorRecord::new("a", vec![0.1, 0.2, 0.3, 0.4]).with_metadata(meta.clone()))
            .unwrap();

        let record = db.get("a").unwrap().unwrap();
        assert_eq!(record.embedding, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(record.metadata, Some(meta));
        assert!(db.get("missing").unwrap().is_none());
    }
}

#[test]
fn reinsert_overwrites_vector_and_clears_metadata() {
    for choice in backends() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(test_config(dir.path(), 4, choice));
        let meta = metadata(json!({"v": 1}));
        db.insert(VectorRecord::new("a", spike(4, 0)).with_metadata(meta)).unwrap();
        db.insert(VectorRecord::new("a", spike(4, 1))).unwrap();

        let record = db.get("a").unwrap().unwrap();
        assert_eq!(record.embedding, spike(4, 1));
        assert!(record.metadata.is_none());
        assert_eq!(db.stats().unwrap().backend.count, 1);
    }
}

#[test]
fn wrong_dimension_is_refused_everywhere() {
    for choice in backends() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(test_config(dir.path(), 8, choice));
        db.insert(VectorRecord::new("ok", spike(8, 0))).unwrap();

        let err = db.insert(VectorRecord::new("bad", vec![1.0; 3])).unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch { expected: 8, actual: 3, .. }
        ));

        let batch = vec![
            VectorRecord::new("b1", spike(8, 1)),
            VectorRecord::new("b2", vec![1.0; 9]),
        ];
        assert!(matches!(
            db.insert_batch(batch).unwrap_err(),
            VectorError::DimensionMismatch { .. }
        ));
        // all-or-nothing
        assert!(db.get("b1").unwrap().is_none());

        assert!(matches!(
            db.search(&[1.0; 5], 1, &SearchOptions::default()).unwrap_err(),
            VectorError::DimensionMismatch { .. }
        ));
        assert_eq!(db.stats().unwrap().backend.count, 1);
    }
}

#[test]
fn remove_deletes_and_reports_presence() {
    for choice in backends() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(test_config(dir.path(), 4, choice));
        db.insert(VectorRecord::new("a", spike(4, 0))).unwrap();
        db.insert(VectorRecord::new("b", spike(4, 1))).unwrap();

        assert!(db.remove("a").unwrap());
        assert!(!db.remove("a").unwrap());
        let hits = db.search(&spike(4, 0), 5, &SearchOptions::default()).unwrap();
        assert!(hits.iter().all(|h| h.id != "a"));
        assert_eq!(hits.len(), 1);
    }
}

#[test]
fn threshold_and_filter_narrow_results() {
    for choice in backends() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(test_config(dir.path(), 4, choice));
        db.insert(VectorRecord::new("x", vec![1.0, 0.0, 0.0, 0.0]).with_metadata(metadata(json!({"kind": "fact"}))))
            .unwrap();
        db.insert(VectorRecord::new("y", vec![0.9, 0.1, 0.0, 0.0]).with_metadata(metadata(json!({"kind": "event"}))))
            .unwrap();
        db.insert(VectorRecord::new("z", vec![0.0, 0.0, 1.0, 0.0])).unwrap();

        let query = [1.0, 0.0, 0.0, 0.0];
        let near = db
            .search(&query, 10, &SearchOptions::default().with_threshold(0.9))
            .unwrap();
        let ids: Vec<_> = near.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);

        let facts = db
            .search(
                &query,
                10,
                &SearchOptions::default().with_filter(metadata(json!({"kind": "event"}))),
            )
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].id, "y");
    }
}

#[test]
fn operations_after_close_fail() {
    for choice in backends() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(test_config(dir.path(), 4, choice));
        db.insert(VectorRecord::new("a", spike(4, 0))).unwrap();
        db.close().unwrap();

        assert!(matches!(
            db.search(&spike(4, 0), 1, &SearchOptions::default()),
            Err(VectorError::NotInitialized)
        ));
        assert!(matches!(db.get("a"), Err(VectorError::NotInitialized)));
        assert!(matches!(
            db.insert(VectorRecord::new("b", spike(4, 1))),
            Err(VectorError::NotInitialized)
        ));
    }
}
