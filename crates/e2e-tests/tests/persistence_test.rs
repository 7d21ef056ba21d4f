//! Persistence E2E tests: snapshots survive restarts, and recovery falls
//! back through the copy-on-write slots.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use agent_index::{EngineKind, IndexConfig, Metadata};
use e2e_tests::{random_vectors, uuid, TestHarness};

#[tokio::test]
async fn test_round_trip_across_restart() {
    let harness = TestHarness::new();
    let vectors = random_vectors(50, 4, 1);
    let token = CancellationToken::new();
    {
        let index = harness.open(harness.config(4, EngineKind::Flat)).await;
        for (i, vector) in vectors.iter().enumerate() {
            index.insert(&uuid(i), vector.clone()).unwrap();
        }
        index.create_and_save_index(&token).await.unwrap();
        index.close(&token).await.unwrap();
    }

    let index = harness.open(harness.config(4, EngineKind::Flat)).await;
    assert_eq!(index.len(), 50);
    let results = index.search(1, 1, &vectors[10]).unwrap();
    assert_eq!(results[0].id, uuid(10));
    assert_eq!(
        Metadata::load(&harness.index_path.join("origin")).unwrap(),
        Metadata::valid(50)
    );
}

#[tokio::test]
async fn test_hnsw_round_trip_across_restart() {
    let harness = TestHarness::new();
    let vectors = random_vectors(30, 4, 2);
    let token = CancellationToken::new();
    {
        let index = harness.open(harness.config(4, EngineKind::Hnsw)).await;
        for (i, vector) in vectors.iter().enumerate() {
            index.insert(&uuid(i), vector.clone()).unwrap();
        }
        index.close(&token).await.unwrap();
    }

    let index = harness.open(harness.config(4, EngineKind::Hnsw)).await;
    assert_eq!(index.len(), 30);
    let results = index.search(1, 1, &vectors[3]).unwrap();
    assert_eq!(results[0].id, uuid(3));
}

#[tokio::test]
async fn test_close_flushes_queued_mutations() {
    let harness = TestHarness::new();
    let token = CancellationToken::new();
    {
        let index = harness.open(harness.config(4, EngineKind::Flat)).await;
        index.insert("queued", vec![0.5; 4]).unwrap();
        assert_eq!(index.len(), 0);
        index.close(&token).await.unwrap();
    }

    let index = harness.open(harness.config(4, EngineKind::Flat)).await;
    assert!(index.exists("queued").is_some());
}

#[tokio::test]
async fn test_recovers_from_backup_when_origin_is_lost() {
    let harness = TestHarness::new();
    let token = CancellationToken::new();
    {
        let index = harness.open(harness.config(4, EngineKind::Flat)).await;
        index.insert("first", vec![1.0; 4]).unwrap();
        index.create_and_save_index(&token).await.unwrap();
        index.insert("second", vec![2.0; 4]).unwrap();
        index.create_and_save_index(&token).await.unwrap();
        index.close(&token).await.unwrap();
    }
    std::fs::remove_dir_all(harness.index_path.join("origin")).unwrap();

    let index = harness.open(harness.config(4, EngineKind::Flat)).await;
    assert!(index.exists("first").is_some());
    assert!(index.exists("second").is_none());
}

#[tokio::test]
async fn test_legacy_snapshot_migrates_to_copy_on_write() {
    let harness = TestHarness::new();
    let token = CancellationToken::new();
    {
        let config = harness.config(4, EngineKind::Flat).with_copy_on_write(false);
        let index = harness.open(config).await;
        index.insert("old", vec![1.0; 4]).unwrap();
        index.close(&token).await.unwrap();
    }

    let index = harness.open(harness.config(4, EngineKind::Flat)).await;
    assert!(index.exists("old").is_some());
    assert!(harness.index_path.join("origin").join("metadata.json").exists());
}

#[tokio::test]
async fn test_background_loop_persists_and_drains() {
    let harness = TestHarness::new();
    let config = IndexConfig {
        auto_index_check_duration_ms: 10,
        auto_save_index_duration_ms: 20,
        auto_index_duration_limit_ms: 0,
        auto_index_length: 1,
        ..harness.config(4, EngineKind::Flat)
    };
    {
        let index = Arc::new(harness.open(config.clone()).await);
        let token = CancellationToken::new();
        let mut errors = index.start(token.clone()).unwrap();

        index.insert("auto", vec![1.0; 4]).unwrap();
        let origin = harness.index_path.join("origin").join("metadata.json");
        for _ in 0..200 {
            if origin.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(origin.exists());

        index.insert("late", vec![2.0; 4]).unwrap();
        token.cancel();
        assert!(errors.recv().await.is_none());
        index.close_within(Duration::from_secs(5)).await.unwrap();
    }

    let index = harness.open(config).await;
    assert!(index.exists("auto").is_some());
    assert!(index.exists("late").is_some());
}
