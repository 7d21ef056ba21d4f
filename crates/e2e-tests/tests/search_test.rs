//! Search E2E tests: mutations flow from the queue through a commit into
//! engine results.

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use agent_engine::MetricType;
use agent_index::{EngineKind, IndexConfig, IndexError, IndexOrchestrator};
use e2e_tests::{random_vectors, uuid};

async fn in_memory(engine: EngineKind) -> IndexOrchestrator {
    IndexOrchestrator::builder(IndexConfig::new(4).with_engine(engine))
        .build()
        .await
        .unwrap()
}

async fn nearest_is_b(engine: EngineKind) {
    let index = in_memory(engine).await;
    index.insert("a", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
    index.insert("b", vec![0.0, 1.0, 0.0, 0.0]).unwrap();
    index.insert("c", vec![0.0, 0.0, 1.0, 0.0]).unwrap();
    index.create_index(&CancellationToken::new()).await.unwrap();

    let results = index.search(1, 1, &[0.0, 1.0, 0.0, 0.0]).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "b");
}

#[tokio::test]
async fn test_flat_nearest_neighbor() {
    nearest_is_b(EngineKind::Flat).await;
}

#[tokio::test]
async fn test_hnsw_nearest_neighbor() {
    nearest_is_b(EngineKind::Hnsw).await;
}

#[tokio::test]
async fn test_every_vector_finds_itself() {
    let index = in_memory(EngineKind::Flat).await;
    let vectors = random_vectors(200, 4, 7);
    for (i, vector) in vectors.iter().enumerate() {
        index.insert(&uuid(i), vector.clone()).unwrap();
    }
    index.create_index(&CancellationToken::new()).await.unwrap();
    assert_eq!(index.len(), 200);

    for (i, vector) in vectors.iter().enumerate().step_by(17) {
        let results = index.search(1, 1, vector).unwrap();
        assert_eq!(results[0].id, uuid(i));
    }
}

#[tokio::test]
async fn test_batched_queries_return_k_per_query() {
    let index = in_memory(EngineKind::Flat).await;
    for (i, vector) in random_vectors(20, 4, 11).into_iter().enumerate() {
        index.insert(&uuid(i), vector).unwrap();
    }
    index.create_index(&CancellationToken::new()).await.unwrap();

    let queries: Vec<f32> = random_vectors(3, 4, 12).into_iter().flatten().collect();
    let results = index.search(5, 3, &queries).unwrap();
    assert_eq!(results.len(), 15);
}

#[tokio::test]
async fn test_update_and_delete_reflected_after_commit() {
    let index = in_memory(EngineKind::Flat).await;
    let token = CancellationToken::new();
    index.insert("a", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
    index.insert("b", vec![0.0, 1.0, 0.0, 0.0]).unwrap();
    index.create_index(&token).await.unwrap();

    index.update("a", vec![0.0, 0.0, 0.0, 1.0]).unwrap();
    index.delete("b").unwrap();
    // Queued mutations are invisible to search until committed.
    let before = index.search(1, 1, &[0.0, 1.0, 0.0, 0.0]).unwrap();
    assert_eq!(before[0].id, "b");

    index.create_index(&token).await.unwrap();
    assert_eq!(index.len(), 1);
    assert!(index.exists("b").is_none());
    let after = index.search(2, 1, &[0.0, 0.0, 0.0, 1.0]).unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, "a");
}

#[tokio::test]
async fn test_inner_product_ranks_largest_first() {
    let config = IndexConfig {
        metric_type: MetricType::InnerProduct,
        ..IndexConfig::new(4).with_engine(EngineKind::Flat)
    };
    let index = IndexOrchestrator::builder(config).build().await.unwrap();
    index.insert("small", vec![0.1, 0.1, 0.1, 0.1]).unwrap();
    index.insert("large", vec![1.0, 1.0, 1.0, 1.0]).unwrap();
    index.create_index(&CancellationToken::new()).await.unwrap();

    let results = index.search(2, 1, &[1.0, 1.0, 1.0, 1.0]).unwrap();
    assert_eq!(results[0].id, "large");
    assert!(results[0].distance > results[1].distance);
}

#[tokio::test]
async fn test_client_errors() {
    let index = in_memory(EngineKind::Flat).await;
    assert!(matches!(
        index.search(1, 1, &[0.0; 4]),
        Err(IndexError::EmptySearchResult)
    ));
    assert!(matches!(
        index.search(1, 1, &[0.0; 3]),
        Err(IndexError::DimensionMismatch { .. })
    ));
    assert!(matches!(
        index.insert("", vec![0.0; 4]),
        Err(IndexError::UuidEmpty)
    ));
    assert!(matches!(
        index.delete("missing"),
        Err(IndexError::ObjectIdNotFound(_))
    ));
}
