//! End-to-end test infrastructure for the vector agent.
//!
//! Provides a shared TestHarness that owns a snapshot directory and opens
//! orchestrators over it, so tests can restart an index and observe what
//! survived.

use std::path::PathBuf;

use agent_index::{EngineKind, IndexConfig, IndexOrchestrator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Snapshot base directory
    pub index_path: PathBuf,
}

impl TestHarness {
    /// Create a new test harness with an empty snapshot directory.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let index_path = temp_dir.path().join("index");
        std::fs::create_dir_all(&index_path).expect("Failed to create index dir");
        Self {
            _temp_dir: temp_dir,
            index_path,
        }
    }

    /// Persistent copy-on-write config over the harness directory.
    pub fn config(&self, dimension: usize, engine: EngineKind) -> IndexConfig {
        IndexConfig::new(dimension)
            .with_engine(engine)
            .with_index_path(&self.index_path)
            .with_copy_on_write(true)
    }

    /// Open an orchestrator, recovering whatever is on disk.
    pub async fn open(&self, config: IndexConfig) -> IndexOrchestrator {
        IndexOrchestrator::builder(config)
            .build()
            .await
            .expect("Failed to open index")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate `count` deterministic vectors of `dimension` components in [0, 1).
pub fn random_vectors(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dimension).map(|_| rng.random::<f32>()).collect())
        .collect()
}

/// UUID used for the i-th generated vector.
pub fn uuid(i: usize) -> String {
    format!("vec-{:05}", i)
}
