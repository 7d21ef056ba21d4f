//! Instrumented engine for orchestrator tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_engine::{
    EngineError, EngineFactory, FlatConfig, FlatEngine, IndexEngine, InternalId, SearchHit,
};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    adds: AtomicUsize,
    saves: AtomicUsize,
    loads: AtomicUsize,
}

impl Counters {
    pub fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

/// Flat engine that counts calls and can require training or fail removes.
pub(crate) struct CountingEngine {
    inner: FlatEngine,
    trained: bool,
    fail_removes: bool,
    counters: Arc<Counters>,
}

impl IndexEngine for CountingEngine {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn train(&mut self, count: usize, vectors: &[f32]) -> Result<(), EngineError> {
        self.inner.train(count, vectors)?;
        self.trained = true;
        Ok(())
    }

    fn add(
        &mut self,
        count: usize,
        vectors: &[f32],
        ids: &[InternalId],
    ) -> Result<usize, EngineError> {
        if !self.trained {
            return Err(EngineError::NotTrained);
        }
        self.counters.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add(count, vectors, ids)
    }

    fn remove(&mut self, count: usize, ids: &[InternalId]) -> Result<usize, EngineError> {
        if self.fail_removes {
            return Err(EngineError::Index("injected remove failure".to_string()));
        }
        self.inner.remove(count, ids)
    }

    fn search(&self, k: usize, nq: usize, queries: &[f32]) -> Result<Vec<SearchHit>, EngineError> {
        self.inner.search(k, nq, queries)
    }

    fn save_index_with_path(&self, path: &Path) -> Result<(), EngineError> {
        self.counters.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_index_with_path(path)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

#[derive(Clone)]
pub(crate) struct CountingFactory {
    dimension: usize,
    trained: bool,
    fail_removes: bool,
    load_delay: Option<Duration>,
    slow_loads: Option<Arc<AtomicUsize>>,
    counters: Arc<Counters>,
}

impl CountingFactory {
    pub fn trained(dimension: usize) -> Self {
        Self {
            dimension,
            trained: true,
            fail_removes: false,
            load_delay: None,
            slow_loads: None,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn untrained(dimension: usize) -> Self {
        Self {
            trained: false,
            ..Self::trained(dimension)
        }
    }

    pub fn failing_removes(mut self) -> Self {
        self.fail_removes = true;
        self
    }

    pub fn slow_load(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Only the first load sleeps for `delay`.
    pub fn slow_first_load(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self.slow_loads = Some(Arc::new(AtomicUsize::new(1)));
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    fn wrap(&self, inner: FlatEngine, trained: bool) -> Box<dyn IndexEngine> {
        Box::new(CountingEngine {
            inner,
            trained,
            fail_removes: self.fail_removes,
            counters: Arc::clone(&self.counters),
        })
    }
}

impl EngineFactory for CountingFactory {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn create(&self, _path: Option<&Path>) -> Result<Box<dyn IndexEngine>, EngineError> {
        Ok(self.wrap(FlatEngine::new(FlatConfig::new(self.dimension)), self.trained))
    }

    fn load(&self, path: &Path) -> Result<Box<dyn IndexEngine>, EngineError> {
        if let Some(delay) = self.load_delay {
            let slow = match &self.slow_loads {
                Some(left) => left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok(),
                None => true,
            };
            if slow {
                std::thread::sleep(delay);
            }
        }
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        let inner = FlatEngine::load(FlatConfig::new(self.dimension), path)?;
        Ok(self.wrap(inner, true))
    }
}
