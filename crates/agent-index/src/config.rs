//! Orchestrator configuration.
//!
//! Durations are stored as milliseconds so the struct maps one-to-one onto
//! TOML and environment overrides; accessors return [`Duration`].

use std::path::PathBuf;
use std::time::Duration;

use agent_engine::MetricType;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Minimum training points per centroid before a trainable engine is trained.
pub const MIN_POINTS_PER_CENTROID: usize = 39;

/// Which ANN engine backs the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Exact brute-force search
    Flat,
    /// usearch HNSW graph
    Hnsw,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Flat => write!(f, "flat"),
            EngineKind::Hnsw => write!(f, "hnsw"),
        }
    }
}

/// Configuration for the index orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Vector dimension
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Number of coarse clusters for trainable engines
    #[serde(default = "default_nlist")]
    pub nlist: usize,

    /// Bits per sub-quantizer index for trainable engines
    #[serde(default = "default_nbits_per_idx")]
    pub nbits_per_idx: u32,

    /// Distance metric
    #[serde(default)]
    pub metric_type: MetricType,

    /// Engine implementation
    #[serde(default = "default_engine")]
    pub engine: EngineKind,

    /// Snapshot base directory. `None` keeps everything in memory.
    #[serde(default)]
    pub index_path: Option<PathBuf>,

    /// Write snapshots to a temp directory and rotate origin/backup
    #[serde(default)]
    pub enable_copy_on_write: bool,

    /// Release spare buffer capacity after each commit and save
    #[serde(default)]
    pub enable_proactive_gc: bool,

    /// How often the daemon checks the insert queue length
    #[serde(default = "default_auto_index_check_duration_ms")]
    pub auto_index_check_duration_ms: u64,

    /// How often the daemon saves. 0 disables periodic saves.
    #[serde(default = "default_auto_save_index_duration_ms")]
    pub auto_save_index_duration_ms: u64,

    /// Hard upper bound between commit+save cycles. 0 disables it.
    #[serde(default = "default_auto_index_duration_limit_ms")]
    pub auto_index_duration_limit_ms: u64,

    /// Insert queue length that triggers a commit on the check tick
    #[serde(default = "default_auto_index_length")]
    pub auto_index_length: usize,

    /// Delay before the daemon starts ticking
    #[serde(default)]
    pub initial_delay_ms: u64,

    /// Lower bound for the snapshot load timeout
    #[serde(default = "default_min_load_index_timeout_ms")]
    pub min_load_index_timeout_ms: u64,

    /// Upper bound for the snapshot load timeout
    #[serde(default = "default_max_load_index_timeout_ms")]
    pub max_load_index_timeout_ms: u64,

    /// Load timeout budget per recorded entry
    #[serde(default = "default_load_index_timeout_factor_ms")]
    pub load_index_timeout_factor_ms: u64,
}

fn default_dimension() -> usize {
    384
}

fn default_nlist() -> usize {
    100
}

fn default_nbits_per_idx() -> u32 {
    8
}

fn default_engine() -> EngineKind {
    if cfg!(feature = "hnsw") {
        EngineKind::Hnsw
    } else {
        EngineKind::Flat
    }
}

fn default_auto_index_check_duration_ms() -> u64 {
    30 * 60 * 1000
}

fn default_auto_save_index_duration_ms() -> u64 {
    35 * 60 * 1000
}

fn default_auto_index_duration_limit_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_auto_index_length() -> usize {
    100
}

fn default_min_load_index_timeout_ms() -> u64 {
    3 * 60 * 1000
}

fn default_max_load_index_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn default_load_index_timeout_factor_ms() -> u64 {
    1
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            nlist: default_nlist(),
            nbits_per_idx: default_nbits_per_idx(),
            metric_type: MetricType::default(),
            engine: default_engine(),
            index_path: None,
            enable_copy_on_write: false,
            enable_proactive_gc: false,
            auto_index_check_duration_ms: default_auto_index_check_duration_ms(),
            auto_save_index_duration_ms: default_auto_save_index_duration_ms(),
            auto_index_duration_limit_ms: default_auto_index_duration_limit_ms(),
            auto_index_length: default_auto_index_length(),
            initial_delay_ms: 0,
            min_load_index_timeout_ms: default_min_load_index_timeout_ms(),
            max_load_index_timeout_ms: default_max_load_index_timeout_ms(),
            load_index_timeout_factor_ms: default_load_index_timeout_factor_ms(),
        }
    }
}

impl IndexConfig {
    /// In-memory config with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn with_copy_on_write(mut self, enabled: bool) -> Self {
        self.enable_copy_on_write = enabled;
        self
    }

    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Check the config for values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.dimension == 0 {
            return Err(IndexError::Config("dimension must be positive".to_string()));
        }
        if self.nbits_per_idx >= usize::BITS {
            return Err(IndexError::Config(format!(
                "nbits_per_idx {} is too large",
                self.nbits_per_idx
            )));
        }
        if self.min_load_index_timeout_ms > self.max_load_index_timeout_ms {
            return Err(IndexError::Config(format!(
                "min_load_index_timeout_ms ({}) exceeds max_load_index_timeout_ms ({})",
                self.min_load_index_timeout_ms, self.max_load_index_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        self.index_path.is_none()
    }

    /// Pending vectors required before training: `max(nlist, 2^nbits) * 39`.
    pub fn train_threshold(&self) -> usize {
        self.nlist.max(1usize << self.nbits_per_idx) * MIN_POINTS_PER_CENTROID
    }

    /// Load timeout for a snapshot recording `index_count` entries.
    pub fn load_timeout(&self, index_count: u64) -> Duration {
        let budget = index_count.saturating_mul(self.load_index_timeout_factor_ms);
        Duration::from_millis(
            budget.clamp(self.min_load_index_timeout_ms, self.max_load_index_timeout_ms),
        )
    }

    pub fn auto_index_check_duration(&self) -> Duration {
        Duration::from_millis(self.auto_index_check_duration_ms)
    }

    pub fn auto_save_index_duration(&self) -> Duration {
        Duration::from_millis(self.auto_save_index_duration_ms)
    }

    pub fn auto_index_duration_limit(&self) -> Duration {
        Duration::from_millis(self.auto_index_duration_limit_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}
