//! Server configuration module.
//!
//! Handles loading, validating, and merging the server's TOML config file.
//! Stock defaults are serialized to a TOML table and the user file is merged
//! on top, so a config file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! cache_folder = "cache"             # Where derivatives are written
//! snapshot = "save-images.json"      # Persisted library tree
//! # garbage_folder = "garbage"       # Enables deletion (moves originals here)
//!
//! [sources]                          # Library roots, name = folder
//! # photos = "/data/photos"
//!
//! [images]
//! sizes = [1080, 250]                # Derivative heights, largest first
//! quality = 75                       # JPEG quality (1-100)
//!
//! [pipeline]
//! open_queue = 18                    # Decode queue
//! resize_queue = 7                   # Resize queue
//! save_queue = 7                     # Encode/write queue
//! reducer_queue = 100                # Intake queue in front of the pipeline
//!
//! [reconcile]
//! grace_ms = 100                     # Wait for a running update before refusing
//!
//! [processing]
//! max_processes = 4                  # Parallel folder scans (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::Quality;
use crate::pipeline::PipelineCapacity;
use crate::reducer::ReducerSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration loaded from TOML.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Root folder of the derivative cache.
    pub cache_folder: PathBuf,
    /// Path of the persisted library tree.
    pub snapshot: PathBuf,
    /// Folder receiving deleted originals. Deletion is disabled without it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub garbage_folder: Option<PathBuf>,
    /// Library roots by name.
    pub sources: BTreeMap<String, PathBuf>,
    /// Derivative generation settings.
    pub images: ImagesConfig,
    /// Queue capacities.
    pub pipeline: PipelineConfig,
    /// Reconciliation scheduling.
    pub reconcile: ReconcileConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cache_folder: PathBuf::from("cache"),
            snapshot: PathBuf::from("save-images.json"),
            garbage_folder: None,
            sources: BTreeMap::new(),
            images: ImagesConfig::default(),
            pipeline: PipelineConfig::default(),
            reconcile: ReconcileConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.quality == 0 || self.images.quality > 100 {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if self.images.sizes.is_empty() {
            return Err(ConfigError::Validation(
                "images.sizes must not be empty".into(),
            ));
        }
        if self.images.sizes.contains(&0) {
            return Err(ConfigError::Validation(
                "images.sizes values must be non-zero".into(),
            ));
        }
        for (name, folder) in &self.sources {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(ConfigError::Validation(format!(
                    "source name '{name}' must be a single path segment"
                )));
            }
            if folder.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "source '{name}' has an empty folder"
                )));
            }
        }
        Ok(())
    }

    /// Settings for the [`Reducer`](crate::reducer::Reducer) and its pipeline.
    pub fn reducer_settings(&self) -> ReducerSettings {
        ReducerSettings {
            cache_root: self.cache_folder.clone(),
            sizes: self.images.sizes.clone(),
            queue: self.pipeline.reducer_queue,
            quality: Quality::new(self.images.quality),
            pipeline: self.pipeline.capacity(),
        }
    }
}

/// Derivative generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Derivative heights in pixels. Processed largest first.
    pub sizes: Vec<u32>,
    /// JPEG encoding quality (1 = worst, 100 = best).
    pub quality: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            sizes: vec![1080, 250],
            quality: 75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub open_queue: usize,
    pub resize_queue: usize,
    pub save_queue: usize,
    pub reducer_queue: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let capacity = PipelineCapacity::default();
        Self {
            open_queue: capacity.open,
            resize_queue: capacity.resize,
            save_queue: capacity.save,
            reducer_queue: 100,
        }
    }
}

impl PipelineConfig {
    pub fn capacity(&self) -> PipelineCapacity {
        PipelineCapacity {
            open: self.open_queue,
            resize: self.resize_queue,
            save: self.save_queue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// How long a new update waits for a running one before giving up.
    pub grace_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { grace_ms: 100 }
    }
}

impl ReconcileConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

/// How many scan workers to run in parallel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Upper bound on rayon workers. Unset means one per core; a larger
    /// value than the core count is lowered to it.
    pub max_processes: Option<usize>,
}

/// Worker count for the rayon pool: the configured bound, capped at the
/// number of cores.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    match config.max_processes {
        Some(limit) => limit.min(cores),
        None => cores,
    }
}

/// Every default value as a TOML table, the bottom layer of the merge.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ServerConfig::default()).expect("default config must serialize")
}

/// Lay `overlay` over `base`. Tables merge key by key, recursively; any
/// other overlay value wins outright. Base keys absent from the overlay
/// survive.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    let (mut merged, overlay) = match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => (base, overlay),
        (_, replacement) => return replacement,
    };
    for (key, value) in overlay {
        let value = match merged.remove(&key) {
            Some(existing) => merge_toml(existing, value),
            None => value,
        };
        merged.insert(key, value);
    }
    toml::Value::Table(merged)
}

/// Read and merge `path` over the stock defaults, then check the result.
///
/// A missing file is not an error: the server runs on defaults.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let mut layered = stock_defaults_value();
    if path.exists() {
        let user: toml::Value = toml::from_str(&fs::read_to_string(path)?)?;
        layered = merge_toml(layered, user);
    }
    let config: ServerConfig = layered.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Photos Server Configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Root folder of the derivative cache. Derivatives mirror the library layout:
#   <cache_folder>/<source>/<folder>/<name>-<size>.jpg
cache_folder = "cache"

# Persisted library tree (JSON), rewritten after every update.
snapshot = "save-images.json"

# Deleted originals are moved here. Deletion is disabled when unset.
# garbage_folder = "garbage"

# ---------------------------------------------------------------------------
# Library roots
# ---------------------------------------------------------------------------
[sources]
# name = "folder". The name is the first segment of every library path.
# photos = "/data/photos"

# ---------------------------------------------------------------------------
# Derivatives
# ---------------------------------------------------------------------------
[images]
# Derivative heights in pixels. Each one is resized from the previous one,
# so they are processed largest first. Sources are never upscaled.
sizes = [1080, 250]

# JPEG encoding quality (1 = worst, 100 = best).
quality = 75

# ---------------------------------------------------------------------------
# Resize pipeline queues
# ---------------------------------------------------------------------------
[pipeline]
open_queue = 18
resize_queue = 7
save_queue = 7
# Intake queue in front of the pipeline (EXIF read + cache check).
reducer_queue = 100

# ---------------------------------------------------------------------------
# Reconciliation
# ---------------------------------------------------------------------------
[reconcile]
# How long (ms) a new update waits for a running one before it is refused.
grace_ms = 100

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel folder scans.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
