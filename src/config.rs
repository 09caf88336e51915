//! Router construction inputs, loadable from and savable to a JSON
//! sidecar file. Mirrors the teacher's `ServerConfig`/`KvServer`
//! load/new pattern in `src/server.rs`: a small `serde`-derived struct
//! written once on first open and reloaded on subsequent opens.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KvError, Result};

pub const DEFAULT_RAM_LIMIT: u64 = 500 * 1024 * 1024;
pub const DEFAULT_DISK_LIMIT: u64 = 2 * 1024 * 1024 * 1024;
pub const DEFAULT_NUM_SHARDS: u64 = 256;
pub const DEFAULT_LARGE_VALUE_THRESHOLD: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterConfig {
    pub compact_path: PathBuf,
    pub shard_prefix: PathBuf,
    pub ram_limit: u64,
    pub disk_limit: u64,
    pub num_shards: u64,
    pub large_value_threshold: u64,
}

impl RouterConfig {
    pub fn new(compact_path: impl Into<PathBuf>, shard_prefix: impl Into<PathBuf>) -> RouterConfig {
        RouterConfig {
            compact_path: compact_path.into(),
            shard_prefix: shard_prefix.into(),
            ram_limit: DEFAULT_RAM_LIMIT,
            disk_limit: DEFAULT_DISK_LIMIT,
            num_shards: DEFAULT_NUM_SHARDS,
            large_value_threshold: DEFAULT_LARGE_VALUE_THRESHOLD,
        }
    }

    pub fn with_ram_limit(mut self, ram_limit: u64) -> Self {
        self.ram_limit = ram_limit;
        self
    }

    pub fn with_disk_limit(mut self, disk_limit: u64) -> Self {
        self.disk_limit = disk_limit;
        self
    }

    pub fn with_num_shards(mut self, num_shards: u64) -> Self {
        self.num_shards = num_shards;
        self
    }

    pub fn with_large_value_threshold(mut self, threshold: u64) -> Self {
        self.large_value_threshold = threshold;
        self
    }

    pub fn load(path: impl AsRef<Path>) -> Result<RouterConfig> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| KvError::io(path, e))?;
        serde_json::from_str(&contents)
            .map_err(|e| KvError::corrupt(path, format!("invalid config json: {e}")))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| KvError::corrupt(path, format!("failed to encode config: {e}")))?;
        let mut f = File::create(path).map_err(|e| KvError::io(path, e))?;
        f.write_all(contents.as_bytes()).map_err(|e| KvError::io(path, e))?;
        f.flush().map_err(|e| KvError::io(path, e))
    }

    /// Loads the config at `path` if present, otherwise constructs the
    /// default for the given paths and persists it, matching the
    /// teacher's `KvServer::load`-or-`new` branch in `main`.
    pub fn load_or_init(
        path: impl AsRef<Path>,
        compact_path: impl Into<PathBuf>,
        shard_prefix: impl Into<PathBuf>,
    ) -> Result<RouterConfig> {
        let path = path.as_ref();
        if path.exists() {
            RouterConfig::load(path)
        } else {
            let config = RouterConfig::new(compact_path, shard_prefix);
            config.save(path)?;
            Ok(config)
        }
    }
}
