//! The memory-resident tier: a full in-memory map persisted as a
//! single compressed, serialized blob file. Grounded on the teacher's
//! trivial `KvStore` (`src/kv.rs`) for the in-memory map shape, and on
//! `SledStore::open` (`src/engines/sled.rs`) for the open-on-construct,
//! flush-on-demand lifecycle.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::codec;
use crate::error::{KvError, Result};

/// Fixed per-entry overhead (bytes) added to each key/value's UTF-8
/// length when estimating RAM usage: approximates a `String` header +
/// `Vec<u8>` header + hash-map slot on a 64-bit target. Not exact, but
/// monotone in inserts/deletes, which is all the budget check needs.
pub const ENTRY_OVERHEAD: u64 = 48;

/// The compact, fully-resident tier.
pub struct CompactStore {
    path: PathBuf,
    map: HashMap<String, Vec<u8>>,
}

impl CompactStore {
    /// Opens the compact file at `path`, loading it fully into memory
    /// if it exists. A missing file is treated as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<CompactStore> {
        let path = path.into();
        let map = if path.exists() {
            Self::load_from(&path)?
        } else {
            HashMap::new()
        };
        Ok(CompactStore { path, map })
    }

    fn load_from(path: &Path) -> Result<HashMap<String, Vec<u8>>> {
        let compressed = fs::read(path).map_err(|e| KvError::io(path, e))?;
        let raw = codec::decompress(&compressed)?;
        let mapping = codec::deserialize(&raw)?;
        Ok(mapping.into_iter().collect())
    }

    /// Reloads from disk, discarding any unsaved in-memory mutations.
    pub fn load(&mut self) -> Result<()> {
        self.map = if self.path.exists() {
            Self::load_from(&self.path)?
        } else {
            HashMap::new()
        };
        Ok(())
    }

    /// Inserts or overwrites `key` in memory. Does not flush.
    pub fn set(&mut self, key: String, value: Vec<u8>) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Vec<u8>> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Removes `key` in memory, no-op if absent.
    pub fn delete(&mut self, key: &str) {
        self.map.remove(key);
    }

    pub fn get_all_keys(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn search_keys_for_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a String> {
        self.map.keys().filter(move |k| k.starts_with(prefix))
    }

    pub fn search_keys_for_value<'a>(&'a self, value: &'a [u8]) -> impl Iterator<Item = &'a String> {
        self.map
            .iter()
            .filter(move |(_, v)| v.as_slice() == value)
            .map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// `ram_bytes = sum over entries of (size_of(key) + size_of(value) +
    /// ENTRY_OVERHEAD)`.
    pub fn ram_bytes(&self) -> u64 {
        self.map
            .iter()
            .map(|(k, v)| k.len() as u64 + v.len() as u64 + ENTRY_OVERHEAD)
            .sum()
    }

    /// What RAM usage would be after also holding `key`/`value` (and
    /// replacing any existing entry for `key`), without mutating
    /// anything. Used by the router's placement decision.
    pub fn ram_bytes_with(&self, key: &str, value: &[u8]) -> u64 {
        let current = self.ram_bytes();
        let existing = self
            .map
            .get(key)
            .map(|v| key.len() as u64 + v.len() as u64 + ENTRY_OVERHEAD)
            .unwrap_or(0);
        current - existing + key.len() as u64 + value.len() as u64 + ENTRY_OVERHEAD
    }

    /// Writes `compress(serialize(map))` to a fresh file, replacing any
    /// previous contents (truncate-and-write).
    pub fn save(&self) -> Result<()> {
        let mapping: codec::Mapping = self
            .map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let raw = codec::serialize(&mapping)?;
        let compressed = codec::compress(&raw);
        fs::write(&self.path, compressed).map_err(|e| KvError::io(&self.path, e))?;
        debug!("compact store saved: {} entries to {:?}", self.map.len(), self.path);
        Ok(())
    }
}
