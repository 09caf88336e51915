//! The public façade. Owns one `CompactStore` and one `ShardStore`,
//! routes each `set` to a tier based on value size and the current
//! RAM/disk budget, keeps keys unique across tiers, and fans scans out
//! to both. Named `Router` after spec's "Router (Handler)"; shaped
//! after the teacher's `KvsEngine` trait methods (`set`/`get`/`remove`)
//! but as a concrete, non-`Clone`, single-owner struct since
//! concurrent access is a Non-goal here.

use std::collections::HashSet;
use std::path::Path;

use log::{debug, info};

use crate::compact_store::CompactStore;
use crate::config::RouterConfig;
use crate::error::{KvError, Result};
use crate::shard_store::ShardStore;

pub struct Router {
    compact: CompactStore,
    shard: ShardStore,
    ram_limit: u64,
    disk_limit: u64,
    large_value_threshold: u64,
}

impl Router {
    /// Opens (or creates) a Router from an explicit config, matching
    /// spec.md's Router constructor inputs (§6).
    pub fn open(config: RouterConfig) -> Result<Router> {
        let compact = CompactStore::open(&config.compact_path)?;
        let shard = ShardStore::new(&config.shard_prefix, config.num_shards);
        info!(
            "router opened: compact={:?} shard_prefix={:?} shards={} ram_limit={} disk_limit={}",
            config.compact_path, config.shard_prefix, config.num_shards, config.ram_limit, config.disk_limit
        );
        Ok(Router {
            compact,
            shard,
            ram_limit: config.ram_limit,
            disk_limit: config.disk_limit,
            large_value_threshold: config.large_value_threshold,
        })
    }

    /// Convenience constructor using default limits (spec.md §6:
    /// 500 MiB RAM, 2 GiB disk, 256 shards, 50 MiB large-value
    /// threshold).
    pub fn with_defaults(
        compact_path: impl Into<std::path::PathBuf>,
        shard_prefix: impl Into<std::path::PathBuf>,
    ) -> Result<Router> {
        Router::open(RouterConfig::new(compact_path, shard_prefix))
    }

    pub fn ram_bytes(&self) -> u64 {
        self.compact.ram_bytes()
    }

    pub fn disk_bytes(&self) -> u64 {
        self.shard.disk_bytes()
    }

    /// Places `key`/`value` in whichever tier the placement policy
    /// selects, first evicting any copy in the other tier.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Result<()> {
        let key = key.into();
        let value = value.into();

        // Ensure the key is not present in the tier we are *not* about
        // to write, per spec.md §4.1: "must first ensure the key does
        // not exist in the other tier; if it does, remove it there
        // before writing."
        let place_in_shard = self.should_place_in_shard(&key, &value)?;

        if place_in_shard {
            if self.compact.contains_key(&key) {
                self.compact.delete(&key);
            }
            self.shard.set(&key, &value)?;
        } else {
            // Even if this lands in CompactStore, an earlier copy may
            // be sitting in ShardStore (e.g. the key was previously
            // oversized and has since shrunk) -- evict it first so
            // tier disjointness holds.
            self.shard.delete(&key)?;
            self.compact.set(key, value);
        }
        Ok(())
    }

    fn should_place_in_shard(&self, key: &str, value: &[u8]) -> Result<bool> {
        let combined_size = key.len() as u64 + value.len() as u64;

        if combined_size > self.large_value_threshold {
            self.check_disk_budget(key, value)?;
            return Ok(true);
        }

        let ram_after = self.compact.ram_bytes_with(key, value);
        if ram_after > self.ram_limit {
            self.check_disk_budget(key, value)?;
            return Ok(true);
        }

        Ok(false)
    }

    fn check_disk_budget(&self, key: &str, value: &[u8]) -> Result<()> {
        let record_len = self.shard.encoded_record_len(key, value)?;
        let disk_after = self.shard.disk_bytes() + record_len;
        if disk_after > self.disk_limit {
            return Err(KvError::BudgetExceeded {
                ram_needed: self.compact.ram_bytes_with(key, value),
                ram_limit: self.ram_limit,
                disk_needed: disk_after,
                disk_limit: self.disk_limit,
            });
        }
        Ok(())
    }

    /// CompactStore first, then ShardStore.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.compact.get(key) {
            return Ok(Some(value.clone()));
        }
        self.shard.get(key)
    }

    /// Removes `key` from whichever tier holds it; no-op if absent.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        if self.compact.contains_key(key) {
            self.compact.delete(key);
            return Ok(());
        }
        self.shard.delete(key)
    }

    /// Best-effort in iteration order: aborts on the first failure,
    /// leaving already-applied entries in place.
    pub fn set_multiple<I, K, V>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Union of CompactStore and ShardStore keys, each present at most
    /// once. Order is unspecified.
    pub fn get_all_keys(&self) -> Result<Vec<String>> {
        let mut keys: HashSet<String> = self.compact.get_all_keys().cloned().collect();
        keys.extend(self.shard.get_all_keys()?);
        Ok(keys.into_iter().collect())
    }

    pub fn search_keys_for_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: HashSet<String> = self
            .compact
            .search_keys_for_prefix(prefix)
            .cloned()
            .collect();
        keys.extend(self.shard.search_keys_for_prefix(prefix)?);
        Ok(keys.into_iter().collect())
    }

    pub fn search_keys_for_value(&self, value: &[u8]) -> Result<Vec<String>> {
        let mut keys: HashSet<String> = self
            .compact
            .search_keys_for_value(value)
            .cloned()
            .collect();
        keys.extend(self.shard.search_keys_for_value(value)?);
        Ok(keys.into_iter().collect())
    }

    /// Flushes CompactStore's file. ShardStore is already durable per
    /// write.
    pub fn save(&self) -> Result<()> {
        self.compact.save()?;
        debug!("router saved");
        Ok(())
    }

    /// Reopens the compact file from disk, discarding unsaved
    /// mutations. Exposed mainly for tests that verify persistence
    /// across a simulated restart without constructing a fresh Router.
    pub fn reload_compact(&mut self) -> Result<()> {
        self.compact.load()
    }
}

/// Convenience for callers that only have string paths, matching the
/// teacher's `impl Into<PathBuf>` constructor convention.
pub fn open(
    compact_path: impl AsRef<Path>,
    shard_prefix: impl AsRef<Path>,
    ram_limit: u64,
    disk_limit: u64,
    num_shards: u64,
    large_value_threshold: u64,
) -> Result<Router> {
    let config = RouterConfig::new(compact_path.as_ref(), shard_prefix.as_ref())
        .with_ram_limit(ram_limit)
        .with_disk_limit(disk_limit)
        .with_num_shards(num_shards)
        .with_large_value_threshold(large_value_threshold);
    Router::open(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn router(dir: &TempDir) -> Router {
        Router::with_defaults(dir.path().join("compact.kvs"), dir.path().join("shard")).unwrap()
    }

    fn router_with_limits(dir: &TempDir, ram_limit: u64, disk_limit: u64) -> Router {
        Router::open(
            RouterConfig::new(dir.path().join("compact.kvs"), dir.path().join("shard"))
                .with_ram_limit(ram_limit)
                .with_disk_limit(disk_limit),
        )
        .unwrap()
    }

    #[test]
    fn scenario_basic_set_get_keys() {
        let dir = TempDir::new().unwrap();
        let mut r = router(&dir);
        r.set("k1", "v1".as_bytes().to_vec()).unwrap();
        r.set("k2", "v2".as_bytes().to_vec()).unwrap();

        let mut keys = r.get_all_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(r.get("k1").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn scenario_thousand_small_entries_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let compact_path = dir.path().join("compact.kvs");
        let shard_prefix = dir.path().join("shard");

        {
            let mut r = Router::with_defaults(&compact_path, &shard_prefix).unwrap();
            for i in 0..1000 {
                r.set(format!("key {i}"), format!("value {i}").into_bytes())
                    .unwrap();
            }
            r.save().unwrap();
        }

        let r = Router::with_defaults(&compact_path, &shard_prefix).unwrap();
        assert_eq!(r.get_all_keys().unwrap().len(), 1000);
        for i in 0..1000 {
            assert_eq!(
                r.get(&format!("key {i}")).unwrap(),
                Some(format!("value {i}").into_bytes())
            );
        }
    }

    #[test]
    fn scenario_large_value_routes_to_shard_store() {
        let dir = TempDir::new().unwrap();
        // Same threshold/ram relationship as the 60 MiB scenario below,
        // scaled down so the test stays fast: a tiny large-value
        // threshold forces the large-value branch of
        // `should_place_in_shard` regardless of the (untouched, default)
        // RAM budget.
        let mut r = Router::open(
            RouterConfig::new(dir.path().join("compact.kvs"), dir.path().join("shard"))
                .with_large_value_threshold(1024),
        )
        .unwrap();
        let blob = vec![b'A'; 4096];
        r.set("big", blob.clone()).unwrap();
        assert!(r.disk_bytes() > 0);
        assert_eq!(r.get("big").unwrap(), Some(blob));
    }

    #[test]
    #[ignore = "exercises the full 50 MiB threshold with a 60 MiB blob; slow"]
    fn scenario_sixty_mib_value_routes_to_shard_store() {
        let dir = TempDir::new().unwrap();
        let mut r = router(&dir);
        let blob = vec![b'A'; 60 * 1024 * 1024];
        r.set("big", blob.clone()).unwrap();
        assert!(r.disk_bytes() > 0);
        assert_eq!(r.get("big").unwrap(), Some(blob));
    }

    #[test]
    fn scenario_delete_then_reinsert_may_change_tier() {
        let dir = TempDir::new().unwrap();
        let mut r = router_with_limits(&dir, 1024, 1024 * 1024);
        r.set("x", b"1".to_vec()).unwrap();
        r.delete("x").unwrap();
        r.set("x", b"2".to_vec()).unwrap();
        assert_eq!(r.get("x").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn scenario_prefix_scan_merges_both_tiers() {
        let dir = TempDir::new().unwrap();
        let mut r = router_with_limits(&dir, 200, 1024 * 1024);
        for i in 0..10 {
            r.set(format!("fruit/{i}"), vec![b'a'; 5]).unwrap();
            r.set(format!("veg/{i}"), vec![b'b'; 5]).unwrap();
        }
        let mut fruit = r.search_keys_for_prefix("fruit/").unwrap();
        fruit.sort();
        let expected: Vec<String> = (0..10).map(|i| format!("fruit/{i}")).collect();
        assert_eq!(fruit, expected);
    }

    #[test]
    fn scenario_budget_exceeded_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut r = router_with_limits(&dir, 1024, 1024);
        // Repeated bytes compress away to nothing under LZ4, which would
        // slip under `disk_limit` and defeat the test; use incompressible
        // data so the encoded record size tracks the raw size.
        let big = incompressible_bytes(10 * 1024);
        let err = r.set("k", big).unwrap_err();
        assert!(matches!(err, KvError::BudgetExceeded { .. }));
        assert!(r.get_all_keys().unwrap().is_empty());
    }

    #[test]
    fn overwrite_across_tiers_keeps_single_copy() {
        let dir = TempDir::new().unwrap();
        let mut r = router_with_limits(&dir, 64, 1024 * 1024);
        // First write is small enough for the compact tier's tiny budget to reject it,
        // so it lands in the shard tier.
        r.set("k", vec![b'a'; 100]).unwrap();
        assert!(r.compact.len() == 0 || r.compact.get("k").is_none());

        // Now overwrite with something that clears the ram budget check.
        r.set("k", vec![b'b'; 4]).unwrap();
        assert_eq!(r.get("k").unwrap(), Some(vec![b'b'; 4]));

        let keys = r.get_all_keys().unwrap();
        assert_eq!(keys.iter().filter(|k| k.as_str() == "k").count(), 1);
    }

    #[test]
    fn set_multiple_is_best_effort_in_order() {
        let dir = TempDir::new().unwrap();
        let mut r = router_with_limits(&dir, 1024, 200);
        // "too-big" must stay incompressible, or LZ4 shrinks it under
        // `disk_limit` and the whole batch succeeds instead of failing
        // partway through.
        let entries = vec![
            ("a".to_string(), vec![b'1'; 10]),
            ("b".to_string(), vec![b'2'; 10]),
            ("too-big".to_string(), incompressible_bytes(10_000)),
            ("c".to_string(), vec![b'4'; 10]),
        ];
        let err = r.set_multiple(entries).unwrap_err();
        assert!(matches!(err, KvError::BudgetExceeded { .. }));
        assert_eq!(r.get("a").unwrap(), Some(vec![b'1'; 10]));
        assert_eq!(r.get("b").unwrap(), Some(vec![b'2'; 10]));
        assert_eq!(r.get("c").unwrap(), None);
    }

    /// Pseudo-random bytes that LZ4 cannot meaningfully shrink, for tests
    /// that need the encoded record size to track the raw value size.
    fn incompressible_bytes(n: usize) -> Vec<u8> {
        use rand::prelude::*;
        let mut rng = SmallRng::from_seed([9; 32]);
        (0..n).map(|_| rng.gen()).collect()
    }
}
