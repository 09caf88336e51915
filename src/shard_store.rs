//! The sharded append-log tier: N append-only files of length-prefixed
//! compressed single-entry records. Grounded on the teacher's
//! `KvStore` log (`src/engines/kv.rs`): the append-then-flush write
//! path and the temp-file-then-rename compaction dance are carried
//! over directly, adapted from a single positional log to N
//! content-addressed (by key hash) shard files with no position index.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use log::warn;

use crate::codec;
use crate::error::{KvError, Result};

/// The sharded, append-only tier.
pub struct ShardStore {
    prefix: PathBuf,
    num_shards: u64,
}

impl ShardStore {
    pub fn new(prefix: impl Into<PathBuf>, num_shards: u64) -> ShardStore {
        assert!(num_shards > 0, "shard count must be positive");
        ShardStore {
            prefix: prefix.into(),
            num_shards,
        }
    }

    pub fn num_shards(&self) -> u64 {
        self.num_shards
    }

    fn shard_path(&self, index: u64) -> PathBuf {
        let mut path = self.prefix.clone();
        let file_name = format!(
            "{}_shard_{}.kvs",
            path.file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            index
        );
        path.set_file_name(file_name);
        path
    }

    fn shard_path_for_key(&self, key: &str) -> PathBuf {
        self.shard_path(codec::shard_index(key, self.num_shards))
    }

    fn all_shard_paths(&self) -> Vec<PathBuf> {
        (0..self.num_shards).map(|i| self.shard_path(i)).collect()
    }

    /// Appends one record for `key`/`value` to its shard. Duplicate
    /// inserts for the same key are allowed; readers resolve with
    /// last-write-wins.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.shard_path_for_key(key);
        let record = encode_record(key, value)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| KvError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&record).map_err(|e| KvError::io(&path, e))?;
        writer.flush().map_err(|e| KvError::io(&path, e))?;
        Ok(())
    }

    /// Streams the shard for `key`, returning the value of the last
    /// record referencing it.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.shard_path_for_key(key);
        if !path.exists() {
            return Ok(None);
        }
        let merged = read_shard_merged(&path, true)?;
        Ok(merged.get(key).cloned())
    }

    /// Read-compact-write: merges the shard (last write wins), removes
    /// `key`, and rewrites the shard as one record per remaining key.
    /// No-op if the shard doesn't exist or doesn't contain `key`.
    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.shard_path_for_key(key);
        if !path.exists() {
            return Ok(());
        }
        let mut merged = read_shard_merged(&path, true)?;
        if merged.remove(key).is_none() {
            return Ok(());
        }
        rewrite_shard(&path, &merged)
    }

    /// Merges every shard (last write wins per shard) and returns the
    /// union of live keys. Corruption in a shard is logged and that
    /// shard's remaining records are skipped; other shards are still
    /// scanned (see DESIGN.md for the corruption policy).
    pub fn get_all_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for path in self.all_shard_paths() {
            if !path.exists() {
                continue;
            }
            let merged = read_shard_merged(&path, false)?;
            keys.extend(merged.into_keys());
        }
        Ok(keys)
    }

    pub fn search_keys_for_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut result = Vec::new();
        for path in self.all_shard_paths() {
            if !path.exists() {
                continue;
            }
            let merged = read_shard_merged(&path, false)?;
            result.extend(merged.into_keys().filter(|k| k.starts_with(prefix)));
        }
        Ok(result)
    }

    pub fn search_keys_for_value(&self, value: &[u8]) -> Result<Vec<String>> {
        let mut result = Vec::new();
        for path in self.all_shard_paths() {
            if !path.exists() {
                continue;
            }
            let merged = read_shard_merged(&path, false)?;
            result.extend(
                merged
                    .into_iter()
                    .filter(|(_, v)| v.as_slice() == value)
                    .map(|(k, _)| k),
            );
        }
        Ok(result)
    }

    /// `disk_bytes = sum over shards of file_size(shard)`; missing
    /// files count as 0. Measured live from the filesystem.
    pub fn disk_bytes(&self) -> u64 {
        self.all_shard_paths()
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Size a new record for `key`/`value` would occupy on disk,
    /// without writing it. Used by the router's budget check.
    pub fn encoded_record_len(&self, key: &str, value: &[u8]) -> Result<u64> {
        Ok(encode_record(key, value)?.len() as u64)
    }
}

fn encode_record(key: &str, value: &[u8]) -> Result<Vec<u8>> {
    let mut mapping = codec::Mapping::new();
    mapping.insert(key.to_string(), value.to_vec());
    let raw = codec::serialize(&mapping)?;
    let payload = codec::compress(&raw);
    let mut record = Vec::with_capacity(4 + payload.len());
    record
        .write_u32::<LittleEndian>(payload.len() as u32)
        .expect("writing to a Vec cannot fail");
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Reads every record in `path`, merging them into a single mapping
/// with last-write-wins semantics. If `strict` is true, any corruption
/// (truncated prefix, truncated payload, bad compression, a payload
/// that isn't a single-key mapping) aborts with `CorruptRecord`. If
/// `strict` is false, corruption is logged and the records already
/// merged are returned.
fn read_shard_merged(path: &Path, strict: bool) -> Result<HashMap<String, Vec<u8>>> {
    let file = File::open(path).map_err(|e| KvError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut merged = HashMap::new();

    loop {
        let mut prefix = [0u8; 4];
        let mut filled = 0usize;
        while filled < 4 {
            match reader.read(&mut prefix[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(KvError::io(path, e)),
            }
        }
        if filled == 0 {
            // Clean end of file at a record boundary.
            break;
        }
        if filled < 4 {
            let detail = format!("truncated length prefix: only {filled} of 4 bytes readable");
            return handle_corruption(path, strict, detail, merged);
        }
        let length = u32::from_le_bytes(prefix);

        let mut payload = vec![0u8; length as usize];
        if let Err(e) = reader.read_exact(&mut payload) {
            let detail = format!(
                "record claims {length} byte payload but only {} bytes were readable: {e}",
                payload.len()
            );
            return handle_corruption(path, strict, detail, merged);
        }

        let raw = match codec::decompress(&payload) {
            Ok(raw) => raw,
            Err(e) => return handle_corruption(path, strict, e.to_string(), merged),
        };
        let entry = match codec::deserialize(&raw) {
            Ok(m) => m,
            Err(e) => return handle_corruption(path, strict, e.to_string(), merged),
        };
        if entry.len() != 1 {
            let detail = format!("record decoded to {} keys, expected exactly 1", entry.len());
            return handle_corruption(path, strict, detail, merged);
        }
        merged.extend(entry);
    }

    Ok(merged)
}

fn handle_corruption(
    path: &Path,
    strict: bool,
    detail: String,
    merged: HashMap<String, Vec<u8>>,
) -> Result<HashMap<String, Vec<u8>>> {
    if strict {
        Err(KvError::corrupt(path, detail))
    } else {
        warn!("corrupt record in shard {:?}, skipping remainder: {detail}", path);
        Ok(merged)
    }
}

/// Rewrites `path` as a concatenation of single-entry records, one per
/// entry in `merged`, via a temp-file-then-rename, the same strategy
/// the teacher's `KvStore::compact` uses for its own log compaction.
/// If `merged` is empty, the shard file is removed instead.
fn rewrite_shard(path: &Path, merged: &HashMap<String, Vec<u8>>) -> Result<()> {
    if merged.is_empty() {
        return fs::remove_file(path).or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(KvError::io(path, e))
            }
        });
    }

    let tmp_path = {
        let mut p = path.to_path_buf();
        let name = format!(
            "{}.compact.tmp",
            p.file_name().unwrap().to_string_lossy()
        );
        p.set_file_name(name);
        p
    };

    {
        let file = File::create(&tmp_path).map_err(|e| KvError::io(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        for (key, value) in merged {
            let record = encode_record(key, value)?;
            writer.write_all(&record).map_err(|e| KvError::io(&tmp_path, e))?;
        }
        writer.flush().map_err(|e| KvError::io(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| KvError::io(path, e))
}
