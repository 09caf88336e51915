//! Stateless (de)serialization, compression, and hashing shared by both
//! storage tiers. Mirrors the original Python storage's
//! `bson.dumps`/`lz4.frame.compress`/`hashlib.md5` trio: `bincode`
//! stands in for BSON as the self-delimiting binary document format,
//! and `lz4_flex`'s frame codec stands in for `lz4.frame`.

use std::collections::BTreeMap;

use md5::{Digest, Md5};

use crate::error::{KvError, Result};

/// A single-entry or multi-entry mapping as persisted on disk. Keys are
/// compared byte-exactly (UTF-8 encoding of the caller-provided string).
pub type Mapping = BTreeMap<String, Vec<u8>>;

/// Encodes a mapping into a self-delimiting byte sequence.
pub fn serialize(mapping: &Mapping) -> Result<Vec<u8>> {
    bincode::serialize(mapping).map_err(|e| KvError::corrupt("<memory>", e.to_string()))
}

/// Decodes a byte sequence produced by [`serialize`].
pub fn deserialize(bytes: &[u8]) -> Result<Mapping> {
    bincode::deserialize(bytes).map_err(|e| KvError::corrupt("<memory>", e.to_string()))
}

/// Compresses a byte sequence with a streaming, self-framed block
/// compressor (LZ4 frame).
pub fn compress(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        use std::io::Write;
        let mut encoder = lz4_flex::frame::FrameEncoder::new(&mut out);
        encoder.write_all(bytes).expect("in-memory write cannot fail");
        encoder.finish().expect("in-memory finish cannot fail");
    }
    out
}

/// Inverse of [`compress`].
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut out = Vec::new();
    let mut decoder = lz4_flex::frame::FrameDecoder::new(bytes);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| KvError::corrupt("<memory>", format!("lz4 frame decode failed: {e}")))?;
    Ok(out)
}

/// Raw 128-bit MD5 digest of the UTF-8 encoding of `s`. Not
/// security-relevant; used only for shard selection.
pub fn hash(s: &str) -> [u8; 16] {
    let digest = Md5::digest(s.as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// `shard_index(k) = md5(utf8(k)) mod n`, computed with full-width
/// 128-bit arithmetic so it matches Python's
/// `int(md5_hex(k), 16) % num_shards` exactly: a 16-byte MD5 digest is
/// precisely 128 bits, so reading it big-endian into a `u128` and
/// reducing modulo `n` reproduces the arbitrary-precision computation
/// without needing a bignum type.
pub fn shard_index(key: &str, n: u64) -> u64 {
    debug_assert!(n > 0, "shard count must be positive");
    let digest = hash(key);
    let value = u128::from_be_bytes(digest);
    (value % n as u128) as u64
}
