// =============================================================================
// Compressor — zstd block compression for archive payloads
// =============================================================================
//
// Grounded on examples/original_source/market-scraper/.../archival/
// compressor.py: wrap a JSON-serializable payload in zstd at a configurable
// level. spec §4.7 step 3 calls for "a fast block compressor, ~3-4x ratio,
// >=100MB/s" — zstd at the default low levels matches that profile and is
// what both original archival subsystems use (`compressor.py`'s `zstd`
// import, `utils/archive.py`'s gzip for the orderbook nested path, unified
// here on zstd for one dependency).
// =============================================================================

use anyhow::{Context, Result};
use serde_json::Value;

#[derive(Clone, Copy)]
pub struct Compressor {
    level: i32,
}

impl Compressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    pub fn compress(&self, value: &Value) -> Result<Vec<u8>> {
        let raw = serde_json::to_vec(value).context("failed to serialize archive payload")?;
        zstd::encode_all(&raw[..], self.level).context("zstd compression failed")
    }

    pub fn decompress(&self, bytes: &[u8]) -> Result<Value> {
        let raw = zstd::decode_all(bytes).context("zstd decompression failed")?;
        serde_json::from_slice(&raw).context("failed to deserialize decompressed archive payload")
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_through_compress_decompress() {
        let c = Compressor::new(3);
        let payload = json!({ "documents": [{"a": 1}, {"a": 2}] });
        let compressed = c.compress(&payload).unwrap();
        let restored = c.decompress(&compressed).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn compressed_output_is_smaller_than_repetitive_input() {
        let c = Compressor::new(3);
        let payload = json!({ "documents": (0..200).map(|_| json!({"x": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"})).collect::<Vec<_>>() });
        let compressed = c.compress(&payload).unwrap();
        let raw_len = serde_json::to_vec(&payload).unwrap().len();
        assert!(compressed.len() < raw_len);
    }
}
